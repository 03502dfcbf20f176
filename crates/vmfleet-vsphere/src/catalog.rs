//! Operation catalog: every operation the client can issue, declared as
//! schema data, and the single validation routine that checks a caller's
//! parameter map against it.
//!
//! The catalog is built once and never mutated; callers share it through
//! [`OperationCatalog::builtin`].

use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::{VmwareError, VmwareResult};
use crate::types::ResultShape;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Schema types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamKind {
    Text,
    /// Non-negative decimal integer.
    Integer,
    /// `true` or `false`.
    Flag,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    pub name: &'static str,
    pub required: bool,
    /// Exact, case-sensitive set of accepted values.
    pub allowed: Option<&'static [&'static str]>,
    pub kind: ParamKind,
    /// Never logged, never shown in a rendered request.
    pub secret: bool,
    /// Script flag when it differs from `name`.
    #[serde(skip)]
    pub flag: Option<&'static str>,
}

impl ParamSpec {
    const fn text(name: &'static str, required: bool) -> Self {
        Self {
            name,
            required,
            allowed: None,
            kind: ParamKind::Text,
            secret: false,
            flag: None,
        }
    }

    const fn choice(name: &'static str, required: bool, allowed: &'static [&'static str]) -> Self {
        Self {
            allowed: Some(allowed),
            ..Self::text(name, required)
        }
    }

    const fn integer(name: &'static str) -> Self {
        Self {
            kind: ParamKind::Integer,
            ..Self::text(name, false)
        }
    }

    const fn flag_param(name: &'static str) -> Self {
        Self {
            kind: ParamKind::Flag,
            ..Self::text(name, false)
        }
    }

    const fn secret(name: &'static str) -> Self {
        Self {
            secret: true,
            ..Self::text(name, false)
        }
    }

    const fn script_flag(self, flag: &'static str) -> Self {
        Self {
            flag: Some(flag),
            ..self
        }
    }

    /// Command-line flag used by the SDK scripts.
    pub fn cli_flag(&self) -> &'static str {
        self.flag.unwrap_or(self.name)
    }
}

/// Whether repeating an operation is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Idempotency {
    /// Pure query.
    Read,
    /// Mutation whose repetition converges to the same remote state.
    IdempotentMutate,
    /// Mutation that must not be applied twice (power, clone, migrate…).
    NonIdempotentMutate,
}

impl Idempotency {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// Per-action behaviour of an operation that has an action field.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    pub value: &'static str,
    pub shape: ResultShape,
    pub idempotency: Idempotency,
    /// Optional fields that this action makes mandatory.
    pub requires: &'static [&'static str],
}

const fn action(
    value: &'static str,
    shape: ResultShape,
    idempotency: Idempotency,
    requires: &'static [&'static str],
) -> ActionSpec {
    ActionSpec {
        value,
        shape,
        idempotency,
        requires,
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Behavior {
    Fixed {
        shape: ResultShape,
        idempotency: Idempotency,
    },
    ByAction {
        field: &'static str,
        actions: &'static [ActionSpec],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Family {
    Vm,
    Host,
    Datastore,
    General,
    Performance,
}

/// One catalog entry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    pub name: &'static str,
    pub family: Family,
    pub summary: &'static str,
    /// SDK script relative to the SDK apps directory.
    pub script: &'static str,
    pub params: &'static [ParamSpec],
    pub behavior: Behavior,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Built-in operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use Idempotency::{IdempotentMutate, NonIdempotentMutate, Read};

const POWER_ACTIONS: &[&str] = &[
    "poweron", "poweroff", "suspend", "reboot", "reset", "shutdown", "standby",
];
const SNAPSHOT_ACTIONS: &[&str] = &[
    "list", "revert", "goto", "rename", "remove", "removeall", "create",
];
const HOST_ACTIONS: &[&str] = &[
    "add_standalone",
    "disconnect",
    "enter_maintenance",
    "exit_maintenance",
    "reboot",
    "shutdown",
    "addhost",
    "reconnect",
    "removehost",
    "moveintofolder",
    "moveintocluster",
];
const SHARE_LEVELS: &[&str] = &["low", "normal", "high"];

static OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        name: "vm.info",
        family: Family::Vm,
        summary: "Attributes of a virtual machine",
        script: "vm/vminfo.pl",
        params: &[ParamSpec::text("vmname", true)],
        behavior: Behavior::Fixed {
            shape: ResultShape::Vms,
            idempotency: Read,
        },
    },
    OperationSpec {
        name: "vm.guest",
        family: Family::Vm,
        summary: "Display or customize guest information",
        script: "vm/guestinfo.pl",
        params: &[
            ParamSpec::text("vmname", true),
            ParamSpec::choice("operation", true, &["display", "customize"]),
            ParamSpec::text("guesthost", false),
        ],
        behavior: Behavior::ByAction {
            field: "operation",
            actions: &[
                action("display", ResultShape::Vms, Read, &[]),
                action("customize", ResultShape::Ack, IdempotentMutate, &["guesthost"]),
            ],
        },
    },
    OperationSpec {
        name: "vm.shares",
        family: Family::Vm,
        summary: "Display or modify CPU, memory and disk shares",
        script: "vm/sharesmanager.pl",
        params: &[
            ParamSpec::text("vmname", true),
            ParamSpec::choice("operation", true, &["display", "update"]),
            ParamSpec::choice("cpu", false, SHARE_LEVELS),
            ParamSpec::choice("memory", false, SHARE_LEVELS),
            ParamSpec::choice("disk", false, SHARE_LEVELS),
        ],
        behavior: Behavior::ByAction {
            field: "operation",
            actions: &[
                action("display", ResultShape::Shares, Read, &[]),
                action("update", ResultShape::Ack, IdempotentMutate, &[]),
            ],
        },
    },
    OperationSpec {
        name: "vm.snapshot",
        family: Family::Vm,
        summary: "List, revert, rename, remove or create snapshots",
        script: "vm/snapshotmanager.pl",
        params: &[
            ParamSpec::text("vmname", false),
            ParamSpec::choice("operation", true, SNAPSHOT_ACTIONS),
            ParamSpec::text("snapshotname", false),
            ParamSpec::text("newname", false),
            ParamSpec::flag_param("children"),
        ],
        behavior: Behavior::ByAction {
            field: "operation",
            actions: &[
                action("list", ResultShape::Snapshots, Read, &[]),
                action("revert", ResultShape::Ack, IdempotentMutate, &["snapshotname"]),
                action("goto", ResultShape::Ack, IdempotentMutate, &["snapshotname"]),
                action(
                    "rename",
                    ResultShape::Ack,
                    IdempotentMutate,
                    &["snapshotname", "newname"],
                ),
                action("remove", ResultShape::Ack, NonIdempotentMutate, &["snapshotname"]),
                action("removeall", ResultShape::Ack, IdempotentMutate, &[]),
                action(
                    "create",
                    ResultShape::Ack,
                    NonIdempotentMutate,
                    &["vmname", "snapshotname"],
                ),
            ],
        },
    },
    OperationSpec {
        name: "vm.disk_add",
        family: Family::Vm,
        summary: "Add a virtual disk to a virtual machine",
        script: "vm/vdiskcreate.pl",
        params: &[
            ParamSpec::text("vmname", true),
            ParamSpec::text("filename", true),
            ParamSpec::integer("disksize"),
        ],
        behavior: Behavior::Fixed {
            shape: ResultShape::Ack,
            idempotency: NonIdempotentMutate,
        },
    },
    OperationSpec {
        name: "vm.clone",
        family: Family::Vm,
        summary: "Clone a virtual machine",
        script: "vm/vmclone.pl",
        params: &[
            ParamSpec::text("vmname", true),
            ParamSpec::text("vmhost", true),
            ParamSpec::text("vmname_destination", true),
            ParamSpec::text("datastore", false),
        ],
        behavior: Behavior::Fixed {
            shape: ResultShape::Ack,
            idempotency: NonIdempotentMutate,
        },
    },
    OperationSpec {
        name: "vm.power",
        family: Family::Vm,
        summary: "Power on/off, suspend, reboot, reset, shut down or stand by a VM",
        script: "vm/vmcontrol.pl",
        params: &[
            ParamSpec::text("vmname", true),
            ParamSpec::choice("operation", true, POWER_ACTIONS),
        ],
        behavior: Behavior::ByAction {
            field: "operation",
            actions: &[
                action("poweron", ResultShape::Ack, NonIdempotentMutate, &[]),
                action("poweroff", ResultShape::Ack, NonIdempotentMutate, &[]),
                action("suspend", ResultShape::Ack, NonIdempotentMutate, &[]),
                action("reboot", ResultShape::Ack, NonIdempotentMutate, &[]),
                action("reset", ResultShape::Ack, NonIdempotentMutate, &[]),
                action("shutdown", ResultShape::Ack, NonIdempotentMutate, &[]),
                action("standby", ResultShape::Ack, NonIdempotentMutate, &[]),
            ],
        },
    },
    OperationSpec {
        name: "vm.create",
        family: Family::Vm,
        summary: "Create virtual machines from an XML description",
        script: "vm/vmcreate.pl",
        params: &[
            ParamSpec::text("filename", true),
            ParamSpec::text("schema", false),
        ],
        behavior: Behavior::Fixed {
            shape: ResultShape::Ack,
            idempotency: NonIdempotentMutate,
        },
    },
    OperationSpec {
        name: "vm.migrate",
        family: Family::Vm,
        summary: "Migrate a virtual machine to another host, datastore and pool",
        script: "vm/vmmigrate.pl",
        params: &[
            ParamSpec::text("vmname", true),
            ParamSpec::text("sourcehost", true),
            ParamSpec::text("targethost", true),
            ParamSpec::text("targetdatastore", true),
            ParamSpec::text("targetpool", true),
        ],
        behavior: Behavior::Fixed {
            shape: ResultShape::Ack,
            idempotency: NonIdempotentMutate,
        },
    },
    OperationSpec {
        name: "vm.reconfigure",
        family: Family::Vm,
        summary: "Reconfigure a virtual machine from an XML description",
        script: "vm/vmreconfig.pl",
        params: &[
            ParamSpec::text("vmname", true),
            ParamSpec::text("filename", true),
            ParamSpec::text("schema", false),
        ],
        behavior: Behavior::Fixed {
            shape: ResultShape::Ack,
            idempotency: IdempotentMutate,
        },
    },
    OperationSpec {
        name: "vm.register",
        family: Family::Vm,
        summary: "Register or unregister a virtual machine",
        script: "vm/vmregister.pl",
        params: &[
            ParamSpec::choice("operation", true, &["register", "unregister"]),
            ParamSpec::text("vmname", true),
            ParamSpec::text("vmxpath", false),
            ParamSpec::text("pool", false),
            ParamSpec::text("hostname", false),
            ParamSpec::text("datacenter", false),
        ],
        behavior: Behavior::ByAction {
            field: "operation",
            actions: &[
                action(
                    "register",
                    ResultShape::Ack,
                    NonIdempotentMutate,
                    &["vmxpath", "pool", "hostname", "datacenter"],
                ),
                action("unregister", ResultShape::Ack, IdempotentMutate, &[]),
            ],
        },
    },
    OperationSpec {
        name: "vm.template",
        family: Family::Vm,
        summary: "Convert a VM to a template (T) or a template back to a VM (VM)",
        script: "vm/vmtemplate.pl",
        params: &[
            ParamSpec::text("vmname", true),
            ParamSpec::choice("operation", true, &["T", "VM"]),
            ParamSpec::text("pool", false),
            ParamSpec::text("host", false),
        ],
        behavior: Behavior::ByAction {
            field: "operation",
            actions: &[
                action("T", ResultShape::Ack, IdempotentMutate, &[]),
                action("VM", ResultShape::Ack, IdempotentMutate, &["pool", "host"]),
            ],
        },
    },
    OperationSpec {
        name: "host.info",
        family: Family::Host,
        summary: "Processor, network and memory attributes of hosts",
        script: "host/hostinfo.pl",
        params: &[ParamSpec::text("hostname", false)],
        behavior: Behavior::Fixed {
            shape: ResultShape::Hosts,
            idempotency: Read,
        },
    },
    OperationSpec {
        name: "host.ops",
        family: Family::Host,
        summary: "Host lifecycle: maintenance, power, inventory membership",
        script: "host/hostops.pl",
        params: &[
            ParamSpec::text("target_host", true),
            ParamSpec::choice("operation", true, HOST_ACTIONS),
            ParamSpec::text("folder", false),
            ParamSpec::text("cluster", false),
            ParamSpec::text("target_username", false),
            ParamSpec::secret("target_password"),
        ],
        behavior: Behavior::ByAction {
            field: "operation",
            actions: &[
                action(
                    "add_standalone",
                    ResultShape::Ack,
                    NonIdempotentMutate,
                    &["folder", "target_username", "target_password"],
                ),
                action("disconnect", ResultShape::Ack, IdempotentMutate, &[]),
                action("enter_maintenance", ResultShape::Ack, IdempotentMutate, &[]),
                action("exit_maintenance", ResultShape::Ack, IdempotentMutate, &[]),
                action("reboot", ResultShape::Ack, NonIdempotentMutate, &[]),
                action("shutdown", ResultShape::Ack, NonIdempotentMutate, &[]),
                action(
                    "addhost",
                    ResultShape::Ack,
                    NonIdempotentMutate,
                    &["cluster", "target_username", "target_password"],
                ),
                action("reconnect", ResultShape::Ack, IdempotentMutate, &[]),
                action("removehost", ResultShape::Ack, NonIdempotentMutate, &[]),
                action("moveintofolder", ResultShape::Ack, IdempotentMutate, &["folder"]),
                action("moveintocluster", ResultShape::Ack, IdempotentMutate, &["cluster"]),
            ],
        },
    },
    OperationSpec {
        name: "host.evacuate",
        family: Family::Host,
        summary: "Migrate every virtual machine off a host",
        script: "host/hostevacuate.pl",
        params: &[
            ParamSpec::text("sourcehost", true),
            ParamSpec::text("targethost", true),
            ParamSpec::text("targetdatastore", true),
            ParamSpec::text("targetpool", true),
            ParamSpec::choice("priority", false, &["default", "high", "low"]),
            ParamSpec::choice("state", false, &["poweredOn", "poweredOff", "suspended"]),
        ],
        behavior: Behavior::Fixed {
            shape: ResultShape::Ack,
            idempotency: NonIdempotentMutate,
        },
    },
    OperationSpec {
        name: "datastore.browse",
        family: Family::Datastore,
        summary: "Browse datastores and list their attributes",
        script: "host/dsbrowse.pl",
        params: &[
            ParamSpec::text("name", false),
            ParamSpec::text("filetype", false),
        ],
        behavior: Behavior::Fixed {
            shape: ResultShape::Datastores,
            idempotency: Read,
        },
    },
    OperationSpec {
        name: "general.version",
        family: Family::General,
        summary: "Name, type and version of the endpoint",
        script: "general/viversion.pl",
        params: &[ParamSpec::choice(
            "service",
            true,
            &["all", "apiinfo", "product", "version", "ostype"],
        )
        .script_flag("aboutservice")],
        behavior: Behavior::Fixed {
            shape: ResultShape::About,
            idempotency: Read,
        },
    },
    OperationSpec {
        name: "performance.query",
        family: Family::Performance,
        summary: "Performance counters of a host",
        script: "performance/viperformance.pl",
        params: &[
            ParamSpec::text("host", true),
            ParamSpec::choice("countertype", true, &["cpu", "mem", "net", "disk", "sys"]),
            ParamSpec::integer("interval"),
            ParamSpec::integer("samples"),
            ParamSpec::text("instance", false),
        ],
        behavior: Behavior::Fixed {
            shape: ResultShape::Performance,
            idempotency: Read,
        },
    },
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

lazy_static! {
    static ref BUILTIN: OperationCatalog = OperationCatalog::from_specs(OPERATIONS);
}

/// Name → spec registry.
#[derive(Debug)]
pub struct OperationCatalog {
    by_name: HashMap<&'static str, &'static OperationSpec>,
}

impl OperationCatalog {
    /// The shared, read-only catalog of built-in operations.
    pub fn builtin() -> &'static OperationCatalog {
        &BUILTIN
    }

    pub fn from_specs(specs: &'static [OperationSpec]) -> Self {
        Self {
            by_name: specs.iter().map(|s| (s.name, s)).collect(),
        }
    }

    pub fn lookup(&self, name: &str) -> VmwareResult<&'static OperationSpec> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| VmwareError::unknown_operation(name))
    }

    /// Every operation, sorted by name.
    pub fn operations(&self) -> Vec<&'static OperationSpec> {
        let mut ops: Vec<_> = self.by_name.values().copied().collect();
        ops.sort_by_key(|s| s.name);
        ops
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parameter map proven to satisfy its operation's schema.
#[derive(Debug, Clone)]
pub struct ValidatedParams {
    spec: &'static OperationSpec,
    values: BTreeMap<&'static str, String>,
    action: Option<&'static ActionSpec>,
}

impl ValidatedParams {
    pub fn spec(&self) -> &'static OperationSpec {
        self.spec
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn action(&self) -> Option<&'static str> {
        self.action.map(|a| a.value)
    }

    pub fn shape(&self) -> ResultShape {
        match (self.spec.behavior, self.action) {
            (_, Some(a)) => a.shape,
            (Behavior::Fixed { shape, .. }, None) => shape,
            // Unreachable after validation: ByAction always resolves an action.
            (Behavior::ByAction { .. }, None) => ResultShape::Ack,
        }
    }

    pub fn idempotency(&self) -> Idempotency {
        match (self.spec.behavior, self.action) {
            (_, Some(a)) => a.idempotency,
            (Behavior::Fixed { idempotency, .. }, None) => idempotency,
            (Behavior::ByAction { .. }, None) => NonIdempotentMutate,
        }
    }

    /// Values in schema declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static ParamSpec, &str)> + '_ {
        self.spec
            .params
            .iter()
            .filter_map(|p| self.values.get(p.name).map(|v| (p, v.as_str())))
    }
}

impl OperationSpec {
    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        // `params` is a 'static slice; re-borrowing through it keeps the lifetime.
        let params: &'static [ParamSpec] = self.params;
        params.iter().find(|p| p.name == name)
    }

    /// Check `params` against this operation's schema.
    ///
    /// Rules run in order: required fields present, no unknown fields,
    /// allowed-value membership (exact, case-sensitive), value types,
    /// then fields the chosen action makes mandatory.
    pub fn validate(
        &'static self,
        params: &HashMap<String, String>,
    ) -> VmwareResult<ValidatedParams> {
        let present = |name: &str| params.get(name).is_some_and(|v| !v.trim().is_empty());

        let missing: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required && !present(p.name))
            .map(|p| p.name)
            .collect();
        if !missing.is_empty() {
            return Err(VmwareError::validation(format!(
                "{}: missing required field(s): {}",
                self.name,
                missing.join(", ")
            )));
        }

        let mut unknown: Vec<&str> = params
            .keys()
            .filter(|k| self.param(k).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(VmwareError::validation(format!(
                "{}: unknown field(s): {}",
                self.name,
                unknown.join(", ")
            )));
        }

        let mut values = BTreeMap::new();
        for spec in self.params {
            let Some(value) = params.get(spec.name) else {
                continue;
            };
            if let Some(allowed) = spec.allowed {
                if !allowed.contains(&value.as_str()) {
                    return Err(VmwareError::validation(format!(
                        "{}: '{}' is not a valid {} (expected one of: {})",
                        self.name,
                        if spec.secret { "<redacted>" } else { value.as_str() },
                        spec.name,
                        allowed.join(", ")
                    )));
                }
            }
            check_kind(self.name, spec, value)?;
            values.insert(spec.name, value.clone());
        }

        let action = match self.behavior {
            Behavior::Fixed { .. } => None,
            Behavior::ByAction { field, actions } => {
                let chosen = values.get(field).map(String::as_str).unwrap_or_default();
                let found = actions.iter().find(|a| a.value == chosen).ok_or_else(|| {
                    VmwareError::validation(format!(
                        "{}: no action '{chosen}' for field {field}",
                        self.name
                    ))
                })?;
                let missing: Vec<&str> = found
                    .requires
                    .iter()
                    .copied()
                    .filter(|name| !present(name))
                    .collect();
                if !missing.is_empty() {
                    return Err(VmwareError::validation(format!(
                        "{}: action '{}' requires field(s): {}",
                        self.name,
                        found.value,
                        missing.join(", ")
                    )));
                }
                Some(found)
            }
        };

        Ok(ValidatedParams {
            spec: self,
            values,
            action,
        })
    }
}

fn check_kind(op: &str, spec: &ParamSpec, value: &str) -> VmwareResult<()> {
    let ok = match spec.kind {
        ParamKind::Text => true,
        ParamKind::Integer => !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()),
        ParamKind::Flag => matches!(value, "true" | "false"),
    };
    if ok {
        Ok(())
    } else {
        Err(VmwareError::validation(format!(
            "{op}: field {} expects {:?}, got '{value}'",
            spec.name, spec.kind
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn catalog() -> &'static OperationCatalog {
        OperationCatalog::builtin()
    }

    #[test]
    fn builtin_covers_every_family() {
        let names: Vec<&str> = catalog().operations().iter().map(|s| s.name).collect();
        for expected in [
            "vm.info",
            "vm.guest",
            "vm.shares",
            "vm.snapshot",
            "vm.disk_add",
            "vm.clone",
            "vm.power",
            "vm.create",
            "vm.migrate",
            "vm.reconfigure",
            "vm.register",
            "vm.template",
            "host.info",
            "host.ops",
            "host.evacuate",
            "datastore.browse",
            "general.version",
            "performance.query",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert_eq!(catalog().len(), OPERATIONS.len());
    }

    #[test]
    fn action_tables_match_allowed_sets() {
        for spec in catalog().operations() {
            if let Behavior::ByAction { field, actions } = spec.behavior {
                let param = spec.param(field).expect("action field declared");
                let allowed = param.allowed.expect("action field has allowed set");
                assert_eq!(allowed.len(), actions.len(), "{}", spec.name);
                for a in actions {
                    assert!(allowed.contains(&a.value), "{} / {}", spec.name, a.value);
                    for r in a.requires {
                        assert!(spec.param(r).is_some(), "{} requires unknown {r}", spec.name);
                    }
                }
            }
        }
    }

    #[test]
    fn lookup_unknown_operation() {
        let err = catalog().lookup("vm.teleport").unwrap_err();
        assert_eq!(err.kind, crate::error::VmwareErrorKind::UnknownOperation);
    }

    #[test]
    fn missing_required_reported_before_unknown() {
        let spec = catalog().lookup("vm.power").unwrap();
        let err = spec
            .validate(&params(&[("vmnmae", "web01"), ("operation", "poweron")]))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.message.contains("missing required field(s): vmname"));
    }

    #[test]
    fn unknown_fields_rejected() {
        let spec = catalog().lookup("vm.info").unwrap();
        let err = spec
            .validate(&params(&[("vmname", "web01"), ("colour", "blue")]))
            .unwrap_err();
        assert!(err.message.contains("unknown field(s): colour"));
    }

    #[test]
    fn allowed_values_are_case_sensitive() {
        let spec = catalog().lookup("vm.power").unwrap();
        let err = spec
            .validate(&params(&[("vmname", "web01"), ("operation", "PowerOn")]))
            .unwrap_err();
        assert!(err.message.contains("'PowerOn' is not a valid operation"));

        let spec = catalog().lookup("vm.template").unwrap();
        assert!(spec
            .validate(&params(&[("vmname", "tpl"), ("operation", "t")]))
            .is_err());
    }

    #[test]
    fn blank_required_value_counts_as_missing() {
        let spec = catalog().lookup("vm.info").unwrap();
        assert!(spec.validate(&params(&[("vmname", "  ")])).is_err());
    }

    #[test]
    fn integer_and_flag_types_checked() {
        let spec = catalog().lookup("performance.query").unwrap();
        let err = spec
            .validate(&params(&[
                ("host", "esx01"),
                ("countertype", "cpu"),
                ("samples", "ten"),
            ]))
            .unwrap_err();
        assert!(err.message.contains("samples"));

        let spec = catalog().lookup("vm.snapshot").unwrap();
        assert!(spec
            .validate(&params(&[
                ("operation", "remove"),
                ("snapshotname", "s1"),
                ("children", "yes"),
            ]))
            .is_err());
    }

    #[test]
    fn action_specific_requirements() {
        let spec = catalog().lookup("vm.snapshot").unwrap();
        let err = spec
            .validate(&params(&[
                ("vmname", "web01"),
                ("operation", "rename"),
                ("snapshotname", "before-patch"),
            ]))
            .unwrap_err();
        assert!(err.message.contains("requires field(s): newname"));

        let ok = spec
            .validate(&params(&[("vmname", "web01"), ("operation", "list")]))
            .unwrap();
        assert_eq!(ok.shape(), ResultShape::Snapshots);
        assert_eq!(ok.idempotency(), Idempotency::Read);
    }

    #[test]
    fn action_drives_shape_and_idempotency() {
        let spec = catalog().lookup("host.ops").unwrap();
        let v = spec
            .validate(&params(&[
                ("target_host", "esx02"),
                ("operation", "enter_maintenance"),
            ]))
            .unwrap();
        assert_eq!(v.idempotency(), Idempotency::IdempotentMutate);
        assert_eq!(v.action(), Some("enter_maintenance"));

        let v = spec
            .validate(&params(&[("target_host", "esx02"), ("operation", "reboot")]))
            .unwrap();
        assert_eq!(v.idempotency(), Idempotency::NonIdempotentMutate);
        assert_eq!(v.shape(), ResultShape::Ack);
    }

    #[test]
    fn power_operation_becomes_action() {
        let spec = catalog().lookup("vm.power").unwrap();
        for op in POWER_ACTIONS {
            let v = spec
                .validate(&params(&[("vmname", "web01"), ("operation", op)]))
                .unwrap();
            assert_eq!(v.action(), Some(*op));
            assert_eq!(v.shape(), ResultShape::Ack);
            assert_eq!(v.idempotency(), Idempotency::NonIdempotentMutate);
        }
    }

    #[test]
    fn secret_values_not_echoed() {
        let spec = catalog().lookup("host.ops").unwrap();
        // Secret fields carry no allowed set, so exercise redaction by
        // checking the schema flag used by renderers and logs.
        assert!(spec.param("target_password").unwrap().secret);
        assert!(!spec.param("target_username").unwrap().secret);
    }

    #[test]
    fn script_flag_override() {
        let spec = catalog().lookup("general.version").unwrap();
        assert_eq!(spec.param("service").unwrap().cli_flag(), "aboutservice");
        assert_eq!(
            catalog().lookup("vm.info").unwrap().param("vmname").unwrap().cli_flag(),
            "vmname"
        );
    }

    #[test]
    fn validated_iter_follows_schema_order() {
        let spec = catalog().lookup("vm.migrate").unwrap();
        let v = spec
            .validate(&params(&[
                ("targetpool", "pool-b"),
                ("vmname", "db01"),
                ("targetdatastore", "ds2"),
                ("sourcehost", "esx01"),
                ("targethost", "esx02"),
            ]))
            .unwrap();
        let order: Vec<&str> = v.iter().map(|(p, _)| p.name).collect();
        assert_eq!(
            order,
            ["vmname", "sourcehost", "targethost", "targetdatastore", "targetpool"]
        );
    }
}
