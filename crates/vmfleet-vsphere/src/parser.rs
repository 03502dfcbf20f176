//! Result parser: raw transport output → [`TypedResult`].
//!
//! Two grammars, chosen by [`RawResult::format`]:
//!
//! * **Json**: vSphere Automation REST bodies. Empty body or `null` is an
//!   empty list, a bare object is a one-item list, and a legacy
//!   `{"value": …}` envelope is unwrapped.
//! * **KeyValue**: SDK script text. A record is a run of `Key: value`
//!   lines. A blank line or a line without a colon closes the current
//!   record, and so does a key repeating inside the record. Keys are
//!   folded to lowercase snake_case before alias lookup.
//!
//! A failed execution is never turned into an empty result: it becomes a
//! parse error carrying the raw diagnostic.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{VmwareError, VmwareResult};
use crate::request::Request;
use crate::transport::{OutputFormat, RawResult};
use crate::types::{
    AboutRecord, DatastoreRecord, HostConnectionState, HostRecord, OperationAck,
    PerformanceSample, ResultShape, ShareRecord, SnapshotRecord, TypedResult, VmPowerState,
    VmRecord,
};

/// Parse `raw` as the result of `request`, filling in the ack fields.
pub fn parse_response(request: &Request, raw: &RawResult) -> VmwareResult<TypedResult> {
    let mut result = parse(request.shape(), raw).map_err(|e| VmwareError {
        message: format!("{}: {}", request.operation(), e.message),
        ..e
    })?;
    if let TypedResult::Ack(ref mut ack) = result {
        ack.operation = request.operation().to_string();
        ack.action = request.action().map(str::to_string);
    }
    Ok(result)
}

pub fn parse(shape: ResultShape, raw: &RawResult) -> VmwareResult<TypedResult> {
    if !raw.is_success() {
        let code = raw
            .exit_status
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".into());
        let e = VmwareError::parse(format!("execution failed with status {code}"));
        let diagnostic = raw.diagnostic();
        return Err(if diagnostic.is_empty() {
            e
        } else {
            e.with_diagnostic(diagnostic)
        });
    }

    match raw.format {
        OutputFormat::Json => parse_json(shape, &raw.stdout),
        OutputFormat::KeyValue => parse_key_value(shape, &raw.stdout),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  JSON
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_json(shape: ResultShape, body: &str) -> VmwareResult<TypedResult> {
    let trimmed = body.trim();
    let value: serde_json::Value = if trimmed.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(trimmed).map_err(|e| {
            VmwareError::parse(format!("invalid JSON: {e}"))
                .with_diagnostic(trimmed.chars().take(500).collect::<String>())
        })?
    };
    let value = unwrap_envelope(value);

    Ok(match shape {
        ResultShape::Vms => TypedResult::Vms(
            json_list::<WireVm>(value)?
                .into_iter()
                .map(Into::into)
                .collect(),
        ),
        ResultShape::Hosts => TypedResult::Hosts(
            json_list::<WireHost>(value)?
                .into_iter()
                .map(Into::into)
                .collect(),
        ),
        ResultShape::Datastores => TypedResult::Datastores(
            json_list::<WireDatastore>(value)?
                .into_iter()
                .map(Into::into)
                .collect(),
        ),
        ResultShape::Snapshots => TypedResult::Snapshots(
            json_list::<WireSnapshot>(value)?
                .into_iter()
                .map(Into::into)
                .collect(),
        ),
        ResultShape::Performance => TypedResult::Performance(
            json_list::<WireSample>(value)?
                .into_iter()
                .map(Into::into)
                .collect(),
        ),
        ResultShape::Shares => TypedResult::Shares(
            json_list::<WireShares>(value)?
                .into_iter()
                .map(Into::into)
                .collect(),
        ),
        ResultShape::About => {
            if value.is_null() {
                return Err(VmwareError::parse("empty version response"));
            }
            let wire: WireAbout = serde_json::from_value(value)
                .map_err(|e| VmwareError::parse(format!("unexpected version shape: {e}")))?;
            TypedResult::About(wire.into())
        }
        ResultShape::Ack => TypedResult::Ack(OperationAck {
            detail: ack_detail(&value),
            ..OperationAck::default()
        }),
    })
}

fn unwrap_envelope(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map) if map.len() == 1 && map.contains_key("value") => {
            map.remove("value").unwrap_or(serde_json::Value::Null)
        }
        other => other,
    }
}

fn json_list<T: DeserializeOwned>(value: serde_json::Value) -> VmwareResult<Vec<T>> {
    match value {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Array(_) => serde_json::from_value(value)
            .map_err(|e| VmwareError::parse(format!("unexpected record shape: {e}"))),
        serde_json::Value::Object(_) => serde_json::from_value(value)
            .map(|one| vec![one])
            .map_err(|e| VmwareError::parse(format!("unexpected record shape: {e}"))),
        other => Err(VmwareError::parse(format!(
            "expected a JSON list or object, got {other}"
        ))),
    }
}

fn ack_detail(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Deserialize)]
struct WireVm {
    #[serde(default)]
    vm: Option<String>,
    name: String,
    #[serde(default)]
    power_state: Option<String>,
    #[serde(default)]
    cpu_count: Option<u32>,
    #[serde(default, alias = "memory_size_MiB")]
    memory_size_mib: Option<u64>,
    #[serde(default, alias = "guest_OS")]
    guest_os: Option<String>,
    #[serde(default)]
    host_name: Option<String>,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    tools_status: Option<String>,
    #[serde(default)]
    vmx_path: Option<String>,
}

impl From<WireVm> for VmRecord {
    fn from(w: WireVm) -> Self {
        Self {
            id: w.vm,
            name: w.name,
            power_state: w
                .power_state
                .as_deref()
                .map(VmPowerState::from_text)
                .unwrap_or_default(),
            cpu_count: w.cpu_count,
            memory_size_mib: w.memory_size_mib,
            guest_os: w.guest_os,
            host_name: w.host_name,
            ip_address: w.ip_address,
            tools_status: w.tools_status,
            vmx_path: w.vmx_path,
        }
    }
}

#[derive(Deserialize)]
struct WireHost {
    #[serde(default)]
    host: Option<String>,
    name: String,
    #[serde(default)]
    connection_state: Option<String>,
    #[serde(default)]
    power_state: Option<String>,
}

impl From<WireHost> for HostRecord {
    fn from(w: WireHost) -> Self {
        Self {
            id: w.host,
            name: w.name,
            connection_state: w
                .connection_state
                .as_deref()
                .map(HostConnectionState::from_text)
                .unwrap_or_default(),
            power_state: w.power_state,
            ..Self::default()
        }
    }
}

#[derive(Deserialize)]
struct WireDatastore {
    #[serde(default)]
    datastore: Option<String>,
    name: String,
    #[serde(default, rename = "type")]
    ds_type: Option<String>,
    #[serde(default)]
    capacity: Option<u64>,
    #[serde(default)]
    free_space: Option<u64>,
    #[serde(default)]
    accessible: Option<bool>,
}

impl From<WireDatastore> for DatastoreRecord {
    fn from(w: WireDatastore) -> Self {
        Self {
            id: w.datastore,
            name: w.name,
            ds_type: w.ds_type,
            capacity: w.capacity,
            free_space: w.free_space,
            accessible: w.accessible,
        }
    }
}

#[derive(Deserialize)]
struct WireSnapshot {
    #[serde(default)]
    snapshot: Option<String>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "create_time")]
    creation_time: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    parent: Option<String>,
}

impl From<WireSnapshot> for SnapshotRecord {
    fn from(w: WireSnapshot) -> Self {
        Self {
            id: w.snapshot,
            name: w.name,
            description: w.description,
            created: w.creation_time,
            state: w.state.as_deref().map(VmPowerState::from_text),
            parent: w.parent,
        }
    }
}

#[derive(Deserialize)]
struct WireSample {
    counter: String,
    #[serde(default)]
    instance: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    value: f64,
    #[serde(default)]
    timestamp: Option<String>,
}

impl From<WireSample> for PerformanceSample {
    fn from(w: WireSample) -> Self {
        Self {
            counter: w.counter,
            instance: w.instance,
            unit: w.unit,
            value: w.value,
            timestamp: w.timestamp,
        }
    }
}

#[derive(Deserialize)]
struct WireShares {
    vm: String,
    #[serde(default)]
    cpu: Option<String>,
    #[serde(default)]
    memory: Option<String>,
    #[serde(default)]
    disk: Option<String>,
}

impl From<WireShares> for ShareRecord {
    fn from(w: WireShares) -> Self {
        Self {
            vm: w.vm,
            cpu: w.cpu,
            memory: w.memory,
            disk: w.disk,
        }
    }
}

#[derive(Deserialize)]
struct WireAbout {
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    build: Option<String>,
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default, rename = "type")]
    os_type: Option<String>,
}

impl From<WireAbout> for AboutRecord {
    fn from(w: WireAbout) -> Self {
        Self {
            product: w.product,
            version: w.version,
            build: w.build,
            api_version: w.api_version,
            os_type: w.os_type,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Key/value text
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Fields = BTreeMap<String, String>;

/// Lowercase snake_case with punctuation dropped: "Power State" and
/// "powerState" both become "power_state".
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut prev_lower = false;
    for c in key.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c.to_ascii_lowercase());
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Keys that name a record. Seeing one again starts the next record.
const RECORD_KEYS: &[&str] = &[
    "name",
    "vm",
    "vm_name",
    "vmname",
    "virtual_machine",
    "host_name",
    "hostname",
    "datastore_name",
    "snapshot_name",
    "counter",
    "counter_name",
];

/// Split text into records of normalized key → value.
///
/// A record ends at a blank or key-less line, or when one of
/// [`RECORD_KEYS`] repeats. Any other repeated key (several NIC or
/// datastore lines, say) stays in the current record and keeps its
/// first value.
pub fn key_value_records(text: &str) -> Vec<Fields> {
    let mut records = Vec::new();
    let mut current = Fields::new();
    for line in text.lines() {
        let parsed = line
            .split_once(':')
            .map(|(k, v)| (normalize_key(k), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty());
        match parsed {
            Some((key, value)) => {
                if current.contains_key(&key) {
                    if !RECORD_KEYS.contains(&key.as_str()) {
                        continue;
                    }
                    records.push(std::mem::take(&mut current));
                }
                current.insert(key, value);
            }
            None => {
                if !current.is_empty() {
                    records.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

fn pick<'a>(fields: &'a Fields, aliases: &[&str]) -> Option<&'a str> {
    aliases
        .iter()
        .find_map(|a| fields.get(*a))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn pick_owned(fields: &Fields, aliases: &[&str]) -> Option<String> {
    pick(fields, aliases).map(str::to_string)
}

fn identity(fields: &Fields, aliases: &[&str], what: &str) -> VmwareResult<String> {
    pick_owned(fields, aliases).ok_or_else(|| {
        VmwareError::parse(format!("{what} record without a {} field", aliases[0])).with_diagnostic(
            fields
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })
}

/// Leading integer of values like "4096 MB" or "2".
fn leading_number<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    let v = value?.trim();
    let end = v.find(|c: char| !c.is_ascii_digit()).unwrap_or(v.len());
    v[..end].parse().ok()
}

fn yes_no(value: Option<&str>) -> Option<bool> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_key_value(shape: ResultShape, text: &str) -> VmwareResult<TypedResult> {
    let records = key_value_records(text);
    Ok(match shape {
        ResultShape::Vms => TypedResult::Vms(
            records
                .iter()
                .map(kv_vm)
                .collect::<VmwareResult<Vec<_>>>()?,
        ),
        ResultShape::Hosts => TypedResult::Hosts(
            records
                .iter()
                .map(kv_host)
                .collect::<VmwareResult<Vec<_>>>()?,
        ),
        ResultShape::Datastores => TypedResult::Datastores(
            records
                .iter()
                .map(kv_datastore)
                .collect::<VmwareResult<Vec<_>>>()?,
        ),
        ResultShape::Snapshots => TypedResult::Snapshots(
            records
                .iter()
                .map(kv_snapshot)
                .collect::<VmwareResult<Vec<_>>>()?,
        ),
        ResultShape::Performance => TypedResult::Performance(
            records
                .iter()
                .map(kv_sample)
                .collect::<VmwareResult<Vec<_>>>()?,
        ),
        ResultShape::Shares => TypedResult::Shares(
            records
                .iter()
                .map(kv_shares)
                .collect::<VmwareResult<Vec<_>>>()?,
        ),
        ResultShape::About => {
            let merged: Fields = records.into_iter().flatten().collect();
            if merged.is_empty() {
                return Err(VmwareError::parse("empty version output"));
            }
            TypedResult::About(AboutRecord {
                product: pick_owned(&merged, &["product", "product_name", "full_name", "name"]),
                version: pick_owned(&merged, &["version", "product_version"]),
                build: pick_owned(&merged, &["build", "build_number"]),
                api_version: pick_owned(&merged, &["api_version", "api_info"]),
                os_type: pick_owned(&merged, &["os_type", "operating_system"]),
            })
        }
        ResultShape::Ack => {
            let detail = text.trim();
            TypedResult::Ack(OperationAck {
                detail: (!detail.is_empty()).then(|| detail.to_string()),
                ..OperationAck::default()
            })
        }
    })
}

fn kv_vm(f: &Fields) -> VmwareResult<VmRecord> {
    Ok(VmRecord {
        id: None,
        name: identity(f, &["name", "vm_name", "vmname", "virtual_machine"], "VM")?,
        power_state: pick(f, &["power_state", "powerstate", "state"])
            .map(VmPowerState::from_text)
            .unwrap_or_default(),
        cpu_count: leading_number(pick(f, &["cpu_count", "num_cpu", "no_of_cpu_s", "no_of_cpus", "cpus"])),
        memory_size_mib: leading_number(pick(
            f,
            &["memory_size_mib", "memory", "memory_mb", "memory_size"],
        )),
        guest_os: pick_owned(f, &["guest_os", "guest_full_name", "guest_os_name"]),
        host_name: pick_owned(f, &["host", "host_name"]),
        ip_address: pick_owned(f, &["ip_address", "ipaddress", "ip"]),
        tools_status: pick_owned(f, &["tools_status", "vmware_tools_status", "tools"]),
        vmx_path: pick_owned(f, &["vmx_path", "vm_path_name", "path"]),
    })
}

fn kv_host(f: &Fields) -> VmwareResult<HostRecord> {
    Ok(HostRecord {
        id: None,
        name: identity(f, &["name", "host_name", "hostname", "host"], "host")?,
        connection_state: pick(f, &["connection_state", "connectionstate"])
            .map(HostConnectionState::from_text)
            .unwrap_or_default(),
        power_state: pick_owned(f, &["power_state", "powerstate"]),
        vendor: pick_owned(f, &["vendor"]),
        model: pick_owned(f, &["model"]),
        cpu_model: pick_owned(f, &["cpu_model", "processor", "processor_type"]),
        cpu_cores: leading_number(pick(f, &["cpu_cores", "num_cpu_cores", "cores"])),
        memory_mib: leading_number(pick(f, &["memory_mib", "memory", "memory_size"])),
        in_maintenance: yes_no(pick(f, &["in_maintenance", "maintenance_mode"])),
    })
}

fn kv_datastore(f: &Fields) -> VmwareResult<DatastoreRecord> {
    Ok(DatastoreRecord {
        id: None,
        name: identity(f, &["name", "datastore", "datastore_name"], "datastore")?,
        ds_type: pick_owned(f, &["type", "ds_type", "file_system"]),
        capacity: leading_number(pick(f, &["capacity", "maximum_capacity"])),
        free_space: leading_number(pick(f, &["free_space", "available_space", "freespace"])),
        accessible: yes_no(pick(f, &["accessible"])),
    })
}

fn kv_snapshot(f: &Fields) -> VmwareResult<SnapshotRecord> {
    Ok(SnapshotRecord {
        id: None,
        name: identity(f, &["name", "snapshot_name", "snapshot"], "snapshot")?,
        description: pick_owned(f, &["description"]),
        created: pick_owned(f, &["created", "creation_time", "create_time"]),
        state: pick(f, &["state", "power_state"]).map(VmPowerState::from_text),
        parent: pick_owned(f, &["parent", "parent_snapshot"]),
    })
}

fn kv_sample(f: &Fields) -> VmwareResult<PerformanceSample> {
    let counter = identity(f, &["counter", "counter_name"], "performance")?;
    let raw = pick(f, &["value", "sample", "last_value"])
        .ok_or_else(|| VmwareError::parse(format!("counter {counter} has no value")))?;
    let value = raw.split_whitespace().next().unwrap_or(raw);
    let value: f64 = value.parse().map_err(|_| {
        VmwareError::parse(format!("counter {counter} has a non-numeric value '{raw}'"))
    })?;
    Ok(PerformanceSample {
        counter,
        instance: pick_owned(f, &["instance"]),
        unit: pick_owned(f, &["unit", "units"]),
        value,
        timestamp: pick_owned(f, &["timestamp", "time"]),
    })
}

fn kv_shares(f: &Fields) -> VmwareResult<ShareRecord> {
    Ok(ShareRecord {
        vm: identity(f, &["vm", "vmname", "vm_name", "name"], "shares")?,
        cpu: pick_owned(f, &["cpu", "cpu_shares"]),
        memory: pick_owned(f, &["memory", "memory_shares", "mem"]),
        disk: pick_owned(f, &["disk", "disk_shares"]),
    })
}
