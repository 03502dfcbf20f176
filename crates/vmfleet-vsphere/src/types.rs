//! Shared types for the vSphere fleet client: typed result records and
//! the action enums used by the strongly-typed client methods.

use serde::{Deserialize, Serialize};

use crate::error::{VmwareError, VmwareResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Power / connection states
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VmPowerState {
    #[serde(alias = "poweredOn")]
    PoweredOn,
    #[serde(alias = "poweredOff")]
    PoweredOff,
    #[serde(alias = "suspended")]
    Suspended,
    #[default]
    #[serde(other)]
    Unknown,
}

impl VmPowerState {
    /// Accepts both the REST spelling (`POWERED_ON`) and the SDK
    /// spelling (`poweredOn`).
    pub fn from_text(s: &str) -> Self {
        let folded: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "poweredon" => Self::PoweredOn,
            "poweredoff" => Self::PoweredOff,
            "suspended" => Self::Suspended,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostConnectionState {
    #[serde(alias = "connected")]
    Connected,
    #[serde(alias = "disconnected")]
    Disconnected,
    #[serde(alias = "notResponding")]
    NotResponding,
    #[default]
    #[serde(other)]
    Unknown,
}

impl HostConnectionState {
    pub fn from_text(s: &str) -> Self {
        let folded: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            "notresponding" => Self::NotResponding,
            _ => Self::Unknown,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Result records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One virtual machine, from an info or guest query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VmRecord {
    /// Managed-object id (e.g. "vm-42"); only the REST API reports it.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub power_state: VmPowerState,
    #[serde(default)]
    pub cpu_count: Option<u32>,
    #[serde(default)]
    pub memory_size_mib: Option<u64>,
    #[serde(default)]
    pub guest_os: Option<String>,
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub tools_status: Option<String>,
    /// Datastore path of the .vmx file.
    #[serde(default)]
    pub vmx_path: Option<String>,
}

/// One ESXi host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub connection_state: HostConnectionState,
    #[serde(default)]
    pub power_state: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cpu_model: Option<String>,
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    #[serde(default)]
    pub memory_mib: Option<u64>,
    #[serde(default)]
    pub in_maintenance: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub ds_type: Option<String>,
    #[serde(default)]
    pub capacity: Option<u64>,
    #[serde(default)]
    pub free_space: Option<u64>,
    #[serde(default)]
    pub accessible: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub state: Option<VmPowerState>,
    #[serde(default)]
    pub parent: Option<String>,
}

/// One sample of a host performance counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    pub counter: String,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    pub value: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// CPU / memory / disk share levels of a VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    pub vm: String,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub disk: Option<String>,
}

/// Product / API information about the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AboutRecord {
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub os_type: Option<String>,
}

/// Acknowledgement of a mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperationAck {
    pub operation: String,
    #[serde(default)]
    pub action: Option<String>,
    /// Whatever the endpoint returned (new object id, task message).
    #[serde(default)]
    pub detail: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Typed result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tag naming the record type an operation produces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ResultShape {
    Vms,
    Hosts,
    Datastores,
    Snapshots,
    Performance,
    Shares,
    About,
    Ack,
}

impl ResultShape {
    /// Query shapes may legitimately come back empty.
    pub fn is_collection(&self) -> bool {
        !matches!(self, Self::About | Self::Ack)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "shape", content = "data", rename_all = "camelCase")]
pub enum TypedResult {
    Vms(Vec<VmRecord>),
    Hosts(Vec<HostRecord>),
    Datastores(Vec<DatastoreRecord>),
    Snapshots(Vec<SnapshotRecord>),
    Performance(Vec<PerformanceSample>),
    Shares(Vec<ShareRecord>),
    About(AboutRecord),
    Ack(OperationAck),
}

impl TypedResult {
    pub fn shape(&self) -> ResultShape {
        match self {
            Self::Vms(_) => ResultShape::Vms,
            Self::Hosts(_) => ResultShape::Hosts,
            Self::Datastores(_) => ResultShape::Datastores,
            Self::Snapshots(_) => ResultShape::Snapshots,
            Self::Performance(_) => ResultShape::Performance,
            Self::Shares(_) => ResultShape::Shares,
            Self::About(_) => ResultShape::About,
            Self::Ack(_) => ResultShape::Ack,
        }
    }

    fn mismatch(self, wanted: ResultShape) -> VmwareError {
        VmwareError::parse(format!(
            "Expected a {wanted:?} result, got {:?}",
            self.shape()
        ))
    }

    pub fn into_vms(self) -> VmwareResult<Vec<VmRecord>> {
        match self {
            Self::Vms(v) => Ok(v),
            other => Err(other.mismatch(ResultShape::Vms)),
        }
    }

    pub fn into_hosts(self) -> VmwareResult<Vec<HostRecord>> {
        match self {
            Self::Hosts(v) => Ok(v),
            other => Err(other.mismatch(ResultShape::Hosts)),
        }
    }

    pub fn into_datastores(self) -> VmwareResult<Vec<DatastoreRecord>> {
        match self {
            Self::Datastores(v) => Ok(v),
            other => Err(other.mismatch(ResultShape::Datastores)),
        }
    }

    pub fn into_snapshots(self) -> VmwareResult<Vec<SnapshotRecord>> {
        match self {
            Self::Snapshots(v) => Ok(v),
            other => Err(other.mismatch(ResultShape::Snapshots)),
        }
    }

    pub fn into_performance(self) -> VmwareResult<Vec<PerformanceSample>> {
        match self {
            Self::Performance(v) => Ok(v),
            other => Err(other.mismatch(ResultShape::Performance)),
        }
    }

    pub fn into_shares(self) -> VmwareResult<Vec<ShareRecord>> {
        match self {
            Self::Shares(v) => Ok(v),
            other => Err(other.mismatch(ResultShape::Shares)),
        }
    }

    pub fn into_about(self) -> VmwareResult<AboutRecord> {
        match self {
            Self::About(v) => Ok(v),
            other => Err(other.mismatch(ResultShape::About)),
        }
    }

    pub fn into_ack(self) -> VmwareResult<OperationAck> {
        match self {
            Self::Ack(v) => Ok(v),
            other => Err(other.mismatch(ResultShape::Ack)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Action enums (typed client surface)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// VM power control actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    PowerOn,
    PowerOff,
    Suspend,
    Reboot,
    Reset,
    Shutdown,
    Standby,
}

impl PowerAction {
    /// Value expected by the catalog's `operation` field.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::PowerOn => "poweron",
            Self::PowerOff => "poweroff",
            Self::Suspend => "suspend",
            Self::Reboot => "reboot",
            Self::Reset => "reset",
            Self::Shutdown => "shutdown",
            Self::Standby => "standby",
        }
    }
}

/// Snapshot management actions. The names a snapshot action needs are
/// carried by the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotAction {
    Revert { snapshot: String },
    Goto { snapshot: String },
    Rename { snapshot: String, new_name: String },
    Remove { snapshot: String, children: bool },
    RemoveAll,
    Create { snapshot: String },
}

impl SnapshotAction {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::Revert { .. } => "revert",
            Self::Goto { .. } => "goto",
            Self::Rename { .. } => "rename",
            Self::Remove { .. } => "remove",
            Self::RemoveAll => "removeall",
            Self::Create { .. } => "create",
        }
    }
}

/// Host lifecycle actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostAction {
    AddStandalone,
    AddHost,
    Disconnect,
    Reconnect,
    RemoveHost,
    EnterMaintenance,
    ExitMaintenance,
    Reboot,
    Shutdown,
    MoveIntoFolder,
    MoveIntoCluster,
}

impl HostAction {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::AddStandalone => "add_standalone",
            Self::AddHost => "addhost",
            Self::Disconnect => "disconnect",
            Self::Reconnect => "reconnect",
            Self::RemoveHost => "removehost",
            Self::EnterMaintenance => "enter_maintenance",
            Self::ExitMaintenance => "exit_maintenance",
            Self::Reboot => "reboot",
            Self::Shutdown => "shutdown",
            Self::MoveIntoFolder => "moveintofolder",
            Self::MoveIntoCluster => "moveintocluster",
        }
    }
}

/// Which part of the "about" information to fetch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AboutService {
    #[default]
    All,
    ApiInfo,
    Product,
    Version,
    OsType,
}

impl AboutService {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::ApiInfo => "apiinfo",
            Self::Product => "product",
            Self::Version => "version",
            Self::OsType => "ostype",
        }
    }
}

/// Performance counter groups.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CounterType {
    Cpu,
    Mem,
    Net,
    Disk,
    Sys,
}

impl CounterType {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Mem => "mem",
            Self::Net => "net",
            Self::Disk => "disk",
            Self::Sys => "sys",
        }
    }
}

/// Share allocation level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShareLevel {
    Low,
    Normal,
    High,
}

impl ShareLevel {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// Migration priority for a host evacuation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvacuatePriority {
    #[default]
    Default,
    High,
    Low,
}

impl EvacuatePriority {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

/// Where a registered VM is placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VmPlacement {
    pub vmx_path: String,
    pub pool: String,
    pub host: String,
    pub datacenter: String,
}

/// Extra inputs some host actions need. Unused fields are left out of the
/// request.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostOpOptions {
    pub folder: Option<String>,
    pub cluster: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl std::fmt::Debug for HostOpOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostOpOptions")
            .field("folder", &self.folder)
            .field("cluster", &self.cluster)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Optional knobs of a performance query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceQuery {
    /// Sampling interval in seconds.
    pub interval: Option<u32>,
    pub samples: Option<u32>,
    pub instance: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_options_debug_hides_password() {
        let o = HostOpOptions {
            username: Some("root".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let s = format!("{o:?}");
        assert!(s.contains("root"));
        assert!(!s.contains("hunter2"));
        assert!(!serde_json::to_string(&o).unwrap().contains("hunter2"));
    }

    #[test]
    fn power_state_accepts_both_spellings() {
        assert_eq!(VmPowerState::from_text("poweredOn"), VmPowerState::PoweredOn);
        assert_eq!(VmPowerState::from_text("POWERED_OFF"), VmPowerState::PoweredOff);
        assert_eq!(VmPowerState::from_text("halted"), VmPowerState::Unknown);

        let s: VmPowerState = serde_json::from_str("\"SUSPENDED\"").unwrap();
        assert_eq!(s, VmPowerState::Suspended);
        let s: VmPowerState = serde_json::from_str("\"poweredOn\"").unwrap();
        assert_eq!(s, VmPowerState::PoweredOn);
    }

    #[test]
    fn typed_result_accessors_reject_other_shapes() {
        let r = TypedResult::Snapshots(Vec::new());
        assert_eq!(r.shape(), ResultShape::Snapshots);
        assert!(r.clone().into_snapshots().unwrap().is_empty());
        assert!(r.into_vms().unwrap_err().is_parse());
    }

    #[test]
    fn typed_result_serialises_with_shape_tag() {
        let r = TypedResult::Ack(OperationAck {
            operation: "vm.power".into(),
            action: Some("poweron".into()),
            detail: None,
        });
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["shape"], "ack");
        assert_eq!(v["data"]["action"], "poweron");
    }

    #[test]
    fn collection_shapes() {
        assert!(ResultShape::Snapshots.is_collection());
        assert!(!ResultShape::Ack.is_collection());
        assert!(!ResultShape::About.is_collection());
    }
}
