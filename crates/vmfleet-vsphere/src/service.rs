//! Client façade for the vSphere fleet crate.
//!
//! `VmwareClient` owns the session manager, the transport and the retry
//! policy, and runs every call through the same pipeline: catalog
//! validation, credential, request build, bounded execution under the
//! retry policy, then parsing into a typed result. Calls take `&self`, so
//! one client can be shared behind an `Arc` by any number of tasks.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::catalog::OperationCatalog;
use crate::config::{ClientConfig, ClientConfigSafe, TransportKind};
use crate::error::{VmwareError, VmwareResult};
use crate::parser;
use crate::request::Request;
use crate::retry::{Decision, RetryPolicy};
use crate::sdk::{ScriptRunner, SdkAuthenticator, SdkTransport};
use crate::session::{Authenticator, SessionManager};
use crate::transport::{RawResult, Transport, TransportError};
use crate::types::*;
use crate::vsphere::{RestAuthenticator, RestTransport, VsphereHttp};

/// Shared handle to a client.
pub type VmwareClientHandle = Arc<VmwareClient>;

pub struct VmwareClient {
    config: ClientConfig,
    catalog: &'static OperationCatalog,
    session: SessionManager,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    permits: Semaphore,
    timeout: Duration,
}

impl VmwareClient {
    /// Assemble a client from explicit seams. No I/O happens until the
    /// first call (or [`connect`](Self::connect)).
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        authenticator: Arc<dyn Authenticator>,
    ) -> VmwareResult<Self> {
        config.validate()?;
        let session = SessionManager::new(&config, authenticator);
        Ok(Self {
            catalog: OperationCatalog::builtin(),
            retry: RetryPolicy::from_config(&config),
            permits: Semaphore::new(config.max_concurrent),
            timeout: config.timeout(),
            session,
            transport,
            config,
        })
    }

    /// Build the transport and authenticator named by `config.transport`.
    pub fn from_config(config: ClientConfig) -> VmwareResult<Self> {
        config.validate()?;
        let (transport, authenticator): (Arc<dyn Transport>, Arc<dyn Authenticator>) =
            match &config.transport {
                TransportKind::Rest => {
                    let http = VsphereHttp::new(&config)?;
                    (
                        Arc::new(RestTransport::new(http.clone())),
                        Arc::new(RestAuthenticator::new(http, config.timeout())),
                    )
                }
                TransportKind::SdkScripts { perl, sdk_dir } => {
                    let runner = ScriptRunner::new(perl, sdk_dir, config.insecure);
                    (
                        Arc::new(SdkTransport::new(runner.clone())),
                        Arc::new(SdkAuthenticator::new(runner, config.timeout())),
                    )
                }
            };
        Self::new(config, transport, authenticator)
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Log in eagerly. Calls log in on demand anyway.
    pub async fn connect(&self) -> VmwareResult<()> {
        self.session.connect().await.map(|_| ())
    }

    pub async fn disconnect(&self) -> VmwareResult<()> {
        self.session.disconnect().await
    }

    pub async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    /// Current config (without password).
    pub fn config_safe(&self) -> ClientConfigSafe {
        self.config.safe()
    }

    pub fn catalog(&self) -> &'static OperationCatalog {
        self.catalog
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    // ── Generic entry point ─────────────────────────────────────────

    /// Run `operation` with `params` and return its typed result.
    pub async fn invoke(
        &self,
        operation: &str,
        params: &HashMap<String, String>,
    ) -> VmwareResult<TypedResult> {
        let call_id = Uuid::new_v4();
        let spec = self.catalog.lookup(operation)?;
        let validated = spec.validate(params).map_err(|e| {
            debug!("[{call_id}] {operation} rejected: {}", e.message);
            e
        })?;

        if !self.transport.supports(&validated) {
            let what = match validated.action() {
                Some(action) => format!("{operation} ({action})"),
                None => operation.to_string(),
            };
            return Err(VmwareError::unsupported(format!(
                "{what} is not available over the {} transport",
                self.transport.name()
            )));
        }

        let credential = self.session.ensure_valid().await?;
        let mut request = Request::build(spec, validated, credential)?;
        let idempotency = request.idempotency();
        debug!("[{call_id}] {}", request.redacted());

        let mut retries = 0u32;
        let mut attempts = 0u32;
        let mut reauthenticated = false;
        loop {
            attempts += 1;
            let err = match self.attempt(call_id, &request).await {
                Ok(raw) => return parser::parse_response(&request, &raw),
                Err(e) => e,
            };

            match self
                .retry
                .decide(idempotency, &err.failure, retries, reauthenticated)
            {
                Decision::Retry { after } => {
                    warn!(
                        "[{call_id}] {operation} failed (attempt {}/{}): {} - retrying in {}ms",
                        retries + 1,
                        self.retry.budget(idempotency) + 1,
                        err.message,
                        after.as_millis()
                    );
                    tokio::time::sleep(after).await;
                    retries += 1;
                }
                Decision::Reauthenticate => {
                    info!("[{call_id}] {operation}: session rejected, logging in again");
                    self.session.invalidate(request.credential()).await;
                    let fresh = self.session.ensure_valid().await?;
                    request = request.with_credential(fresh);
                    reauthenticated = true;
                }
                Decision::Surface => {
                    return Err(self.retry.surface(operation, idempotency, err, attempts));
                }
            }
        }
    }

    /// One bounded execution. The permit is held only while the transport
    /// runs, never across a backoff sleep.
    async fn attempt(&self, call_id: Uuid, request: &Request) -> Result<RawResult, TransportError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransportError::not_sent("Client is shutting down"))?;

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.transport.execute(request, self.timeout))
            .await
            .unwrap_or_else(|_| Err(TransportError::timed_out(self.timeout)));
        let elapsed = started.elapsed();

        match &outcome {
            Ok(raw) => debug!(
                "[{call_id}] {} via {} exited {:?} in {}ms",
                request.operation(),
                self.transport.name(),
                raw.exit_status,
                elapsed.as_millis()
            ),
            Err(e) => debug!(
                "[{call_id}] {} via {} failed in {}ms: {e}",
                request.operation(),
                self.transport.name(),
                elapsed.as_millis()
            ),
        }
        outcome
    }

    // ── VM operations ───────────────────────────────────────────────

    pub async fn vm_info(&self, vmname: &str) -> VmwareResult<Vec<VmRecord>> {
        let p = Params::new().set("vmname", vmname);
        self.invoke("vm.info", &p.0).await?.into_vms()
    }

    pub async fn guest_info(&self, vmname: &str) -> VmwareResult<Vec<VmRecord>> {
        let p = Params::new()
            .set("vmname", vmname)
            .set("operation", "display");
        self.invoke("vm.guest", &p.0).await?.into_vms()
    }

    pub async fn customize_guest(&self, vmname: &str, guesthost: &str) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("vmname", vmname)
            .set("operation", "customize")
            .set("guesthost", guesthost);
        self.invoke("vm.guest", &p.0).await?.into_ack()
    }

    pub async fn shares(&self, vmname: &str) -> VmwareResult<Vec<ShareRecord>> {
        let p = Params::new()
            .set("vmname", vmname)
            .set("operation", "display");
        self.invoke("vm.shares", &p.0).await?.into_shares()
    }

    pub async fn set_shares(
        &self,
        vmname: &str,
        cpu: Option<ShareLevel>,
        memory: Option<ShareLevel>,
        disk: Option<ShareLevel>,
    ) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("vmname", vmname)
            .set("operation", "update")
            .opt("cpu", cpu.map(|l| l.as_api_str()))
            .opt("memory", memory.map(|l| l.as_api_str()))
            .opt("disk", disk.map(|l| l.as_api_str()));
        self.invoke("vm.shares", &p.0).await?.into_ack()
    }

    /// Snapshots of a VM. A VM without snapshots yields an empty list.
    pub async fn snapshots(&self, vmname: &str) -> VmwareResult<Vec<SnapshotRecord>> {
        let p = Params::new().set("vmname", vmname).set("operation", "list");
        self.invoke("vm.snapshot", &p.0).await?.into_snapshots()
    }

    pub async fn snapshot(&self, vmname: &str, action: &SnapshotAction) -> VmwareResult<OperationAck> {
        let mut p = Params::new()
            .set("vmname", vmname)
            .set("operation", action.as_api_str());
        p = match action {
            SnapshotAction::Revert { snapshot }
            | SnapshotAction::Goto { snapshot }
            | SnapshotAction::Create { snapshot } => p.set("snapshotname", snapshot),
            SnapshotAction::Rename { snapshot, new_name } => {
                p.set("snapshotname", snapshot).set("newname", new_name)
            }
            SnapshotAction::Remove { snapshot, children } => p
                .set("snapshotname", snapshot)
                .set("children", children.to_string()),
            SnapshotAction::RemoveAll => p,
        };
        self.invoke("vm.snapshot", &p.0).await?.into_ack()
    }

    /// Add a virtual disk; `size_mb` defaults to the script's own default.
    pub async fn add_disk(
        &self,
        vmname: &str,
        filename: &str,
        size_mb: Option<u64>,
    ) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("vmname", vmname)
            .set("filename", filename)
            .opt("disksize", size_mb);
        self.invoke("vm.disk_add", &p.0).await?.into_ack()
    }

    pub async fn clone_vm(
        &self,
        vmname: &str,
        vmhost: &str,
        destination: &str,
        datastore: Option<&str>,
    ) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("vmname", vmname)
            .set("vmhost", vmhost)
            .set("vmname_destination", destination)
            .opt("datastore", datastore);
        self.invoke("vm.clone", &p.0).await?.into_ack()
    }

    pub async fn vm_power(&self, vmname: &str, action: PowerAction) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("vmname", vmname)
            .set("operation", action.as_api_str());
        self.invoke("vm.power", &p.0).await?.into_ack()
    }

    /// Create the VMs described in an XML file on the script host.
    pub async fn create_vms(&self, filename: &str, schema: Option<&str>) -> VmwareResult<OperationAck> {
        let p = Params::new().set("filename", filename).opt("schema", schema);
        self.invoke("vm.create", &p.0).await?.into_ack()
    }

    pub async fn migrate_vm(
        &self,
        vmname: &str,
        sourcehost: &str,
        targethost: &str,
        targetdatastore: &str,
        targetpool: &str,
    ) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("vmname", vmname)
            .set("sourcehost", sourcehost)
            .set("targethost", targethost)
            .set("targetdatastore", targetdatastore)
            .set("targetpool", targetpool);
        self.invoke("vm.migrate", &p.0).await?.into_ack()
    }

    pub async fn reconfigure_vm(
        &self,
        vmname: &str,
        filename: &str,
        schema: Option<&str>,
    ) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("vmname", vmname)
            .set("filename", filename)
            .opt("schema", schema);
        self.invoke("vm.reconfigure", &p.0).await?.into_ack()
    }

    pub async fn register_vm(&self, vmname: &str, placement: &VmPlacement) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("operation", "register")
            .set("vmname", vmname)
            .set("vmxpath", &placement.vmx_path)
            .set("pool", &placement.pool)
            .set("hostname", &placement.host)
            .set("datacenter", &placement.datacenter);
        self.invoke("vm.register", &p.0).await?.into_ack()
    }

    pub async fn unregister_vm(&self, vmname: &str) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("operation", "unregister")
            .set("vmname", vmname);
        self.invoke("vm.register", &p.0).await?.into_ack()
    }

    pub async fn to_template(&self, vmname: &str) -> VmwareResult<OperationAck> {
        let p = Params::new().set("vmname", vmname).set("operation", "T");
        self.invoke("vm.template", &p.0).await?.into_ack()
    }

    pub async fn from_template(&self, vmname: &str, pool: &str, host: &str) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("vmname", vmname)
            .set("operation", "VM")
            .set("pool", pool)
            .set("host", host);
        self.invoke("vm.template", &p.0).await?.into_ack()
    }

    // ── Host operations ─────────────────────────────────────────────

    /// All hosts, or the one named `hostname`.
    pub async fn host_info(&self, hostname: Option<&str>) -> VmwareResult<Vec<HostRecord>> {
        let p = Params::new().opt("hostname", hostname);
        self.invoke("host.info", &p.0).await?.into_hosts()
    }

    pub async fn host_operation(
        &self,
        target_host: &str,
        action: HostAction,
        options: &HostOpOptions,
    ) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("target_host", target_host)
            .set("operation", action.as_api_str())
            .opt("folder", options.folder.as_deref())
            .opt("cluster", options.cluster.as_deref())
            .opt("target_username", options.username.as_deref())
            .opt("target_password", options.password.as_deref());
        self.invoke("host.ops", &p.0).await?.into_ack()
    }

    /// Move every VM off `sourcehost`, optionally only those in `state`.
    pub async fn evacuate_host(
        &self,
        sourcehost: &str,
        targethost: &str,
        targetdatastore: &str,
        targetpool: &str,
        priority: Option<EvacuatePriority>,
        state: Option<VmPowerState>,
    ) -> VmwareResult<OperationAck> {
        let p = Params::new()
            .set("sourcehost", sourcehost)
            .set("targethost", targethost)
            .set("targetdatastore", targetdatastore)
            .set("targetpool", targetpool)
            .opt("priority", priority.map(|p| p.as_api_str()))
            .opt("state", state.as_ref().map(script_power_state));
        self.invoke("host.evacuate", &p.0).await?.into_ack()
    }

    // ── Datastores / general / performance ──────────────────────────

    pub async fn browse_datastores(
        &self,
        name: Option<&str>,
        filetype: Option<&str>,
    ) -> VmwareResult<Vec<DatastoreRecord>> {
        let p = Params::new().opt("name", name).opt("filetype", filetype);
        self.invoke("datastore.browse", &p.0).await?.into_datastores()
    }

    pub async fn about(&self, service: AboutService) -> VmwareResult<AboutRecord> {
        let p = Params::new().set("service", service.as_api_str());
        self.invoke("general.version", &p.0).await?.into_about()
    }

    pub async fn performance(
        &self,
        host: &str,
        counter: CounterType,
        query: &PerformanceQuery,
    ) -> VmwareResult<Vec<PerformanceSample>> {
        let p = Params::new()
            .set("host", host)
            .set("countertype", counter.as_api_str())
            .opt("interval", query.interval)
            .opt("samples", query.samples)
            .opt("instance", query.instance.as_deref());
        self.invoke("performance.query", &p.0).await?.into_performance()
    }
}

/// Parameter map under construction for a typed method.
struct Params(HashMap<String, String>);

impl Params {
    fn new() -> Self {
        Self(HashMap::new())
    }

    fn set(mut self, name: &str, value: impl ToString) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    fn opt(self, name: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.set(name, v),
            None => self,
        }
    }
}

/// Spelling the evacuation script expects. `Unknown` passes through and
/// fails validation.
fn script_power_state(state: &VmPowerState) -> &'static str {
    match state {
        VmPowerState::PoweredOn => "poweredOn",
        VmPowerState::PoweredOff => "poweredOff",
        VmPowerState::Suspended => "suspended",
        VmPowerState::Unknown => "unknown",
    }
}
