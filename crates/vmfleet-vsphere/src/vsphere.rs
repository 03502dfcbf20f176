//! vSphere Automation REST transport and session authenticator.
//!
//! Talks to vCenter via `https://{host}:{port}/api/...` with the
//! `vmware-api-session-id` header. Inventory names from the request are
//! resolved to managed-object ids with `?names=` list calls inside the
//! same execution.

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use crate::catalog::ValidatedParams;
use crate::config::ClientConfig;
use crate::error::{VmwareError, VmwareResult};
use crate::request::Request;
use crate::session::{Authenticator, Credential, LoginGrant};
use crate::transport::{OutputFormat, RawResult, Transport, TransportError, TransportFailure};

const SESSION_HEADER: &str = "vmware-api-session-id";

/// Shared HTTP plumbing for the transport and the authenticator.
#[derive(Clone)]
pub struct VsphereHttp {
    client: Client,
    base_url: String,
}

impl VsphereHttp {
    /// Build the HTTP client from config. No request is made.
    pub fn new(config: &ClientConfig) -> VmwareResult<Self> {
        let base_url = format!("https://{}:{}", config.host, config.port);
        url::Url::parse(&base_url)
            .map_err(|e| VmwareError::config(format!("Invalid endpoint {base_url}: {e}")))?;

        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| VmwareError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Plain-HTTP client against an arbitrary base URL.
    #[cfg(test)]
    fn plain(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Sends a built request and returns the body of a 2xx response.
async fn send(builder: RequestBuilder) -> Result<String, TransportError> {
    let resp = builder.send().await?;
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| TransportError::ambiguous(format!("Failed to read response body: {e}")))?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(TransportError::from_status(status.as_u16(), &body))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Authenticator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST /api/session` with basic auth; `DELETE /api/session` to log out.
pub struct RestAuthenticator {
    http: VsphereHttp,
    timeout: Duration,
}

impl RestAuthenticator {
    pub fn new(http: VsphereHttp, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

#[async_trait]
impl Authenticator for RestAuthenticator {
    async fn login(
        &self,
        _host: &str,
        _port: u16,
        username: &str,
        secret: &str,
    ) -> Result<LoginGrant, TransportError> {
        let resp = self
            .http
            .client
            .post(self.http.url("/api/session"))
            .basic_auth(username, Some(secret))
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::auth_rejected("Invalid credentials"));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::ambiguous(format!("Failed to read session response: {e}")))?;
        if !status.is_success() {
            return Err(TransportError::from_status(status.as_u16(), &body));
        }

        // Session id comes back as a quoted JSON string
        let token: String = serde_json::from_str(body.trim()).map_err(|e| {
            TransportError::rejected(None, format!("Failed to parse session response: {e}"))
        })?;
        Ok(LoginGrant {
            token: Some(token),
            ttl: None,
        })
    }

    async fn logout(&self, credential: &Credential) -> Result<(), TransportError> {
        let Some(token) = credential.token() else {
            return Ok(());
        };
        let builder = self
            .http
            .client
            .delete(self.http.url("/api/session"))
            .header(SESSION_HEADER, token)
            .timeout(self.timeout);
        send(builder).await.map(|_| ())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RestTransport {
    http: VsphereHttp,
}

impl RestTransport {
    pub fn new(http: VsphereHttp) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for RestTransport {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn output_format(&self) -> OutputFormat {
        OutputFormat::Json
    }

    fn supports(&self, params: &ValidatedParams) -> bool {
        let action = params.action().unwrap_or_default();
        match params.spec().name {
            "vm.info" | "vm.power" | "vm.clone" | "vm.migrate" | "vm.register"
            | "vm.disk_add" | "host.info" | "general.version" => true,
            "vm.guest" => action == "display",
            "vm.snapshot" => action != "rename" && params.get("vmname").is_some(),
            "host.ops" => matches!(action, "disconnect" | "reconnect" | "removehost"),
            "datastore.browse" => params.get("filetype").is_none(),
            _ => false,
        }
    }

    async fn execute(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<RawResult, TransportError> {
        if !self.supports(request.params()) {
            return Err(TransportError::unsupported(format!(
                "The REST API has no equivalent of {}",
                request.redacted()
            )));
        }
        let token = request
            .credential()
            .token()
            .ok_or_else(|| TransportError::auth_expired("No session token"))?;

        let started = Instant::now();
        let call = RestCall {
            http: &self.http,
            token,
            timeout,
        };
        let body = call.dispatch(request).await?;
        let elapsed = started.elapsed();
        debug!("vSphere REST {} completed in {elapsed:?}", request.operation());
        trace!("vSphere REST {} body: {body}", request.operation());
        Ok(RawResult::success(OutputFormat::Json, body).with_duration(elapsed))
    }
}

/// One authenticated execution against the REST API.
struct RestCall<'a> {
    http: &'a VsphereHttp,
    token: &'a str,
    timeout: Duration,
}

impl<'a> RestCall<'a> {
    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(SESSION_HEADER, self.token).timeout(self.timeout)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<String, TransportError> {
        let builder = self.http.client.get(self.http.url(path)).query(query);
        send(self.authed(builder)).await
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> Result<String, TransportError> {
        let mut builder = self.http.client.post(self.http.url(path));
        if let Some(body) = body {
            builder = builder.json(body);
        }
        send(self.authed(builder)).await
    }

    async fn delete(&self, path: &str) -> Result<String, TransportError> {
        let builder = self.http.client.delete(self.http.url(path));
        send(self.authed(builder)).await
    }

    /// Name → managed-object id via a `?names=` filtered list.
    async fn resolve(
        &self,
        collection: &str,
        id_field: &str,
        name: &str,
    ) -> Result<String, TransportError> {
        let body = self
            .get(&format!("/api/vcenter/{collection}"), &[("names", name)])
            .await?;
        let items: Vec<Value> = serde_json::from_str(body.trim()).map_err(|e| {
            TransportError::rejected(None, format!("Unexpected {collection} listing: {e}"))
        })?;
        items
            .first()
            .and_then(|item| item.get(id_field))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::rejected(Some(404), format!("No {collection} named '{name}'"))
            })
    }

    async fn vm_id(&self, request: &Request) -> Result<String, TransportError> {
        self.resolve("vm", "vm", field(request, "vmname")?).await
    }

    async fn dispatch(&self, request: &Request) -> Result<String, TransportError> {
        let action = request.action().unwrap_or_default();
        match request.operation() {
            "vm.info" => {
                let name = field(request, "vmname")?;
                let body = self.get("/api/vcenter/vm", &[("names", name)]).await?;
                // An unmatched name filter lists nothing rather than failing.
                if parse_list(&body)?.is_empty() {
                    return Err(TransportError::rejected(
                        Some(404),
                        format!("No vm named '{name}'"),
                    ));
                }
                Ok(body)
            }
            "vm.guest" => self.guest_display(request).await,
            "vm.snapshot" => self.snapshot(request, action).await,
            "vm.power" => {
                let id = self.vm_id(request).await?;
                let path = match field(request, "operation")? {
                    "poweron" => format!("/api/vcenter/vm/{id}/power?action=start"),
                    "poweroff" => format!("/api/vcenter/vm/{id}/power?action=stop"),
                    "suspend" => format!("/api/vcenter/vm/{id}/power?action=suspend"),
                    "reset" => format!("/api/vcenter/vm/{id}/power?action=reset"),
                    "shutdown" => format!("/api/vcenter/vm/{id}/guest/power?action=shutdown"),
                    "reboot" => format!("/api/vcenter/vm/{id}/guest/power?action=reboot"),
                    "standby" => format!("/api/vcenter/vm/{id}/guest/power?action=standby"),
                    other => return Err(unsupported(request, other)),
                };
                self.post(&path, None).await
            }
            "vm.clone" => {
                let source = self.vm_id(request).await?;
                let host = self.resolve("host", "host", field(request, "vmhost")?).await?;
                let mut placement = json!({ "host": host });
                if let Some(ds) = request.get("datastore") {
                    placement["datastore"] =
                        Value::String(self.resolve("datastore", "datastore", ds).await?);
                }
                let spec = json!({
                    "name": field(request, "vmname_destination")?,
                    "source": source,
                    "placement": placement,
                });
                self.post("/api/vcenter/vm?action=clone", Some(&spec)).await
            }
            "vm.migrate" => {
                let id = self.vm_id(request).await?;
                let host = self.resolve("host", "host", field(request, "targethost")?).await?;
                let datastore = self
                    .resolve("datastore", "datastore", field(request, "targetdatastore")?)
                    .await?;
                let pool = self
                    .resolve("resource-pool", "resource_pool", field(request, "targetpool")?)
                    .await?;
                let spec = json!({
                    "placement": { "host": host, "datastore": datastore, "resource_pool": pool }
                });
                self.post(&format!("/api/vcenter/vm/{id}?action=relocate"), Some(&spec))
                    .await
            }
            "vm.register" if action == "register" => {
                let datacenter = self
                    .resolve("datacenter", "datacenter", field(request, "datacenter")?)
                    .await?;
                let host = self.resolve("host", "host", field(request, "hostname")?).await?;
                let pool = self
                    .resolve("resource-pool", "resource_pool", field(request, "pool")?)
                    .await?;
                let spec = json!({
                    "datacenter": datacenter,
                    "name": field(request, "vmname")?,
                    "path": field(request, "vmxpath")?,
                    "placement": { "host": host, "resource_pool": pool },
                });
                self.post("/api/vcenter/vm?action=register", Some(&spec)).await
            }
            "vm.register" => {
                let id = self.vm_id(request).await?;
                self.post(&format!("/api/vcenter/vm/{id}?action=unregister"), None)
                    .await
            }
            "vm.disk_add" => {
                let id = self.vm_id(request).await?;
                let mut vmdk = json!({ "name": field(request, "filename")? });
                if let Some(mb) = request.get("disksize").and_then(|s| s.parse::<u64>().ok()) {
                    vmdk["capacity"] = json!(mb.saturating_mul(1024 * 1024));
                }
                let spec = json!({ "new_vmdk": vmdk });
                self.post(&format!("/api/vcenter/vm/{id}/hardware/disk"), Some(&spec))
                    .await
            }
            "host.info" => match request.get("hostname") {
                Some(name) => self.get("/api/vcenter/host", &[("names", name)]).await,
                None => self.get("/api/vcenter/host", &[]).await,
            },
            "host.ops" => {
                let id = self
                    .resolve("host", "host", field(request, "target_host")?)
                    .await?;
                match action {
                    "disconnect" => {
                        self.post(&format!("/api/vcenter/host/{id}?action=disconnect"), None)
                            .await
                    }
                    "reconnect" => {
                        self.post(&format!("/api/vcenter/host/{id}?action=connect"), None)
                            .await
                    }
                    "removehost" => self.delete(&format!("/api/vcenter/host/{id}")).await,
                    other => Err(unsupported(request, other)),
                }
            }
            "datastore.browse" => match request.get("name") {
                Some(name) => self.get("/api/vcenter/datastore", &[("names", name)]).await,
                None => self.get("/api/vcenter/datastore", &[]).await,
            },
            "general.version" => self.get("/api/appliance/system/version", &[]).await,
            other => Err(unsupported(request, other)),
        }
    }

    /// VM detail plus guest identity, flattened into one VM object.
    async fn guest_display(&self, request: &Request) -> Result<String, TransportError> {
        let id = self.vm_id(request).await?;
        let detail: Value = parse_body(&self.get(&format!("/api/vcenter/vm/{id}"), &[]).await?)?;

        // Identity needs running VMware Tools; without it the VM is still reported.
        let identity = match self
            .get(&format!("/api/vcenter/vm/{id}/guest/identity"), &[])
            .await
        {
            Ok(body) => parse_body(&body).unwrap_or(Value::Null),
            Err(e) if e.failure.not_applied() || matches!(e.failure, TransportFailure::Rejected { .. }) =>
            {
                debug!("No guest identity for {id}: {e}");
                Value::Null
            }
            Err(e) => return Err(e),
        };

        let record = json!({
            "vm": id,
            "name": detail.get("name").cloned().unwrap_or_else(|| json!(request.get("vmname"))),
            "power_state": detail.get("power_state"),
            "cpu_count": detail.pointer("/cpu/count"),
            "memory_size_mib": detail.pointer("/memory/size_MiB"),
            "guest_os": identity.pointer("/full_name/default_message").or_else(|| detail.get("guest_OS")),
            "host_name": identity.get("host_name"),
            "ip_address": identity.get("ip_address"),
        });
        Ok(record.to_string())
    }

    async fn snapshot(&self, request: &Request, action: &str) -> Result<String, TransportError> {
        let id = self.vm_id(request).await?;
        let base = format!("/api/vcenter/vm/{id}/snapshots");
        let list = match self.get(&base, &[]).await {
            Ok(body) => body,
            // Endpoint answers 404 for a VM without snapshots.
            Err(e) if e.failure == TransportFailure::Rejected { status: Some(404) } => "[]".to_string(),
            Err(e) => return Err(e),
        };

        match action {
            "list" => Ok(list),
            "create" => {
                let spec = json!({
                    "name": field(request, "snapshotname")?,
                    "memory": false,
                    "quiesce": false,
                });
                self.post(&base, Some(&spec)).await
            }
            "removeall" => {
                let snapshots: Vec<Value> = parse_list(&list)?;
                let mut removed = 0usize;
                for snap in &snapshots {
                    if let Some(sid) = snap.get("snapshot").and_then(Value::as_str) {
                        self.delete(&format!("{base}/{sid}?remove_children=true")).await?;
                        removed += 1;
                    }
                }
                Ok(json!(format!("removed {removed} snapshot(s)")).to_string())
            }
            "revert" | "goto" | "remove" => {
                let wanted = field(request, "snapshotname")?;
                let snapshots: Vec<Value> = parse_list(&list)?;
                let sid = snapshots
                    .iter()
                    .find(|s| s.get("name").and_then(Value::as_str) == Some(wanted))
                    .and_then(|s| s.get("snapshot").and_then(Value::as_str))
                    .ok_or_else(|| {
                        TransportError::rejected(Some(404), format!("No snapshot named '{wanted}'"))
                    })?;
                if action == "remove" {
                    let children = request.get("children") == Some("true");
                    let path = if children {
                        format!("{base}/{sid}?remove_children=true")
                    } else {
                        format!("{base}/{sid}")
                    };
                    self.delete(&path).await
                } else {
                    self.post(&format!("{base}/{sid}?action=revert"), None).await
                }
            }
            other => Err(unsupported(request, other)),
        }
    }
}

fn field<'r>(request: &'r Request, name: &str) -> Result<&'r str, TransportError> {
    request.get(name).ok_or_else(|| {
        TransportError::unsupported(format!(
            "{} needs field {name} on the REST transport",
            request.operation()
        ))
    })
}

fn unsupported(request: &Request, what: &str) -> TransportError {
    TransportError::unsupported(format!(
        "{}: '{what}' is not available over REST",
        request.operation()
    ))
}

fn parse_body(body: &str) -> Result<Value, TransportError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body.trim())
        .map_err(|e| TransportError::rejected(None, format!("Unexpected response body: {e}")))
}

fn parse_list(body: &str) -> Result<Vec<Value>, TransportError> {
    match parse_body(body)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        other => Ok(vec![other]),
    }
}
