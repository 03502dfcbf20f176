//! Client configuration: endpoint, credentials, deadlines, retry bounds
//! and transport selection.
//!
//! Loadable from JSON (string or file) or from `VMFLEET_*` environment
//! variables. Nothing here is ever written back to disk.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

use crate::error::{VmwareError, VmwareResult};

/// Which transport executes requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TransportKind {
    /// vSphere Automation REST API over HTTPS.
    #[default]
    Rest,
    /// vSphere Perl SDK utility scripts run as child processes.
    #[serde(rename_all = "camelCase")]
    SdkScripts {
        /// Perl interpreter (default "perl").
        #[serde(default = "default_perl")]
        perl: PathBuf,
        /// Directory holding `vm/`, `host/`, `general/`, `performance/`.
        sdk_dir: PathBuf,
    },
}

fn default_perl() -> PathBuf {
    PathBuf::from("perl")
}

/// Top-level configuration for a fleet client.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// vCenter or ESXi hostname / IP (e.g. "vcenter.lab.local")
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username (e.g. "administrator@vsphere.local")
    pub username: String,
    #[serde(default, with = "secret_string")]
    pub password: Zeroizing<String>,
    /// Skip TLS certificate verification (self-signed labs)
    #[serde(default)]
    pub insecure: bool,
    /// Per-call deadline in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Bound on retries of transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff interval in milliseconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Cap on concurrently outstanding remote operations.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Assumed lifetime of a session token.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Renew this many seconds before the token would expire.
    #[serde(default = "default_renew_margin")]
    pub renew_margin_secs: u64,
    #[serde(default)]
    pub transport: TransportKind,
}

fn default_port() -> u16 { 443 }
fn default_timeout() -> u64 { 30 }
fn default_connect_timeout() -> u64 { 10 }
fn default_max_retries() -> u32 { 3 }
fn default_backoff_base() -> u64 { 200 }
fn default_max_backoff() -> u64 { 5_000 }
fn default_max_concurrent() -> usize { 8 }
fn default_session_ttl() -> u64 { 1_800 }
fn default_renew_margin() -> u64 { 60 }

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: Zeroizing::new(String::new()),
            insecure: false,
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            max_backoff_ms: default_max_backoff(),
            max_concurrent: default_max_concurrent(),
            session_ttl_secs: default_session_ttl(),
            renew_margin_secs: default_renew_margin(),
            transport: TransportKind::Rest,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("max_concurrent", &self.max_concurrent)
            .field("transport", &self.transport)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            username: username.to_string(),
            password: Zeroizing::new(password.to_string()),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> VmwareResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| VmwareError::config(format!("Invalid client config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> VmwareResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            VmwareError::config(format!("Cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Resolve configuration from `VMFLEET_*` environment variables.
    pub fn from_env() -> VmwareResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> VmwareResult<Self> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| VmwareError::config(format!("{key} is not set")))
        };
        let mut config = Self::new(
            &required("VMFLEET_HOST")?,
            &required("VMFLEET_USERNAME")?,
            &required("VMFLEET_PASSWORD")?,
        );
        if let Some(port) = lookup("VMFLEET_PORT") {
            config.port = parse_env("VMFLEET_PORT", &port)?;
        }
        if let Some(secs) = lookup("VMFLEET_TIMEOUT_SECS") {
            config.timeout_secs = parse_env("VMFLEET_TIMEOUT_SECS", &secs)?;
        }
        if let Some(retries) = lookup("VMFLEET_MAX_RETRIES") {
            config.max_retries = parse_env("VMFLEET_MAX_RETRIES", &retries)?;
        }
        if let Some(insecure) = lookup("VMFLEET_INSECURE") {
            config.insecure = matches!(insecure.as_str(), "1" | "true" | "yes");
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VmwareResult<()> {
        if self.host.trim().is_empty() {
            return Err(VmwareError::config("host must not be empty"));
        }
        if self.username.trim().is_empty() {
            return Err(VmwareError::config("username must not be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(VmwareError::config("timeoutSecs must be at least 1"));
        }
        if self.max_concurrent == 0 {
            return Err(VmwareError::config("maxConcurrent must be at least 1"));
        }
        if self.renew_margin_secs >= self.session_ttl_secs {
            return Err(VmwareError::config(format!(
                "renewMarginSecs ({}) must be shorter than sessionTtlSecs ({})",
                self.renew_margin_secs, self.session_ttl_secs
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Config without the password, safe to display.
    pub fn safe(&self) -> ClientConfigSafe {
        ClientConfigSafe {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            insecure: self.insecure,
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
            max_concurrent: self.max_concurrent,
            transport: self.transport.clone(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> VmwareResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| VmwareError::config(format!("{key} has an invalid value '{value}'")))
}

/// Config without the password.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfigSafe {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub insecure: bool,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_concurrent: usize,
    pub transport: TransportKind,
}

mod secret_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use zeroize::Zeroizing;

    pub fn serialize<S: Serializer>(_: &Zeroizing<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str("")
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Zeroizing<String>, D::Error> {
        String::deserialize(d).map(Zeroizing::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn json_defaults_applied() {
        let c = ClientConfig::from_json_str(
            r#"{"host":"vc.lab.local","username":"admin","password":"s3cret"}"#,
        )
        .unwrap();
        assert_eq!(c.port, 443);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.backoff_base_ms, 200);
        assert_eq!(c.transport, TransportKind::Rest);
        assert_eq!(c.password.as_str(), "s3cret");
    }

    #[test]
    fn sdk_transport_from_json() {
        let c = ClientConfig::from_json_str(
            r#"{"host":"esx01","username":"root","password":"x",
                "transport":{"kind":"sdkScripts","sdkDir":"/opt/vmware-vsphere-cli/apps"}}"#,
        )
        .unwrap();
        assert_eq!(
            c.transport,
            TransportKind::SdkScripts {
                perl: PathBuf::from("perl"),
                sdk_dir: PathBuf::from("/opt/vmware-vsphere-cli/apps"),
            }
        );
    }

    #[test]
    fn empty_host_rejected() {
        let err = ClientConfig::from_json_str(r#"{"host":" ","username":"a"}"#).unwrap_err();
        assert_eq!(err.kind, crate::error::VmwareErrorKind::Config);
    }

    #[test]
    fn renew_margin_must_fit_inside_ttl() {
        let err = ClientConfig::from_json_str(
            r#"{"host":"vc","username":"u","sessionTtlSecs":30,"renewMarginSecs":60}"#,
        )
        .unwrap_err();
        assert!(err.message.contains("sessionTtlSecs"));

        let c = ClientConfig::from_json_str(
            r#"{"host":"vc","username":"u","sessionTtlSecs":120,"renewMarginSecs":60}"#,
        )
        .unwrap();
        assert_eq!(c.renew_margin_secs, 60);
    }

    #[test]
    fn from_file_reads_json() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"host":"vc","username":"u","password":"p","maxConcurrent":2}}"#).unwrap();
        let c = ClientConfig::from_file(f.path()).unwrap();
        assert_eq!(c.max_concurrent, 2);
    }

    #[test]
    fn env_lookup() {
        let vars: HashMap<&str, &str> = [
            ("VMFLEET_HOST", "vc01"),
            ("VMFLEET_USERNAME", "ops"),
            ("VMFLEET_PASSWORD", "pw"),
            ("VMFLEET_MAX_RETRIES", "5"),
            ("VMFLEET_INSECURE", "true"),
        ]
        .into_iter()
        .collect();
        let c = ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.host, "vc01");
        assert_eq!(c.max_retries, 5);
        assert!(c.insecure);

        let err = ClientConfig::from_lookup(|_| None).unwrap_err();
        assert!(err.message.contains("VMFLEET_HOST"));
    }

    #[test]
    fn debug_and_safe_view_hide_password() {
        let c = ClientConfig::new("vc", "u", "hunter2");
        assert!(!format!("{c:?}").contains("hunter2"));
        let safe = serde_json::to_string(&c.safe()).unwrap();
        assert!(!safe.contains("hunter2"));
        let full = serde_json::to_string(&c).unwrap();
        assert!(!full.contains("hunter2"));
    }
}
