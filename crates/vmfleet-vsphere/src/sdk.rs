//! vSphere Perl SDK script transport.
//!
//! Runs `perl <sdk_dir>/<script> --flag value …` directly (no shell). The
//! endpoint credential and any secret-flagged field (such as the target
//! password of `host.ops addhost`) travel in the SDK's `VI_*` environment
//! variables, never in argv.

use async_trait::async_trait;
use log::{debug, trace, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::request::Request;
use crate::session::{Authenticator, Credential, LoginGrant};
use crate::transport::{OutputFormat, RawResult, Transport, TransportError};

/// Script run once at login to check the credential.
const LOGIN_CHECK_SCRIPT: &str = "general/viversion.pl";

/// Spawns SDK scripts with the endpoint environment.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    perl: PathBuf,
    sdk_dir: PathBuf,
    insecure: bool,
}

/// Endpoint identity handed to a script through its environment.
struct ScriptEnv<'a> {
    host: &'a str,
    port: u16,
    username: &'a str,
    secret: &'a str,
    /// Secret operation fields as `VI_<FLAG>` pairs.
    fields: &'a [(String, String)],
}

impl ScriptRunner {
    pub fn new(perl: impl Into<PathBuf>, sdk_dir: impl Into<PathBuf>, insecure: bool) -> Self {
        Self {
            perl: perl.into(),
            sdk_dir: sdk_dir.into(),
            insecure,
        }
    }

    pub fn script_path(&self, script: &str) -> PathBuf {
        self.sdk_dir.join(script)
    }

    pub fn sdk_dir(&self) -> &Path {
        &self.sdk_dir
    }

    async fn run(
        &self,
        script: &str,
        args: &[String],
        env: ScriptEnv<'_>,
        timeout: Duration,
    ) -> Result<RawResult, TransportError> {
        let path = self.script_path(script);
        debug!("vSphere SDK exec: {} ({} args)", path.display(), args.len());

        let mut cmd = Command::new(&self.perl);
        cmd.arg(&path)
            .args(args)
            .env("VI_SERVER", env.host)
            .env("VI_PORTNUMBER", env.port.to_string())
            .env("VI_PROTOCOL", "https")
            .env("VI_USERNAME", env.username)
            .env("VI_PASSWORD", env.secret)
            .envs(env.fields.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.insecure {
            cmd.env("PERL_LWP_SSL_VERIFY_HOSTNAME", "0");
        }

        let started = Instant::now();
        let child = cmd.spawn().map_err(|e| {
            TransportError::not_sent(format!("Failed to spawn {}: {e}", self.perl.display()))
        })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| TransportError::timed_out(timeout))?
            .map_err(|e| TransportError::ambiguous(format!("Script process failed: {e}")))?;
        let duration = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_status = output.status.code();

        trace!(
            "SDK stdout ({} bytes): {}",
            stdout.len(),
            stdout.chars().take(300).collect::<String>()
        );
        if !stderr.is_empty() {
            warn!("SDK stderr: {}", stderr.chars().take(500).collect::<String>());
        }

        let raw = RawResult {
            exit_status,
            stdout,
            stderr,
            duration,
            format: OutputFormat::KeyValue,
        };
        if raw.is_success() {
            return Ok(raw);
        }
        match classify_failure(raw.diagnostic()) {
            Some(err) => Err(err.with_diagnostic(raw.diagnostic())),
            // Anything else is the script's own verdict; the parser reports it.
            None => Ok(raw),
        }
    }
}

/// Failures that happen before the script could act on the endpoint.
fn classify_failure(diagnostic: &str) -> Option<TransportError> {
    let lower = diagnostic.to_ascii_lowercase();
    if lower.contains("incorrect user name or password")
        || lower.contains("cannot complete login")
        || lower.contains("invalidlogin")
    {
        return Some(TransportError::auth_rejected("Endpoint refused the login"));
    }
    if lower.contains("connection refused")
        || lower.contains("can't connect")
        || lower.contains("server version unavailable")
        || lower.contains("name or service not known")
    {
        return Some(TransportError::not_sent("Could not reach the endpoint"));
    }
    if lower.contains("can't open perl script") || lower.contains("can't locate") {
        return Some(TransportError::not_sent("SDK script or module missing"));
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SdkTransport {
    runner: ScriptRunner,
}

impl SdkTransport {
    pub fn new(runner: ScriptRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Transport for SdkTransport {
    fn name(&self) -> &'static str {
        "sdk"
    }

    fn output_format(&self) -> OutputFormat {
        OutputFormat::KeyValue
    }

    async fn execute(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<RawResult, TransportError> {
        let credential = request.credential();
        debug!("vSphere SDK {}", request.redacted());
        let fields = request.secret_env();
        self.runner
            .run(
                request.spec().script,
                &request.args(),
                ScriptEnv {
                    host: credential.host(),
                    port: credential.port(),
                    username: credential.username(),
                    secret: credential.secret(),
                    fields: &fields,
                },
                timeout,
            )
            .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Authenticator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scripts log in on every run, so "login" only checks the credential
/// once and yields a credential without token or expiry.
pub struct SdkAuthenticator {
    runner: ScriptRunner,
    timeout: Duration,
}

impl SdkAuthenticator {
    pub fn new(runner: ScriptRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

#[async_trait]
impl Authenticator for SdkAuthenticator {
    async fn login(
        &self,
        host: &str,
        port: u16,
        username: &str,
        secret: &str,
    ) -> Result<LoginGrant, TransportError> {
        let args = vec!["--aboutservice".to_string(), "version".to_string()];
        let env = ScriptEnv {
            host,
            port,
            username,
            secret,
            fields: &[],
        };
        let raw = self.runner.run(LOGIN_CHECK_SCRIPT, &args, env, self.timeout).await?;
        if !raw.is_success() {
            return Err(TransportError::rejected(None, "Credential check failed")
                .with_diagnostic(raw.diagnostic()));
        }
        Ok(LoginGrant::default())
    }

    async fn logout(&self, _credential: &Credential) -> Result<(), TransportError> {
        Ok(())
    }
}
