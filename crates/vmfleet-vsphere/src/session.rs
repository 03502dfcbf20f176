//! Session manager: owns the single credential slot, logs in, renews
//! near expiry and logs out.
//!
//! Renewal is single-flight. Callers that find the credential stale
//! queue on one renewal lock; the first performs the login, the rest
//! re-check the slot after acquiring the lock and reuse the fresh token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use zeroize::Zeroizing;

use crate::config::ClientConfig;
use crate::error::{VmwareError, VmwareResult};
use crate::retry::RetryPolicy;
use crate::transport::{TransportError, TransportFailure};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Credential
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Endpoint identity plus the session token obtained for it.
pub struct Credential {
    host: String,
    port: u16,
    username: String,
    secret: Zeroizing<String>,
    token: Option<Zeroizing<String>>,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A credential with no session token yet.
    pub fn new(host: &str, port: u16, username: &str, secret: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            secret: Zeroizing::new(secret.to_string()),
            token: None,
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        self.token = token.map(Zeroizing::new);
        self.issued_at = Utc::now();
        self.expires_at = expires_at;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &str {
        self.secret.as_str()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.as_str())
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True once `now + margin` reaches the expiry. Credentials without
    /// an expiry (script transport) never need renewal.
    pub fn needs_renewal(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            None => false,
            Some(exp) => {
                let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
                now + margin >= exp
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Authenticator seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of a successful login.
#[derive(Clone, Default)]
pub struct LoginGrant {
    pub token: Option<String>,
    /// Lifetime reported by the endpoint, if any.
    pub ttl: Option<Duration>,
}

impl fmt::Debug for LoginGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginGrant")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Talks to the endpoint's authentication service.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(
        &self,
        host: &str,
        port: u16,
        username: &str,
        secret: &str,
    ) -> Result<LoginGrant, TransportError>;

    async fn logout(&self, credential: &Credential) -> Result<(), TransportError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Session manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionManager {
    host: String,
    port: u16,
    username: String,
    secret: Zeroizing<String>,
    session_ttl: Duration,
    renew_margin: Duration,
    retry: RetryPolicy,
    authenticator: Arc<dyn Authenticator>,
    slot: RwLock<Option<Arc<Credential>>>,
    renewal: Mutex<()>,
}

impl SessionManager {
    pub fn new(config: &ClientConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            secret: config.password.clone(),
            session_ttl: Duration::from_secs(config.session_ttl_secs),
            renew_margin: Duration::from_secs(config.renew_margin_secs),
            retry: RetryPolicy::from_config(config),
            authenticator,
            slot: RwLock::new(None),
            renewal: Mutex::new(()),
        }
    }

    /// Log in now, replacing any existing credential.
    pub async fn connect(&self) -> VmwareResult<Arc<Credential>> {
        let _guard = self.renewal.lock().await;
        let fresh = Arc::new(self.login_with_retry().await?);
        let replaced = self.slot.write().await.replace(fresh.clone());
        info!("vSphere session established for {}@{}", self.username, self.host);
        self.retire(replaced).await;
        Ok(fresh)
    }

    /// Return a credential that is valid for at least the renewal margin,
    /// logging in if the slot is empty or stale.
    pub async fn ensure_valid(&self) -> VmwareResult<Arc<Credential>> {
        if let Some(current) = self.fresh_in_slot().await {
            return Ok(current);
        }

        let _guard = self.renewal.lock().await;
        // Another caller may have renewed while we waited for the lock.
        if let Some(current) = self.fresh_in_slot().await {
            debug!("vSphere session renewed by a concurrent caller");
            return Ok(current);
        }

        let fresh = Arc::new(self.login_with_retry().await?);
        let replaced = self.slot.write().await.replace(fresh.clone());
        info!("vSphere session renewed for {}@{}", self.username, self.host);
        self.retire(replaced).await;
        Ok(fresh)
    }

    /// Log out a credential that a renewal pushed out of the slot.
    /// Tokenless credentials hold nothing server-side.
    async fn retire(&self, replaced: Option<Arc<Credential>>) {
        let Some(old) = replaced.filter(|c| c.token().is_some()) else {
            return;
        };
        if let Err(e) = self.authenticator.logout(&old).await {
            warn!("vSphere logout of replaced session on {} failed: {e}", old.host());
        }
    }

    /// Drop `stale` if it is still the credential in the slot. A newer
    /// credential installed by another caller is left alone.
    pub async fn invalidate(&self, stale: &Arc<Credential>) {
        let mut slot = self.slot.write().await;
        if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, stale)) {
            debug!("vSphere session token rejected; clearing");
            *slot = None;
        }
    }

    /// Log out and clear the slot. Logout failures are logged, not returned.
    pub async fn disconnect(&self) -> VmwareResult<()> {
        let _guard = self.renewal.lock().await;
        let taken = self.slot.write().await.take();
        if let Some(credential) = taken {
            if let Err(e) = self.authenticator.logout(&credential).await {
                warn!("vSphere logout for {} failed: {e}", credential.host());
            }
            info!("vSphere session closed for {}@{}", self.username, self.host);
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.slot.read().await.is_some()
    }

    pub async fn current(&self) -> Option<Arc<Credential>> {
        self.slot.read().await.clone()
    }

    async fn fresh_in_slot(&self) -> Option<Arc<Credential>> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .filter(|c| !c.needs_renewal(Utc::now(), self.renew_margin))
            .cloned()
    }

    async fn login_with_retry(&self) -> VmwareResult<Credential> {
        let mut retries = 0u32;
        loop {
            let outcome = self
                .authenticator
                .login(&self.host, self.port, &self.username, self.secret.as_str())
                .await;
            let err = match outcome {
                Ok(grant) => return Ok(self.credential_from(grant)),
                Err(e) => e,
            };

            match err.failure {
                TransportFailure::NotSent
                | TransportFailure::Ambiguous
                | TransportFailure::Unavailable { .. }
                    if retries < self.retry.max_retries =>
                {
                    let delay = self.retry.backoff(retries);
                    warn!(
                        "vSphere login to {} failed (attempt {}/{}): {} - retrying in {}ms",
                        self.host,
                        retries + 1,
                        self.retry.max_retries + 1,
                        err.message,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                TransportFailure::NotSent
                | TransportFailure::Ambiguous
                | TransportFailure::Unavailable { .. } => {
                    return Err(VmwareError::transient(
                        format!("Login to {} failed: {}", self.host, err.message),
                        false,
                        retries + 1,
                    ));
                }
                TransportFailure::Unsupported => {
                    return Err(VmwareError::config(err.message));
                }
                TransportFailure::AuthExpired
                | TransportFailure::AuthRejected
                | TransportFailure::Rejected { .. } => {
                    let e = VmwareError::auth(format!(
                        "Login to {} as {} rejected: {}",
                        self.host, self.username, err.message
                    ));
                    return Err(match err.diagnostic {
                        Some(d) => e.with_diagnostic(d),
                        None => e,
                    });
                }
            }
        }
    }

    fn credential_from(&self, grant: LoginGrant) -> Credential {
        // Tokenless logins (script transport) never expire.
        let expires_at = grant.token.as_ref().map(|_| {
            let ttl = grant.ttl.unwrap_or(self.session_ttl);
            Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero())
        });
        Credential::new(&self.host, self.port, &self.username, self.secret.as_str())
            .with_token(grant.token, expires_at)
    }
}
