//! In-memory transport and authenticator.
//!
//! Used by the test suite and for offline demos: responses are queued up
//! front, and every call is counted so tests can assert exactly how many
//! times the pipeline reached the endpoint.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::request::Request;
use crate::session::{Authenticator, Credential, LoginGrant};
use crate::transport::{OutputFormat, RawResult, Transport, TransportError};

/// What a [`ScriptedTransport`] saw for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub operation: String,
    pub action: Option<String>,
    pub args: Vec<String>,
    /// Names of the secret variables the call would export.
    pub secret_env: Vec<String>,
    pub token: Option<String>,
}

/// Replays queued responses in order. When the queue is empty the
/// fallback response (if any) is repeated.
pub struct ScriptedTransport {
    format: OutputFormat,
    queue: Mutex<VecDeque<Result<RawResult, TransportError>>>,
    fallback: Mutex<Option<Result<RawResult, TransportError>>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new(format: OutputFormat) -> Arc<Self> {
        Arc::new(Self {
            format,
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        })
    }

    /// Queue a successful response with `stdout` as the body.
    pub async fn push_ok(&self, stdout: impl Into<String>) {
        let raw = RawResult::success(self.format, stdout);
        self.queue.lock().await.push_back(Ok(raw));
    }

    pub async fn push_raw(&self, raw: RawResult) {
        self.queue.lock().await.push_back(Ok(raw));
    }

    pub async fn push_err(&self, err: TransportError) {
        self.queue.lock().await.push_back(Err(err));
    }

    /// Response used once the queue runs dry.
    pub async fn set_fallback(&self, response: Result<RawResult, TransportError>) {
        *self.fallback.lock().await = Some(response);
    }

    /// Simulated latency of every call.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.lock().await = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed executing at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub async fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().await.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn output_format(&self) -> OutputFormat {
        self.format
    }

    async fn execute(
        &self,
        request: &Request,
        _timeout: Duration,
    ) -> Result<RawResult, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        self.recorded.lock().await.push(RecordedCall {
            operation: request.operation().to_string(),
            action: request.action().map(str::to_string),
            args: request.args(),
            secret_env: request.secret_env().into_iter().map(|(k, _)| k).collect(),
            token: request.credential().token().map(str::to_string),
        });

        let delay = *self.delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let next = self.queue.lock().await.pop_front();
        let response = match next {
            Some(r) => r,
            None => self.fallback.lock().await.clone().unwrap_or_else(|| {
                Err(TransportError::rejected(None, "No scripted response left"))
            }),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Counts logins and logouts; hands out numbered tokens.
pub struct CountingAuthenticator {
    logins: AtomicUsize,
    logouts: AtomicUsize,
    delay: Mutex<Duration>,
    ttls: Mutex<VecDeque<Duration>>,
    failures: Mutex<VecDeque<TransportError>>,
    tokenless: bool,
}

impl CountingAuthenticator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    /// Grants without a token, like the script transport's login check.
    pub fn tokenless() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    fn build(tokenless: bool) -> Self {
        Self {
            logins: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            ttls: Mutex::new(VecDeque::new()),
            failures: Mutex::new(VecDeque::new()),
            tokenless,
        }
    }

    /// Simulated login latency.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.lock().await = delay;
    }

    /// Lifetimes reported by the next logins, in order. Later logins
    /// report none and fall back to the configured session TTL.
    pub async fn push_ttl(&self, ttl: Duration) {
        self.ttls.lock().await.push_back(ttl);
    }

    /// Make the next login fail with `err`.
    pub async fn push_failure(&self, err: TransportError) {
        self.failures.lock().await.push_back(err);
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for CountingAuthenticator {
    async fn login(
        &self,
        _host: &str,
        _port: u16,
        _username: &str,
        _secret: &str,
    ) -> Result<LoginGrant, TransportError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().await.pop_front() {
            return Err(err);
        }
        if self.tokenless {
            return Ok(LoginGrant::default());
        }
        Ok(LoginGrant {
            token: Some(format!("session-{n}")),
            ttl: self.ttls.lock().await.pop_front(),
        })
    }

    async fn logout(&self, _credential: &Credential) -> Result<(), TransportError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
