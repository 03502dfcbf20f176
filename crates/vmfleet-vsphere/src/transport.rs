//! Transport seam: executes a built [`Request`] against the endpoint and
//! hands back the raw output, or a classified [`TransportError`].
//!
//! Failure classification happens here, at the only place that knows
//! whether a request actually left the process.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::catalog::ValidatedParams;
use crate::request::Request;

/// Format of a transport's raw output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputFormat {
    /// vSphere Automation REST JSON bodies.
    Json,
    /// `Key: value` records printed by the SDK scripts.
    KeyValue,
}

/// Unparsed outcome of one execution.
#[derive(Debug, Clone)]
pub struct RawResult {
    /// Process exit code or HTTP-derived status (0 = success).
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub format: OutputFormat,
}

impl RawResult {
    pub fn success(format: OutputFormat, stdout: impl Into<String>) -> Self {
        Self {
            exit_status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
            duration: Duration::ZERO,
            format,
        }
    }

    pub fn failed(format: OutputFormat, code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
            format,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// Best available error text: stderr, else stdout.
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// What is known about a failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TransportFailure {
    /// The request never reached the endpoint (refused, DNS, spawn failure).
    NotSent,
    /// The request was sent but its outcome is unknown (timeout, reset).
    Ambiguous,
    /// The endpoint rejected the session token.
    AuthExpired,
    /// The endpoint refused the login credentials.
    AuthRejected,
    /// Endpoint reported it did not process the request (503, 429).
    Unavailable { status: u16 },
    /// Endpoint rejected the operation itself.
    Rejected { status: Option<u16> },
    /// The transport cannot express this operation.
    Unsupported,
}

impl TransportFailure {
    /// Map an HTTP status of a failed call.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::AuthExpired,
            429 | 503 => Self::Unavailable { status },
            502 | 504 => Self::Ambiguous,
            _ => Self::Rejected {
                status: Some(status),
            },
        }
    }

    /// Whether the endpoint certainly did not apply the request.
    pub fn not_applied(&self) -> bool {
        matches!(
            self,
            Self::NotSent | Self::AuthExpired | Self::AuthRejected | Self::Unavailable { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct TransportError {
    pub failure: TransportFailure,
    pub message: String,
    pub diagnostic: Option<String>,
}

impl TransportError {
    pub fn new(failure: TransportFailure, message: impl Into<String>) -> Self {
        Self {
            failure,
            message: message.into(),
            diagnostic: None,
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    pub fn not_sent(msg: impl Into<String>) -> Self {
        Self::new(TransportFailure::NotSent, msg)
    }

    pub fn ambiguous(msg: impl Into<String>) -> Self {
        Self::new(TransportFailure::Ambiguous, msg)
    }

    pub fn auth_expired(msg: impl Into<String>) -> Self {
        Self::new(TransportFailure::AuthExpired, msg)
    }

    pub fn auth_rejected(msg: impl Into<String>) -> Self {
        Self::new(TransportFailure::AuthRejected, msg)
    }

    pub fn rejected(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::new(TransportFailure::Rejected { status }, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(TransportFailure::Unsupported, msg)
    }

    /// Non-success HTTP status with its response body as diagnostic.
    pub fn from_status(status: u16, body: &str) -> Self {
        let err = Self::new(
            TransportFailure::from_status(status),
            format!("Endpoint returned HTTP {status}"),
        );
        if body.trim().is_empty() {
            err
        } else {
            err.with_diagnostic(body.trim())
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::ambiguous(format!("No response within {}s", after.as_secs_f32()))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.failure, self.message)
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Self::not_sent(format!("Connection failed: {e}"))
        } else if e.is_builder() {
            Self::not_sent(format!("Request could not be built: {e}"))
        } else if e.is_timeout() {
            Self::ambiguous(format!("Request timed out: {e}"))
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), "")
        } else {
            Self::ambiguous(format!("HTTP error: {e}"))
        }
    }
}

/// Executes requests against an endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs ("rest", "sdk", …).
    fn name(&self) -> &'static str;

    fn output_format(&self) -> OutputFormat;

    /// Whether this transport can express the operation at all. Checked
    /// before any session or network work.
    fn supports(&self, _params: &ValidatedParams) -> bool {
        true
    }

    /// Run one attempt, bounded by `timeout`.
    async fn execute(&self, request: &Request, timeout: Duration)
        -> Result<RawResult, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(TransportFailure::from_status(401), TransportFailure::AuthExpired);
        assert_eq!(
            TransportFailure::from_status(503),
            TransportFailure::Unavailable { status: 503 }
        );
        assert_eq!(TransportFailure::from_status(504), TransportFailure::Ambiguous);
        assert_eq!(
            TransportFailure::from_status(404),
            TransportFailure::Rejected { status: Some(404) }
        );
    }

    #[test]
    fn not_applied_only_for_confirmed_cases() {
        assert!(TransportFailure::NotSent.not_applied());
        assert!(TransportFailure::Unavailable { status: 429 }.not_applied());
        assert!(!TransportFailure::Ambiguous.not_applied());
        assert!(!TransportFailure::Rejected { status: None }.not_applied());
    }

    #[test]
    fn raw_result_diagnostic_prefers_stderr() {
        let mut raw = RawResult::failed(OutputFormat::KeyValue, 2, "  no such VM \n");
        raw.stdout = "partial".into();
        assert_eq!(raw.diagnostic(), "no such VM");
        raw.stderr.clear();
        assert_eq!(raw.diagnostic(), "partial");
        assert!(!raw.is_success());
    }

    #[test]
    fn status_error_keeps_body() {
        let e = TransportError::from_status(404, "{\"error_type\":\"NOT_FOUND\"}");
        assert_eq!(e.failure, TransportFailure::Rejected { status: Some(404) });
        assert!(e.diagnostic.unwrap().contains("NOT_FOUND"));
    }
}
