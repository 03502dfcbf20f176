//! Error types for the vSphere fleet client.
//!
//! Every public call surfaces a [`VmwareError`] whose kind places it in
//! one of the caller-facing classes: authentication, validation,
//! transient (retries exhausted or outcome ambiguous), permanent remote
//! rejection, or unparseable output.

use std::fmt;

/// Categorised error kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmwareErrorKind {
    /// Bad credential or endpoint refused the login. Never retried.
    Authentication,
    /// Missing, unknown or out-of-range parameter. Never reaches a transport.
    Validation,
    /// The operation name is not in the catalog.
    UnknownOperation,
    /// Network / timeout failure. `ambiguous` is set when the request may
    /// already have been applied remotely.
    Transient { ambiguous: bool, attempts: u32 },
    /// The endpoint rejected the operation (unknown VM, conflict, 4xx).
    Permanent { status: Option<u16> },
    /// Raw output could not be turned into typed records, or the
    /// operation reported failure through its output.
    Parse,
    /// The selected transport cannot express this operation.
    Unsupported,
    /// Client configuration is unusable.
    Config,
}

/// Crate error type carrying a kind + human-readable message.
#[derive(Debug, Clone)]
pub struct VmwareError {
    pub kind: VmwareErrorKind,
    pub message: String,
    /// Raw diagnostic text from the endpoint or the script, if any.
    pub diagnostic: Option<String>,
}

impl VmwareError {
    pub fn new(kind: VmwareErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            diagnostic: None,
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::Authentication, msg)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::Validation, msg)
    }

    pub fn unknown_operation(name: &str) -> Self {
        Self::new(
            VmwareErrorKind::UnknownOperation,
            format!("No operation named '{name}' in the catalog"),
        )
    }

    pub fn transient(msg: impl Into<String>, ambiguous: bool, attempts: u32) -> Self {
        Self::new(VmwareErrorKind::Transient { ambiguous, attempts }, msg)
    }

    pub fn permanent(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::Permanent { status }, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::Parse, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::Unsupported, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::Config, msg)
    }

    pub fn is_auth(&self) -> bool {
        self.kind == VmwareErrorKind::Authentication
    }

    pub fn is_validation(&self) -> bool {
        self.kind == VmwareErrorKind::Validation
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind, VmwareErrorKind::Transient { .. })
    }

    /// True for a transient failure whose remote effect is unknown.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self.kind,
            VmwareErrorKind::Transient {
                ambiguous: true,
                ..
            }
        )
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self.kind, VmwareErrorKind::Permanent { .. })
    }

    pub fn is_parse(&self) -> bool {
        self.kind == VmwareErrorKind::Parse
    }
}

impl fmt::Display for VmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if let Some(ref d) = self.diagnostic {
            write!(f, ": {}", d.trim())?;
        }
        Ok(())
    }
}

impl std::error::Error for VmwareError {}

impl From<VmwareError> for String {
    fn from(e: VmwareError) -> String {
        e.to_string()
    }
}

impl From<serde_json::Error> for VmwareError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(format!("JSON parse error: {e}"))
    }
}

impl From<std::io::Error> for VmwareError {
    fn from(e: std::io::Error) -> Self {
        Self::config(format!("I/O error: {e}"))
    }
}

/// Convenience alias.
pub type VmwareResult<T> = Result<T, VmwareError>;
