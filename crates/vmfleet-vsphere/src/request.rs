//! Request builder.
//!
//! Turns validated parameters plus a credential into a transport-ready
//! [`Request`]. Parameters stay structured: the script transport gets an
//! argument vector, the REST transport reads fields by name. Nothing is
//! ever joined into a command line.

use std::fmt;
use std::sync::Arc;

use crate::catalog::{Idempotency, OperationSpec, ParamKind, ValidatedParams};
use crate::error::{VmwareError, VmwareResult};
use crate::session::Credential;
use crate::types::ResultShape;

#[derive(Clone)]
pub struct Request {
    spec: &'static OperationSpec,
    params: ValidatedParams,
    credential: Arc<Credential>,
}

impl Request {
    /// Pure: no I/O, same output for the same input.
    pub fn build(
        spec: &'static OperationSpec,
        params: ValidatedParams,
        credential: Arc<Credential>,
    ) -> VmwareResult<Self> {
        if !std::ptr::eq(spec, params.spec()) {
            return Err(VmwareError::validation(format!(
                "Parameters were validated for {}, not {}",
                params.spec().name,
                spec.name
            )));
        }
        Ok(Self {
            spec,
            params,
            credential,
        })
    }

    /// Same request bound to a renewed credential.
    pub fn with_credential(&self, credential: Arc<Credential>) -> Self {
        Self {
            credential,
            ..self.clone()
        }
    }

    pub fn spec(&self) -> &'static OperationSpec {
        self.spec
    }

    pub fn params(&self) -> &ValidatedParams {
        &self.params
    }

    pub fn operation(&self) -> &'static str {
        self.spec.name
    }

    pub fn action(&self) -> Option<&'static str> {
        self.params.action()
    }

    pub fn shape(&self) -> ResultShape {
        self.params.shape()
    }

    pub fn idempotency(&self) -> Idempotency {
        self.params.idempotency()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn credential(&self) -> &Arc<Credential> {
        &self.credential
    }

    /// Argument vector for the SDK script, in schema order: one
    /// `--flag value` pair per supplied field. Secret fields are left
    /// out; see [`Request::secret_env`].
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (param, value) in self.params.iter().filter(|(p, _)| !p.secret) {
            args.push(format!("--{}", param.cli_flag()));
            args.push(match param.kind {
                ParamKind::Flag if value == "true" => "1".to_string(),
                ParamKind::Flag => "0".to_string(),
                _ => value.to_string(),
            });
        }
        args
    }

    /// Secret fields as `VI_<FLAG>` environment variables, which the SDK
    /// option parser reads like the matching `--flag`.
    pub fn secret_env(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter(|(p, _)| p.secret)
            .map(|(p, value)| {
                (
                    format!("VI_{}", p.cli_flag().to_ascii_uppercase()),
                    value.to_string(),
                )
            })
            .collect()
    }

    /// Human-readable rendering with secret values masked, for logs.
    pub fn redacted(&self) -> String {
        let mut out = String::from(self.spec.name);
        for (param, value) in self.params.iter() {
            out.push_str(" --");
            out.push_str(param.cli_flag());
            out.push(' ');
            if param.secret {
                out.push_str("<redacted>");
            } else {
                out.push_str(value);
            }
        }
        out
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("operation", &self.spec.name)
            .field("args", &self.redacted())
            .field("credential", &self.credential)
            .finish()
    }
}
