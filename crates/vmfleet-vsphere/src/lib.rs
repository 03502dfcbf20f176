//! # vmfleet – vSphere fleet management client
//!
//! Validated, retry-aware access to vCenter / ESXi inventory and
//! lifecycle operations, over the vSphere Automation REST API or the
//! vSphere Perl SDK utility scripts.
//!
//! ## Modules
//!
//! - **types**: Typed result records, result shapes and action enums
//! - **error**: Crate-specific error types
//! - **config**: Client configuration (JSON file / env)
//! - **catalog**: Operation registry with declarative parameter schemas
//! - **request**: Builds transport-ready requests from validated params
//! - **session**: Credential slot with single-flight renewal
//! - **transport**: Transport trait, raw results, failure classification
//! - **vsphere**: vSphere REST transport + session authenticator
//! - **sdk**: Perl SDK script transport (no shell, env credentials)
//! - **parser**: JSON and `Key: value` output → typed results
//! - **retry**: Backoff and per-idempotency retry decisions
//! - **service**: `VmwareClient` façade (generic `invoke` + typed methods)
//! - **simulated**: In-memory transport / authenticator for tests

pub mod types;
pub mod error;
pub mod config;
pub mod catalog;
pub mod request;
pub mod session;
pub mod transport;
pub mod vsphere;
pub mod sdk;
pub mod parser;
pub mod retry;
pub mod service;
pub mod simulated;

pub use catalog::{Idempotency, OperationCatalog, OperationSpec, ValidatedParams};
pub use config::{ClientConfig, ClientConfigSafe, TransportKind};
pub use error::{VmwareError, VmwareErrorKind, VmwareResult};
pub use service::{VmwareClient, VmwareClientHandle};
pub use transport::{OutputFormat, RawResult, Transport, TransportError, TransportFailure};
pub use types::*;
