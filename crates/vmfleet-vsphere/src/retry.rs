//! Retry / failure policy.
//!
//! Decides, per failed attempt, whether to back off and retry, re-login
//! once, or surface the failure, and turns the final transport failure
//! into the caller-facing error class.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::catalog::Idempotency;
use crate::config::ClientConfig;
use crate::error::VmwareError;
use crate::transport::{TransportError, TransportFailure};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { after: Duration },
    /// Drop the credential, log in again and repeat the attempt.
    Reauthenticate,
    Surface,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base_ms: config.backoff_base_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Upper bound of the backoff before retry number `attempt + 1`.
    pub fn ceiling_ms(&self, attempt: u32) -> u64 {
        let exponential = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        exponential.min(self.max_backoff_ms)
    }

    /// Full jitter: uniform between zero and the capped exponential.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let capped = self.ceiling_ms(attempt);
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=capped))
    }

    /// Retry budget for an operation class. Non-idempotent mutations get
    /// at most one retry.
    pub fn budget(&self, idempotency: Idempotency) -> u32 {
        match idempotency {
            Idempotency::Read | Idempotency::IdempotentMutate => self.max_retries,
            Idempotency::NonIdempotentMutate => self.max_retries.min(1),
        }
    }

    /// `retries` is the number of retries already spent; `reauthenticated`
    /// whether the single re-login has been used.
    pub fn decide(
        &self,
        idempotency: Idempotency,
        failure: &TransportFailure,
        retries: u32,
        reauthenticated: bool,
    ) -> Decision {
        let within_budget = retries < self.budget(idempotency);
        match failure {
            TransportFailure::AuthExpired if !reauthenticated => Decision::Reauthenticate,
            TransportFailure::AuthExpired
            | TransportFailure::AuthRejected
            | TransportFailure::Rejected { .. }
            | TransportFailure::Unsupported => Decision::Surface,
            TransportFailure::NotSent | TransportFailure::Unavailable { .. } => {
                if within_budget {
                    Decision::Retry {
                        after: self.backoff(retries),
                    }
                } else {
                    Decision::Surface
                }
            }
            TransportFailure::Ambiguous => match idempotency {
                Idempotency::NonIdempotentMutate => Decision::Surface,
                _ if within_budget => Decision::Retry {
                    after: self.backoff(retries),
                },
                _ => Decision::Surface,
            },
        }
    }

    /// Caller-facing error for a failure that will not be retried.
    pub fn surface(
        &self,
        operation: &str,
        idempotency: Idempotency,
        err: TransportError,
        attempts: u32,
    ) -> VmwareError {
        let surfaced = match err.failure {
            TransportFailure::AuthExpired => VmwareError::auth(format!(
                "{operation}: session rejected again after re-login: {}",
                err.message
            )),
            TransportFailure::AuthRejected => {
                VmwareError::auth(format!("{operation}: {}", err.message))
            }
            TransportFailure::NotSent | TransportFailure::Unavailable { .. } => {
                VmwareError::transient(
                    format!(
                        "{operation}: gave up after {attempts} attempt(s): {}",
                        err.message
                    ),
                    false,
                    attempts,
                )
            }
            TransportFailure::Ambiguous => {
                let ambiguous = idempotency.is_mutating();
                let msg = if ambiguous {
                    format!(
                        "{operation}: outcome unknown after {attempts} attempt(s), \
                         the endpoint may have applied it: {}",
                        err.message
                    )
                } else {
                    format!(
                        "{operation}: gave up after {attempts} attempt(s): {}",
                        err.message
                    )
                };
                VmwareError::transient(msg, ambiguous, attempts)
            }
            TransportFailure::Rejected { status } => {
                VmwareError::permanent(status, format!("{operation}: {}", err.message))
            }
            TransportFailure::Unsupported => {
                VmwareError::unsupported(format!("{operation}: {}", err.message))
            }
        };
        match err.diagnostic {
            Some(d) => surfaced.with_diagnostic(d),
            None => surfaced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VmwareErrorKind;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 100,
            max_backoff_ms: 1_000,
        }
    }

    #[test]
    fn ceiling_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.ceiling_ms(0), 100);
        assert_eq!(p.ceiling_ms(1), 200);
        assert_eq!(p.ceiling_ms(3), 800);
        assert_eq!(p.ceiling_ms(4), 1_000);
        assert_eq!(p.ceiling_ms(60), 1_000);
    }

    #[test]
    fn backoff_within_ceiling() {
        let p = policy();
        for attempt in 0..6 {
            assert!(p.backoff(attempt).as_millis() as u64 <= p.ceiling_ms(attempt));
        }
    }

    #[test]
    fn reads_retry_until_budget() {
        let p = policy();
        for retries in 0..3 {
            assert!(matches!(
                p.decide(Idempotency::Read, &TransportFailure::Ambiguous, retries, false),
                Decision::Retry { .. }
            ));
        }
        assert_eq!(
            p.decide(Idempotency::Read, &TransportFailure::Ambiguous, 3, false),
            Decision::Surface
        );
    }

    #[test]
    fn non_idempotent_never_retries_ambiguous() {
        let p = policy();
        assert_eq!(
            p.decide(
                Idempotency::NonIdempotentMutate,
                &TransportFailure::Ambiguous,
                0,
                false
            ),
            Decision::Surface
        );
    }

    #[test]
    fn non_idempotent_retries_not_sent_once() {
        let p = policy();
        assert!(matches!(
            p.decide(Idempotency::NonIdempotentMutate, &TransportFailure::NotSent, 0, false),
            Decision::Retry { .. }
        ));
        assert_eq!(
            p.decide(Idempotency::NonIdempotentMutate, &TransportFailure::NotSent, 1, false),
            Decision::Surface
        );
        assert_eq!(p.budget(Idempotency::NonIdempotentMutate), 1);
        assert_eq!(RetryPolicy::none().budget(Idempotency::NonIdempotentMutate), 0);
    }

    #[test]
    fn auth_expiry_reauthenticates_exactly_once() {
        let p = policy();
        let f = TransportFailure::AuthExpired;
        assert_eq!(
            p.decide(Idempotency::NonIdempotentMutate, &f, 0, false),
            Decision::Reauthenticate
        );
        assert_eq!(
            p.decide(Idempotency::NonIdempotentMutate, &f, 0, true),
            Decision::Surface
        );
    }

    #[test]
    fn permanent_failures_surface_immediately() {
        let p = policy();
        let f = TransportFailure::Rejected { status: Some(404) };
        assert_eq!(p.decide(Idempotency::Read, &f, 0, false), Decision::Surface);
        let err = p.surface(
            "vm.info",
            Idempotency::Read,
            TransportError::rejected(Some(404), "VM not found").with_diagnostic("web09"),
            1,
        );
        assert_eq!(err.kind, VmwareErrorKind::Permanent { status: Some(404) });
        assert_eq!(err.diagnostic.as_deref(), Some("web09"));
    }

    #[test]
    fn surfaced_ambiguity_depends_on_mutation() {
        let p = policy();
        let e = p.surface(
            "vm.power",
            Idempotency::NonIdempotentMutate,
            TransportError::ambiguous("timeout"),
            1,
        );
        assert!(e.is_ambiguous());
        let e = p.surface("host.info", Idempotency::Read, TransportError::ambiguous("t"), 4);
        assert_eq!(
            e.kind,
            VmwareErrorKind::Transient {
                ambiguous: false,
                attempts: 4
            }
        );
    }
}
