//! Error taxonomy for progression and issuance operations.
//!
//! Propagation policy:
//! - lock/validation errors are recovered locally (the caller is told why;
//!   nothing was mutated, no retry needed);
//! - transient authority errors are retried internally up to the bound
//!   before surfacing as [`EngineError::AuthorityUnavailable`];
//! - persistence errors are fatal to the operation and never silently
//!   swallowed, since correctness depends on durable state being
//!   authoritative.

use learnova_authority::AuthorityError;
use learnova_store::StoreError;
use learnova_types::EnrollmentKey;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A result was recorded against a module the learner has not unlocked.
    #[error("module {index} is locked; the previous module must be completed first")]
    ModuleLocked { index: usize },

    /// Malformed input: score out of range, module index out of range,
    /// duplicate enrollment.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The compare-and-swap claim was lost to a concurrent caller. Not a
    /// user-facing failure; the winning caller carries the issuance.
    #[error("credential issuance already in progress for this enrollment")]
    IssuanceInProgress,

    /// Issuance was requested before the course reached 100%.
    #[error("enrollment is only {:.0}% complete; credential requires full completion", .completion * 100.0)]
    NotEligible { completion: f64 },

    /// Transient authority failure that survived the retry bound.
    #[error("credential authority unavailable after {attempts} attempts: {reason}")]
    AuthorityUnavailable { attempts: u32, reason: String },

    /// The authority returned a hard error. Recorded as a failed attempt;
    /// eligible for manual retry.
    #[error("credential authority rejected issuance: {reason}")]
    AuthorityRejected { reason: String },

    /// The enrollment store could not be read or written.
    #[error("enrollment persistence failed: {0}")]
    Persistence(StoreError),

    #[error("no enrollment found for {0}")]
    UnknownEnrollment(EnrollmentKey),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownEnrollment(key) => EngineError::UnknownEnrollment(key),
            StoreError::DuplicateEnrollment(key) => {
                EngineError::Validation(format!("enrollment {key} already exists"))
            }
            other => EngineError::Persistence(other),
        }
    }
}

impl From<AuthorityError> for EngineError {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::Unavailable { attempts, reason } => {
                EngineError::AuthorityUnavailable { attempts, reason }
            }
            AuthorityError::Rejected { reason } => EngineError::AuthorityRejected { reason },
            other => EngineError::AuthorityRejected {
                reason: other.to_string(),
            },
        }
    }
}
