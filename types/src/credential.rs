//! Credential record state machine.
//!
//! The credential lifecycle per enrollment:
//!
//! ```text
//! None ──> Pending ──> Issued   (terminal)
//!            │  ^
//!            v  │
//!          Failed  (retryable: Failed ──> Pending)
//! ```
//!
//! `Issued` is terminal: it is never re-entered once left and never left
//! except by explicit voiding, which is outside this system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Issuance state of an enrollment's completion credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    /// Issuance has never been attempted.
    #[default]
    None,
    /// A caller has claimed issuance and the authority call is (or was)
    /// in flight.
    Pending,
    /// The authority issued a credential. Terminal.
    Issued,
    /// The last issuance attempt failed; eligible for retry.
    Failed,
}

impl CredentialStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialStatus::None => "none",
            CredentialStatus::Pending => "pending",
            CredentialStatus::Issued => "issued",
            CredentialStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(CredentialStatus::None),
            "pending" => Some(CredentialStatus::Pending),
            "issued" => Some(CredentialStatus::Issued),
            "failed" => Some(CredentialStatus::Failed),
            _ => None,
        }
    }

    /// Whether the state machine permits `self -> next`.
    #[must_use]
    pub fn can_transition_to(self, next: CredentialStatus) -> bool {
        matches!(
            (self, next),
            (CredentialStatus::None | CredentialStatus::Failed, CredentialStatus::Pending)
                | (
                    CredentialStatus::Pending,
                    CredentialStatus::Issued | CredentialStatus::Failed
                )
        )
    }

    /// Whether a new issuance claim may start from this state.
    #[must_use]
    pub fn is_claimable(self) -> bool {
        matches!(self, CredentialStatus::None | CredentialStatus::Failed)
    }
}

/// A credential as returned by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub credential_id: String,
    pub verify_url: Option<String>,
    pub proof_url: Option<String>,
    /// Transaction hash or equivalent reference into the authority's ledger.
    pub chain_reference: Option<String>,
    pub issued_on: Option<DateTime<Utc>>,
}

/// Local record of an enrollment's credential state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub status: CredentialStatus,
    pub credential_id: Option<String>,
    pub verify_url: Option<String>,
    pub proof_url: Option<String>,
    pub chain_reference: Option<String>,
    pub issued_on: Option<DateTime<Utc>>,
    pub retry_count: u32,
    /// Human-readable reason for the most recent failure.
    pub last_error: Option<String>,
}

impl CredentialRecord {
    /// Fold an authority-issued credential into this record, marking it
    /// `Issued`.
    pub fn mark_issued(&mut self, credential: IssuedCredential) {
        self.status = CredentialStatus::Issued;
        self.credential_id = Some(credential.credential_id);
        self.verify_url = credential.verify_url;
        self.proof_url = credential.proof_url;
        self.chain_reference = credential.chain_reference;
        self.issued_on = credential.issued_on;
        self.last_error = None;
    }

    /// Record a failed attempt: bumps `retry_count` and stores the reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = CredentialStatus::Failed;
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(reason.into());
    }
}
