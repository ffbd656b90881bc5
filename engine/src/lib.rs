//! Course progression tracking and at-most-once credential issuance.
//!
//! # Architecture
//!
//! The engine is organized around one durable record per (learner, course)
//! pair, flowing through four components:
//!
//! | Component | Responsibility |
//! |-----------|----------------|
//! | [`ProgressTracker`] | Records quiz outcomes, enforces unlock order |
//! | [`unlock`] | Pure accessibility policy over enrollment state |
//! | [`evaluator`] | Completion fraction, one-shot completion trigger, grade |
//! | [`CredentialIssuanceCoordinator`] | At-most-once issuance against the external authority |
//!
//! A quiz-completion event enters the tracker, which validates the unlock
//! precondition, records the attempt, and re-evaluates completion. The first
//! time an enrollment reaches 100%, a [`EngineEvent::CourseCompleted`] fires
//! (exactly once) and the host invokes the coordinator, which serializes
//! against the store's compare-and-swap claim and calls the authority.
//!
//! # Concurrency
//!
//! All tracker and evaluator operations are synchronous; the authority call
//! inside the coordinator is the sole suspension point. Multiple triggers
//! (module-completion handlers, explicit retries, re-evaluation on reload)
//! may race on one enrollment: the claim step guarantees a single authority
//! call, and everything else is idempotent.

mod coordinator;
mod errors;
mod events;
mod tracker;

pub mod evaluator;
pub mod unlock;

pub use coordinator::{CredentialIssuanceCoordinator, IssuanceContext, ReconcileOutcome};
pub use errors::EngineError;
pub use events::{EngineEvent, EventSink};
pub use tracker::{ProgressTracker, RecordOutcome};

use std::sync::Arc;
use std::time::Duration;

use learnova_authority::AuthorityClient;
use learnova_config::EngineConfig;
use learnova_store::EnrollmentStore;
use learnova_types::{CredentialRecord, EnrollmentKey, PassThreshold};

/// Fully wired progression engine: one store, one authority, shared events.
pub struct Engine<A> {
    tracker: ProgressTracker,
    coordinator: CredentialIssuanceCoordinator<A>,
    staleness_window: Duration,
}

impl<A: AuthorityClient> Engine<A> {
    /// Open the enrollment store at the configured path and wire the
    /// components together.
    pub fn new(config: &EngineConfig, authority: A, events: EventSink) -> Result<Self, EngineError> {
        let store = Arc::new(EnrollmentStore::open(config.store_path())?);
        Ok(Self::with_store(
            store,
            authority,
            config.pass_threshold(),
            config.staleness_window(),
            events,
        ))
    }

    /// Wire the components over an existing store (tests use in-memory).
    #[must_use]
    pub fn with_store(
        store: Arc<EnrollmentStore>,
        authority: A,
        pass_threshold: PassThreshold,
        staleness_window: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            tracker: ProgressTracker::new(Arc::clone(&store), pass_threshold, events.clone()),
            coordinator: CredentialIssuanceCoordinator::new(
                store,
                authority,
                pass_threshold,
                events,
            ),
            staleness_window,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    #[must_use]
    pub fn coordinator(&self) -> &CredentialIssuanceCoordinator<A> {
        &self.coordinator
    }

    /// Issue the credential for a fully completed enrollment.
    pub async fn issue_credential_if_eligible(
        &self,
        key: &EnrollmentKey,
        context: &IssuanceContext,
    ) -> Result<CredentialRecord, EngineError> {
        self.coordinator
            .issue_credential_if_eligible(key, context)
            .await
    }

    /// Resolve claims left `pending` by a crashed process, using the
    /// configured staleness window.
    pub async fn reconcile_stale_pending(
        &self,
    ) -> Result<Vec<(EnrollmentKey, ReconcileOutcome)>, EngineError> {
        self.coordinator
            .reconcile_stale_pending(self.staleness_window)
            .await
    }
}
