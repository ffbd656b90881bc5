//! Engine events for host-side observers.
//!
//! All components emit through an [`EventSink`], a cloneable handle over an
//! unbounded channel. A sink with no receiver (or a dropped receiver) is
//! valid: emission is fire-and-forget and never fails the operation that
//! produced the event.

use tokio::sync::mpsc;

use learnova_types::EnrollmentKey;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Fired exactly once per enrollment, when completion first reaches 100%.
    CourseCompleted {
        key: EnrollmentKey,
        completion_pct: f64,
    },
    CredentialIssued {
        key: EnrollmentKey,
        credential_id: String,
    },
    CredentialFailed {
        key: EnrollmentKey,
        reason: String,
        retry_count: u32,
    },
}

#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventSink {
    /// A sink wired to a fresh channel.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: EngineEvent) {
        let Some(tx) = &self.tx else { return };
        if tx.send(event).is_err() {
            tracing::debug!("engine event receiver dropped; event discarded");
        }
    }
}
