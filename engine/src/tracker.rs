//! Progress tracking: records quiz outcomes and derives completion.

use std::sync::Arc;

use chrono::Utc;

use learnova_store::EnrollmentStore;
use learnova_types::{Enrollment, EnrollmentKey, PassThreshold, Score};

use crate::errors::EngineError;
use crate::events::{EngineEvent, EventSink};
use crate::{evaluator, unlock};

/// Result of recording one quiz attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordOutcome {
    /// Whether the module counts as completed after this attempt. Stays
    /// `true` for a previously-completed module even if this attempt scored
    /// below the threshold.
    pub module_completed: bool,
    /// Completion fraction after this attempt.
    pub completion_pct: f64,
    /// Whether this attempt completed the course (first 100% observation).
    pub course_completed: bool,
}

/// Records per-module quiz outcomes against the enrollment store.
#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<EnrollmentStore>,
    pass_threshold: PassThreshold,
    events: EventSink,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(store: Arc<EnrollmentStore>, pass_threshold: PassThreshold, events: EventSink) -> Self {
        Self {
            store,
            pass_threshold,
            events,
        }
    }

    /// Create the enrollment record for a (learner, course) pair.
    ///
    /// Called when module content is first generated; `module_count` is the
    /// generated module count. Enrolling the same pair twice is an error.
    pub fn enroll(
        &self,
        key: EnrollmentKey,
        module_count: usize,
    ) -> Result<Enrollment, EngineError> {
        let enrollment = Enrollment::new(key, module_count, Utc::now());
        self.store.put(&enrollment)?;
        tracing::info!(key = %enrollment.key, modules = module_count, "enrollment created");
        Ok(enrollment)
    }

    /// Record a quiz attempt for one module.
    ///
    /// The module must be unlocked ([`unlock::is_unlocked`]) and the score
    /// within `[0, 100]`; otherwise the call fails with no state change.
    ///
    /// `attempts` always increments and `score` always reflects the latest
    /// attempt, but `completed` is monotonic: once a module passed, a worse
    /// retake updates the displayed score and leaves `completed` alone.
    pub fn record_module_result(
        &self,
        key: &EnrollmentKey,
        module_index: usize,
        score: f64,
    ) -> Result<RecordOutcome, EngineError> {
        let score = Score::new(score).map_err(|e| EngineError::Validation(e.to_string()))?;

        let enrollment = self
            .store
            .get(key)?
            .ok_or_else(|| EngineError::UnknownEnrollment(key.clone()))?;
        if module_index >= enrollment.module_count() {
            return Err(EngineError::Validation(format!(
                "module index {module_index} out of range for {} modules",
                enrollment.module_count()
            )));
        }
        if !unlock::is_unlocked(&enrollment, module_index) {
            return Err(EngineError::ModuleLocked {
                index: module_index,
            });
        }

        let threshold = self.pass_threshold;
        let mut module_completed = false;
        let mut course_completed = false;
        let updated = self.store.update(key, |e| {
            let module = &mut e.modules[module_index];
            module.attempts = module.attempts.saturating_add(1);
            module.score = Some(score);
            if score.passes(threshold) {
                module.completed = true;
            }
            module_completed = module.completed;
            course_completed = evaluator::refresh(e);
        })?;

        tracing::debug!(
            %key,
            module = module_index,
            score = score.value(),
            completed = module_completed,
            completion = updated.completion_pct,
            "module result recorded"
        );

        if course_completed {
            self.events.emit(EngineEvent::CourseCompleted {
                key: key.clone(),
                completion_pct: updated.completion_pct,
            });
        }

        Ok(RecordOutcome {
            module_completed,
            completion_pct: updated.completion_pct,
            course_completed,
        })
    }

    /// Completion fraction for an enrollment; non-decreasing over its life.
    pub fn completion(&self, key: &EnrollmentKey) -> Result<f64, EngineError> {
        let enrollment = self
            .store
            .get(key)?
            .ok_or_else(|| EngineError::UnknownEnrollment(key.clone()))?;
        Ok(enrollment.completion_pct)
    }

    /// Whether `module_index` is currently accessible.
    pub fn is_unlocked(
        &self,
        key: &EnrollmentKey,
        module_index: usize,
    ) -> Result<bool, EngineError> {
        let enrollment = self
            .store
            .get(key)?
            .ok_or_else(|| EngineError::UnknownEnrollment(key.clone()))?;
        Ok(unlock::is_unlocked(&enrollment, module_index))
    }
}
