//! Enrollment and per-module progress records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credential::CredentialRecord;
use crate::ids::EnrollmentKey;
use crate::score::Score;

/// Progress through one module of a course.
///
/// `index` values within an enrollment are contiguous starting at 0. A module
/// at index `i` can only become `completed` after the module at `i - 1` was
/// completed at some prior point; once unlocked, a module stays reachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleProgress {
    pub index: usize,
    pub completed: bool,
    /// Latest attempt's score, not best-of. Absent until the first attempt.
    pub score: Option<Score>,
    pub attempts: u32,
}

impl ModuleProgress {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            index,
            completed: false,
            score: None,
            attempts: 0,
        }
    }
}

/// One learner's progress record for one course.
///
/// Owned exclusively by the progression engine; module outcomes are mutated
/// by the progress tracker and credential state by the issuance coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub key: EnrollmentKey,
    pub modules: Vec<ModuleProgress>,
    /// Derived completion fraction in `[0, 1]`; non-decreasing over the life
    /// of the enrollment.
    pub completion_pct: f64,
    /// One-shot flag: set when completion first reaches 100% so the
    /// completion event fires exactly once.
    pub completion_triggered: bool,
    pub credential: CredentialRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    /// Create a fresh enrollment with `module_count` unstarted modules.
    ///
    /// Called when module content is first generated for a (learner, course)
    /// pair; the module count equals the generated module count.
    #[must_use]
    pub fn new(key: EnrollmentKey, module_count: usize, now: DateTime<Utc>) -> Self {
        Self {
            key,
            modules: (0..module_count).map(ModuleProgress::new).collect(),
            completion_pct: 0.0,
            completion_triggered: false,
            credential: CredentialRecord::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.modules.iter().filter(|m| m.completed).count()
    }

    /// Average of the latest recorded scores, or `None` if no module has
    /// been attempted.
    #[must_use]
    pub fn average_score(&self) -> Option<f64> {
        let scores: Vec<f64> = self
            .modules
            .iter()
            .filter_map(|m| m.score.map(Score::value))
            .collect();
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}
