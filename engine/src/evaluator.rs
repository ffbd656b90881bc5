//! Completion evaluation and grading.

use learnova_types::{Enrollment, PassThreshold};

/// Completion fraction in `[0, 1]`.
///
/// An enrollment with no modules evaluates to 0 and is never eligible for a
/// credential.
#[must_use]
pub fn evaluate(enrollment: &Enrollment) -> f64 {
    if enrollment.modules.is_empty() {
        return 0.0;
    }
    enrollment.completed_count() as f64 / enrollment.module_count() as f64
}

/// Whether every module of a non-empty enrollment is completed.
#[must_use]
pub fn is_complete(enrollment: &Enrollment) -> bool {
    !enrollment.modules.is_empty()
        && enrollment.completed_count() == enrollment.module_count()
}

/// Recompute the stored completion fraction and the one-shot completion
/// trigger.
///
/// Returns `true` only on the call that first observes 100% completion, so
/// redundant re-evaluation (e.g. repeated refreshes of the same state) fires
/// the completion event exactly once. The stored fraction never decreases.
pub fn refresh(enrollment: &mut Enrollment) -> bool {
    let fraction = evaluate(enrollment);
    if fraction > enrollment.completion_pct {
        enrollment.completion_pct = fraction;
    }

    if is_complete(enrollment) && !enrollment.completion_triggered {
        enrollment.completion_triggered = true;
        return true;
    }
    false
}

/// Letter grade for the issuance request, derived from the average of the
/// latest recorded scores.
#[must_use]
pub fn grade_for(enrollment: &Enrollment, threshold: PassThreshold) -> String {
    match enrollment.average_score() {
        Some(avg) if avg >= 90.0 => "Distinction".to_string(),
        Some(avg) if avg >= threshold.value() => "Pass".to_string(),
        _ => "Completed".to_string(),
    }
}
