//! Module unlock policy.

use learnova_types::Enrollment;

/// Whether `module_index` is accessible to the learner.
///
/// The first module is always unlocked; every later module unlocks once its
/// predecessor has been completed. This is a pure function of the enrollment
/// state: no side effects, no IO. Once unlocked, a module stays reachable --
/// a later failing retake of the predecessor never re-locks it, because
/// `completed` is monotonic (see the progress tracker).
#[must_use]
pub fn is_unlocked(enrollment: &Enrollment, module_index: usize) -> bool {
    module_index == 0
        || enrollment
            .modules
            .get(module_index - 1)
            .is_some_and(|m| m.completed)
}
