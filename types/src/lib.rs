//! Core domain types for Learnova enrollments.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the system.
//!
//! The central type is [`Enrollment`]: one learner's progress record for one
//! course, holding an ordered list of [`ModuleProgress`] entries and a
//! [`CredentialRecord`] describing the completion credential, if any.
//!
//! Invariants are enforced by construction where practical:
//! - [`LearnerId`] and [`CourseId`] are non-empty by construction.
//! - [`Score`] is always within `[0, 100]`.
//! - [`PassThreshold`] is always within `[0, 100]`.
//! - [`CredentialStatus`] transitions are validated by
//!   [`CredentialStatus::can_transition_to`].

mod credential;
mod enrollment;
mod ids;
mod score;

pub use credential::{CredentialRecord, CredentialStatus, IssuedCredential};
pub use enrollment::{Enrollment, ModuleProgress};
pub use ids::{CourseId, EnrollmentKey, IdError, LearnerId};
pub use score::{PassThreshold, Score, ScoreError};
