//! Identifier newtypes for learners, courses, and enrollments.
//!
//! The (learner, course) pair is the idempotency key for credential issuance,
//! so these types are deliberately strict: empty or whitespace-only
//! identifiers are unrepresentable.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("learner id must not be empty")]
    EmptyLearnerId,
    #[error("course id must not be empty")]
    EmptyCourseId,
}

/// Opaque learner identifier supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LearnerId(String);

impl LearnerId {
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(IdError::EmptyLearnerId)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LearnerId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LearnerId> for String {
    fn from(value: LearnerId) -> Self {
        value.0
    }
}

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque course identifier supplied by the content generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CourseId(String);

impl CourseId {
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(IdError::EmptyCourseId)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CourseId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CourseId> for String {
    fn from(value: CourseId) -> Self {
        value.0
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The (learner, course) pair identifying one enrollment.
///
/// This pair is also the idempotency key sent to the credential authority:
/// the authority deduplicates issuance requests by it, and the local
/// compare-and-swap claim serializes on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnrollmentKey {
    pub learner: LearnerId,
    pub course: CourseId,
}

impl EnrollmentKey {
    #[must_use]
    pub fn new(learner: LearnerId, course: CourseId) -> Self {
        Self { learner, course }
    }
}

impl fmt::Display for EnrollmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.learner, self.course)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learner_id_rejects_empty() {
        assert_eq!(LearnerId::new(""), Err(IdError::EmptyLearnerId));
        assert_eq!(LearnerId::new("   "), Err(IdError::EmptyLearnerId));
    }

    #[test]
    fn course_id_rejects_empty() {
        assert_eq!(CourseId::new(""), Err(IdError::EmptyCourseId));
    }

    #[test]
    fn ids_roundtrip_serde() {
        let learner = LearnerId::new("learner-1").unwrap();
        let json = serde_json::to_string(&learner).unwrap();
        assert_eq!(json, "\"learner-1\"");
        let back: LearnerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, learner);
    }

    #[test]
    fn serde_rejects_empty_id() {
        assert!(serde_json::from_str::<LearnerId>("\"\"").is_err());
        assert!(serde_json::from_str::<CourseId>("\" \"").is_err());
    }

    #[test]
    fn key_display_joins_parts() {
        let key = EnrollmentKey::new(
            LearnerId::new("u1").unwrap(),
            CourseId::new("rust-101").unwrap(),
        );
        assert_eq!(key.to_string(), "u1/rust-101");
    }
}
