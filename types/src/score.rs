//! Quiz score and pass-threshold invariant types.
//!
//! These types guarantee valid score configurations by construction: a
//! [`Score`] or [`PassThreshold`] outside `[0, 100]` cannot exist.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum ScoreError {
    #[error("score {0} is outside the valid range [0, 100]")]
    OutOfRange(f64),
    #[error("score must be a finite number")]
    NotFinite,
}

/// A quiz score in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Score(f64);

impl Score {
    pub fn new(value: f64) -> Result<Self, ScoreError> {
        if !value.is_finite() {
            return Err(ScoreError::NotFinite);
        }
        if !(0.0..=100.0).contains(&value) {
            return Err(ScoreError::OutOfRange(value));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Whether this score meets or exceeds the given pass threshold.
    #[must_use]
    pub fn passes(self, threshold: PassThreshold) -> bool {
        self.0 >= threshold.value()
    }
}

impl TryFrom<f64> for Score {
    type Error = ScoreError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Score> for f64 {
    fn from(value: Score) -> Self {
        value.0
    }
}

/// Minimum score required to mark a module completed.
///
/// A per-course configuration value; never hardcoded at call sites.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct PassThreshold(f64);

impl PassThreshold {
    pub fn new(value: f64) -> Result<Self, ScoreError> {
        if !value.is_finite() {
            return Err(ScoreError::NotFinite);
        }
        if !(0.0..=100.0).contains(&value) {
            return Err(ScoreError::OutOfRange(value));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for PassThreshold {
    type Error = ScoreError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PassThreshold> for f64 {
    fn from(value: PassThreshold) -> Self {
        value.0
    }
}

impl Default for PassThreshold {
    /// Matches the product default: anything above half marks passes.
    fn default() -> Self {
        Self(50.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_accepts_bounds() {
        assert!(Score::new(0.0).is_ok());
        assert!(Score::new(100.0).is_ok());
        assert!(Score::new(59.5).is_ok());
    }

    #[test]
    fn score_rejects_out_of_range() {
        assert_eq!(Score::new(-0.1), Err(ScoreError::OutOfRange(-0.1)));
        assert_eq!(Score::new(100.1), Err(ScoreError::OutOfRange(100.1)));
    }

    #[test]
    fn score_rejects_nan_and_infinity() {
        assert_eq!(Score::new(f64::NAN), Err(ScoreError::NotFinite));
        assert_eq!(Score::new(f64::INFINITY), Err(ScoreError::NotFinite));
    }

    #[test]
    fn passes_is_inclusive() {
        let threshold = PassThreshold::new(60.0).unwrap();
        assert!(Score::new(60.0).unwrap().passes(threshold));
        assert!(!Score::new(59.9).unwrap().passes(threshold));
    }

    #[test]
    fn serde_enforces_range() {
        assert!(serde_json::from_str::<Score>("101.0").is_err());
        let score: Score = serde_json::from_str("80.0").unwrap();
        assert_eq!(score.value(), 80.0);
    }
}
