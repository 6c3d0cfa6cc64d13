//! Error taxonomy shared by every TwinSync crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of the Observation Adapter (the vision classifier).
///
/// A classifier failure never produces a [`CheckResult`][crate::CheckResult]:
/// the attempt is dropped so it cannot pollute streak or recurrence
/// statistics.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierError {
    #[error("classifier timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("classifier request failed: {0}")]
    Http(String),

    #[error("classifier quota exceeded, try again later")]
    QuotaExceeded,

    #[error("classifier returned a malformed verdict: {0}")]
    Malformed(String),
}

/// Global error type spanning classifier failures, check serialisation,
/// configuration problems and persistence faults.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpotError {
    #[error("Classifier Error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Check already in progress for spot '{0}'")]
    CheckInProgress(String),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Camera fault on {camera}: {details}")]
    Camera { camera: String, details: String },

    #[error("Unknown spot: {0}")]
    UnknownSpot(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl SpotError {
    /// `true` for failures of a single check attempt (camera or classifier),
    /// which are recovered by simply retrying at the next cadence.
    pub fn is_check_failure(&self) -> bool {
        matches!(self, SpotError::Classifier(_) | SpotError::Camera { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_error_converts_into_spot_error() {
        let err: SpotError = ClassifierError::Timeout { after_secs: 90 }.into();
        assert!(matches!(err, SpotError::Classifier(ClassifierError::Timeout { after_secs: 90 })));
        assert!(err.to_string().contains("timed out after 90s"));
    }

    #[test]
    fn check_failures_are_classified() {
        assert!(SpotError::from(ClassifierError::QuotaExceeded).is_check_failure());
        assert!(
            SpotError::Camera {
                camera: "desk_cam".into(),
                details: "offline".into()
            }
            .is_check_failure()
        );
        assert!(!SpotError::CheckInProgress("desk".into()).is_check_failure());
        assert!(!SpotError::InvalidDefinition("empty".into()).is_check_failure());
    }

    #[test]
    fn spot_error_serialization_roundtrip() {
        let err = SpotError::Camera {
            camera: "hall".into(),
            details: "HTTP 503".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: SpotError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
