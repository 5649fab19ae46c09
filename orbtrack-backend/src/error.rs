///! Error taxonomy of the tracking pipeline
use chrono::{DateTime, Utc};
use orbtrack_common::CatalogId;
use thiserror::Error;

/// Failures surfaced by the pipeline stages.
///
/// Only `ConfigurationError` is ever fatal; everything else is isolated to a
/// single object or recovered by a fallback.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Every remote element-set source failed; the embedded fallback was used
    #[error("element set acquisition failed for '{filter}': {reason}")]
    AcquisitionFailure { filter: String, reason: String },

    /// The propagator could not produce a usable state vector
    #[error("propagation failed for object {object_id} at {instant}: {reason}")]
    PropagationFailure {
        object_id: CatalogId,
        instant: DateTime<Utc>,
        reason: String,
    },

    /// Degenerate geometry in a coordinate conversion
    #[error("coordinate transform undefined: {0}")]
    TransformUndefined(String),

    /// Invalid observer, threshold, or pipeline settings
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl TrackerError {
    pub fn config(msg: impl Into<String>) -> Self {
        TrackerError::ConfigurationError(msg.into())
    }

    pub fn undefined(msg: impl Into<String>) -> Self {
        TrackerError::TransformUndefined(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TrackerError::ConfigurationError(_))
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
