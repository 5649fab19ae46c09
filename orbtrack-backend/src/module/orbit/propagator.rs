use chrono::{DateTime, Utc};
use orbtrack_common::{CatalogId, ElementSet, StateVector};

use crate::error::{TrackerError, TrackerResult};

/// SGP4/SDP4 wrapper around one validated element set
pub struct OrbitalPropagator {
    element_set: ElementSet,
    constants: sgp4::Constants,
}

impl OrbitalPropagator {
    pub fn new(element_set: &ElementSet) -> TrackerResult<Self> {
        let failure = |reason: String| TrackerError::PropagationFailure {
            object_id: element_set.catalog_id,
            instant: element_set.epoch,
            reason,
        };

        let elements = sgp4::Elements::from_tle(
            Some(element_set.name.clone()),
            element_set.line1.as_bytes(),
            element_set.line2.as_bytes(),
        )
        .map_err(|e| failure(e.to_string()))?;
        let constants = sgp4::Constants::from_elements(&elements).map_err(|e| failure(e.to_string()))?;

        Ok(Self {
            element_set: element_set.clone(),
            constants,
        })
    }

    pub fn catalog_id(&self) -> CatalogId {
        self.element_set.catalog_id
    }

    pub fn element_set(&self) -> &ElementSet {
        &self.element_set
    }

    /// Signed minutes from the element epoch to `instant`
    pub fn minutes_since_epoch(&self, instant: DateTime<Utc>) -> f64 {
        (instant - self.element_set.epoch).num_milliseconds() as f64 / 60_000.0
    }

    /// ECI state at `instant`. Instants before the epoch are flagged, not refused.
    pub fn state_at(&self, instant: DateTime<Utc>) -> TrackerResult<StateVector> {
        let minutes = self.minutes_since_epoch(instant);
        let failure = |reason: String| TrackerError::PropagationFailure {
            object_id: self.element_set.catalog_id,
            instant,
            reason,
        };

        let prediction = self
            .constants
            .propagate(sgp4::MinutesSinceEpoch(minutes))
            .map_err(|e| failure(e.to_string()))?;

        let state = StateVector {
            instant,
            position_km: prediction.position,
            velocity_km_s: prediction.velocity,
            epoch_offset_minutes: minutes,
        };

        if !state.is_finite() {
            return Err(failure("non-finite state vector".to_string()));
        }

        if state.predates_epoch() {
            tracing::warn!(
                "Propagating {} ({}) {:.1} min before its element epoch",
                self.element_set.name,
                self.element_set.catalog_id,
                -minutes
            );
        }
        Ok(state)
    }
}
