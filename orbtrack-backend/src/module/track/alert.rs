///! Threshold state machines per (object, observer, kind)
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use orbtrack_common::{
    AlertEvent, AlertStatus, AlertThresholds, CatalogId, ObserverLocation, ThresholdKind,
    TopocentricView,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlertState {
    pub status: AlertStatus,
    /// Instant of the last transition; `None` until the first one
    pub since: Option<DateTime<Utc>>,
}

type AlertKey = (CatalogId, String, ThresholdKind);

fn measured(kind: ThresholdKind, view: &TopocentricView) -> f64 {
    match kind {
        ThresholdKind::Distance => view.range_km,
        ThresholdKind::Elevation => view.elevation_deg,
    }
}

/// Distance alerts when at or inside the limit, elevation when at or above it
fn in_alert_range(kind: ThresholdKind, thresholds: &AlertThresholds, value: f64) -> bool {
    if !thresholds.is_enabled(kind) {
        return false;
    }
    match kind {
        ThresholdKind::Distance => value <= thresholds.distance_km,
        ThresholdKind::Elevation => value >= thresholds.elevation_deg,
    }
}

#[derive(Debug, Default)]
pub struct AlertEvaluator {
    states: BTreeMap<AlertKey, AlertState>,
}

impl AlertEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the state machines of one (object, observer) pair.
    ///
    /// Returns one event per transition. An undefined view leaves every state untouched.
    pub fn evaluate(
        &mut self,
        object_id: CatalogId,
        object_name: &str,
        observer: &ObserverLocation,
        view: Option<&TopocentricView>,
        instant: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        let Some(view) = view else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for kind in ThresholdKind::ALL {
            let value = measured(kind, view);
            let next = if in_alert_range(kind, &observer.thresholds, value) {
                AlertStatus::Firing
            } else {
                AlertStatus::Quiet
            };

            let state = self
                .states
                .entry((object_id, observer.name.clone(), kind))
                .or_default();
            if state.status == next {
                continue;
            }

            *state = AlertState {
                status: next,
                since: Some(instant),
            };
            events.push(AlertEvent {
                id: Uuid::now_v7(),
                object_id,
                object_name: object_name.to_string(),
                observer: observer.name.clone(),
                kind,
                state: next,
                value,
                timestamp: instant,
            });
        }
        events
    }

    pub fn state(&self, object_id: CatalogId, observer: &str, kind: ThresholdKind) -> AlertState {
        self.states
            .get(&(object_id, observer.to_string(), kind))
            .copied()
            .unwrap_or_default()
    }

    /// Number of pairs currently firing
    pub fn firing_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| s.status == AlertStatus::Firing)
            .count()
    }

    pub fn remove_observer(&mut self, observer: &str) {
        self.states.retain(|(_, name, _), _| name != observer);
    }

    pub fn retain_objects(&mut self, tracked: &[CatalogId]) {
        self.states.retain(|(id, _, _), _| tracked.contains(id));
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
