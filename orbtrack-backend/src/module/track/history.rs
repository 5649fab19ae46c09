///! Past trail and forward projection per tracked object
use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use orbtrack_common::{CatalogId, GeodeticPoint};
use thiserror::Error;

use crate::config::MAX_PROJECTION_MINUTES;
use crate::error::{TrackerError, TrackerResult};
use crate::module::orbit::{to_geodetic, OrbitalPropagator};

#[derive(Debug, Error, PartialEq)]
pub enum HistoryError {
    #[error("trail of object {object_id} already ends at {last}, refusing {instant}")]
    NonAscending {
        object_id: CatalogId,
        last: DateTime<Utc>,
        instant: DateTime<Utc>,
    },
}

/// Time-ascending, bounded sequence of past sub-satellite points
#[derive(Debug, Clone)]
pub struct TrailBuffer {
    points: VecDeque<GeodeticPoint>,
    cap: usize,
    window: Option<Duration>,
}

impl TrailBuffer {
    pub fn new(cap: usize, window: Option<Duration>) -> Self {
        Self {
            points: VecDeque::with_capacity(cap.min(1024)),
            cap,
            window,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_instant(&self) -> Option<DateTime<Utc>> {
        self.points.back().map(|p| p.instant)
    }

    fn accepts(&self, instant: DateTime<Utc>) -> bool {
        self.last_instant().is_none_or(|last| instant > last)
    }

    /// Caller guarantees `point.instant` is newer than the last point
    fn push(&mut self, point: GeodeticPoint) {
        self.points.push_back(point);
        while self.points.len() > self.cap {
            self.points.pop_front();
        }
        if let Some(horizon) = self.window.and_then(|w| point.instant.checked_sub_signed(w)) {
            while self.points.front().is_some_and(|p| p.instant < horizon) {
                self.points.pop_front();
            }
        }
    }

    pub fn snapshot(&self) -> Vec<GeodeticPoint> {
        self.points.iter().copied().collect()
    }
}

/// Sub-satellite points at `sample_count` evenly spaced instants from `now`
/// to `now + horizon_minutes`, both ends included.
pub fn compute_projection(
    propagator: &OrbitalPropagator,
    now: DateTime<Utc>,
    horizon_minutes: u64,
    sample_count: usize,
) -> TrackerResult<Vec<GeodeticPoint>> {
    if sample_count == 0 {
        return Err(TrackerError::config("projection sample count must be positive"));
    }
    if sample_count > 1 && horizon_minutes == 0 {
        return Err(TrackerError::config("projection horizon must be positive"));
    }
    if horizon_minutes > MAX_PROJECTION_MINUTES {
        return Err(TrackerError::config(format!(
            "projection horizon exceeds {} minutes",
            MAX_PROJECTION_MINUTES
        )));
    }

    let horizon_ms = (horizon_minutes * 60_000) as i64;
    let step_ms = if sample_count > 1 { horizon_ms / (sample_count as i64 - 1) } else { 0 };

    (0..sample_count)
        .map(|i| {
            // Pin the last sample to the horizon so integer steps never fall short
            let offset = if i + 1 == sample_count && sample_count > 1 {
                horizon_ms
            } else {
                step_ms * i as i64
            };
            let state = propagator.state_at(now + Duration::milliseconds(offset))?;
            to_geodetic(&state)
        })
        .collect()
}

/// Trails and projections of every tracked object
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    trails: BTreeMap<CatalogId, TrailBuffer>,
    projections: BTreeMap<CatalogId, Vec<GeodeticPoint>>,
    cap: usize,
    window: Option<Duration>,
}

impl HistoryBuffer {
    pub fn new(cap: usize, window: Option<Duration>) -> Self {
        Self {
            trails: BTreeMap::new(),
            projections: BTreeMap::new(),
            cap,
            window,
        }
    }

    /// Whether `record_tick` would accept a point for `object_id` at `instant`
    pub fn accepts(&self, object_id: CatalogId, instant: DateTime<Utc>) -> bool {
        self.trails.get(&object_id).is_none_or(|t| t.accepts(instant))
    }

    pub fn record_tick(
        &mut self,
        object_id: CatalogId,
        point: GeodeticPoint,
        instant: DateTime<Utc>,
    ) -> Result<(), HistoryError> {
        let (cap, window) = (self.cap, self.window);
        let trail = self
            .trails
            .entry(object_id)
            .or_insert_with(|| TrailBuffer::new(cap, window));

        if let Some(last) = trail.last_instant().filter(|last| instant <= *last) {
            return Err(HistoryError::NonAscending {
                object_id,
                last,
                instant,
            });
        }
        trail.push(GeodeticPoint { instant, ..point });
        Ok(())
    }

    /// Recompute the projection from scratch and store it
    pub fn project_future(
        &mut self,
        propagator: &OrbitalPropagator,
        now: DateTime<Utc>,
        horizon_minutes: u64,
        sample_count: usize,
    ) -> TrackerResult<&[GeodeticPoint]> {
        let path = compute_projection(propagator, now, horizon_minutes, sample_count)?;
        Ok(self.set_projection(propagator.catalog_id(), path))
    }

    pub fn set_projection(&mut self, object_id: CatalogId, path: Vec<GeodeticPoint>) -> &[GeodeticPoint] {
        let slot = self.projections.entry(object_id).or_default();
        *slot = path;
        slot.as_slice()
    }

    pub fn trail(&self, object_id: CatalogId) -> Vec<GeodeticPoint> {
        self.trails.get(&object_id).map(TrailBuffer::snapshot).unwrap_or_default()
    }

    pub fn projection(&self, object_id: CatalogId) -> &[GeodeticPoint] {
        self.projections.get(&object_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Drop buffers of objects no longer tracked
    pub fn retain(&mut self, tracked: &[CatalogId]) {
        self.trails.retain(|id, _| tracked.contains(id));
        self.projections.retain(|id, _| tracked.contains(id));
    }

    pub fn clear(&mut self) {
        self.trails.clear();
        self.projections.clear();
    }
}
