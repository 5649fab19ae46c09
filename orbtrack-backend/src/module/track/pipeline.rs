///! The per-tick tracking pipeline
///!
///! Owns every mutable buffer (trails, projections, alert states, log). Each
///! tick maps (element sets, instant, settings, prior buffers) to new buffers,
///! alert transitions and a committed snapshot.
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use orbtrack_common::{
    AlertEvent, CatalogId, ElementSet, GeodeticPoint, LogRecord, ObjectSnapshot, ObserverLocation,
    ObserverView, StateVector, TickSnapshot, TopocentricView,
};

use super::alert::AlertEvaluator;
use super::history::{compute_projection, HistoryBuffer};
use super::observers::ObserverRegistry;
use super::telemetry::TelemetryLog;
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::module::elements::{merge_acquisitions, Acquisition};
use crate::module::orbit::{
    footprint_polygon, footprint_radius_km, to_geodetic, to_topocentric, OrbitalPropagator,
};

/// Pipeline settings, injected at construction
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub selected: Vec<String>,
    pub default_match: String,
    pub max_default_objects: usize,
    pub trail_cap: usize,
    pub trail_window: Option<Duration>,
    pub projection_minutes: u64,
    pub projection_samples: usize,
    pub lead: Duration,
    pub element_refresh: Duration,
    /// Re-acquisition delay after a refresh served by the embedded fallback
    pub fallback_retry: Duration,
}

impl TryFrom<&TrackerConfig> for PipelineSettings {
    type Error = TrackerError;

    fn try_from(config: &TrackerConfig) -> TrackerResult<Self> {
        config.validate()?;
        let tracking = &config.tracking;
        Ok(Self {
            selected: tracking.selected.clone(),
            default_match: tracking.default_match.clone(),
            max_default_objects: tracking.max_default_objects,
            trail_cap: tracking.trail_cap,
            trail_window: tracking
                .trail_window_minutes
                .map(|m| minutes("trail window", m))
                .transpose()?,
            projection_minutes: tracking.projection_minutes,
            projection_samples: tracking.projection_samples,
            lead: Duration::try_seconds(tracking.lead_seconds as i64)
                .ok_or_else(|| TrackerError::config("lead time out of range"))?,
            element_refresh: minutes("element refresh period", config.acquisition.refresh_minutes)?,
            fallback_retry: minutes("fallback retry period", config.acquisition.fallback_retry_minutes)?,
        })
    }
}

fn minutes(what: &str, value: u64) -> TrackerResult<Duration> {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_minutes)
        .ok_or_else(|| TrackerError::config(format!("{} out of range", what)))
}

/// Result of one tick
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub snapshot: TickSnapshot,
    pub events: Vec<AlertEvent>,
}

/// Tick-local results of one object, computed before anything is committed
struct ObjectUpdate {
    state: StateVector,
    geodetic: GeodeticPoint,
    lead_point: Option<GeodeticPoint>,
    views: Vec<Option<TopocentricView>>,
    /// Failed projections are stored empty; the current state still commits
    projection: Result<Vec<GeodeticPoint>, TrackerError>,
    record: LogRecord,
}

pub struct TrackingPipeline {
    settings: PipelineSettings,
    observers: ObserverRegistry,
    catalog: Vec<ElementSet>,
    tracked: Vec<OrbitalPropagator>,
    history: HistoryBuffer,
    alerts: AlertEvaluator,
    log: TelemetryLog,
    tick: u64,
    next_refresh: Option<DateTime<Utc>>,
    pending_warnings: Vec<String>,
}

impl TrackingPipeline {
    pub fn new(settings: PipelineSettings, observers: Vec<ObserverLocation>) -> TrackerResult<Self> {
        if settings.trail_cap == 0 {
            return Err(TrackerError::config("trail cap must be positive"));
        }
        let history = HistoryBuffer::new(settings.trail_cap, settings.trail_window);

        Ok(Self {
            observers: ObserverRegistry::new(observers)?,
            settings,
            catalog: Vec::new(),
            tracked: Vec::new(),
            history,
            alerts: AlertEvaluator::new(),
            log: TelemetryLog::new(),
            tick: 0,
            next_refresh: None,
            pending_warnings: Vec::new(),
        })
    }

    pub fn from_config(config: &TrackerConfig) -> TrackerResult<Self> {
        Self::new(PipelineSettings::try_from(config)?, config.observers.clone())
    }

    /// Element sets are due for re-acquisition
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.next_refresh.is_none_or(|due| now >= due)
    }

    /// Replace the catalog with freshly acquired element sets and reselect tracked objects
    pub fn load_elements(&mut self, acquisitions: &[Acquisition], now: DateTime<Utc>) {
        for acquisition in acquisitions {
            if let Some(failure) = acquisition.failure() {
                tracing::warn!("{}; using embedded fallback", failure);
                self.pending_warnings.push(failure.to_string());
            } else if !acquisition.failures.is_empty() {
                tracing::debug!(
                    "Group {} recovered after {} failed sources",
                    acquisition.filter,
                    acquisition.failures.len()
                );
            }
        }

        self.catalog = merge_acquisitions(acquisitions);

        // Fallback data is a stopgap: go back to the remote sources sooner
        let delay = if acquisitions.iter().any(Acquisition::used_fallback) {
            self.settings.fallback_retry
        } else {
            self.settings.element_refresh
        };
        self.next_refresh = Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
        tracing::info!(
            "Loaded {} element sets, next refresh in {} min",
            self.catalog.len(),
            delay.num_minutes()
        );
        self.reselect();
    }

    /// Change the tracked-object selection; empty falls back to the default match
    pub fn select(&mut self, names: Vec<String>) {
        self.settings.selected = names;
        self.reselect();
    }

    fn selection(&self) -> Vec<&ElementSet> {
        if self.settings.selected.is_empty() {
            let needle = self.settings.default_match.to_lowercase();
            return self
                .catalog
                .iter()
                .filter(|set| set.name.to_lowercase().contains(&needle))
                .take(self.settings.max_default_objects)
                .collect();
        }

        let mut chosen: Vec<&ElementSet> = Vec::new();
        for wanted in &self.settings.selected {
            let matched = self.catalog.iter().find(|set| {
                set.name.eq_ignore_ascii_case(wanted.trim()) || set.catalog_id.to_string() == wanted.trim()
            });
            match matched {
                Some(set) if !chosen.iter().any(|c| c.catalog_id == set.catalog_id) => chosen.push(set),
                Some(_) => {}
                None => tracing::warn!("Selected object '{}' not in catalog", wanted),
            }
        }
        chosen
    }

    fn reselect(&mut self) {
        let mut tracked = Vec::new();
        let mut warnings = Vec::new();

        for set in self.selection() {
            match OrbitalPropagator::new(set) {
                Ok(propagator) => tracked.push(propagator),
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", set.name, e);
                    warnings.push(e.to_string());
                }
            }
        }
        // Log ordering within a tick follows catalog id
        tracked.sort_by_key(|p| p.catalog_id());

        if tracked.is_empty() && !self.catalog.is_empty() {
            warnings.push("no catalog objects match the current selection".to_string());
        }

        let ids: Vec<CatalogId> = tracked.iter().map(|p| p.catalog_id()).collect();
        self.history.retain(&ids);
        self.alerts.retain_objects(&ids);
        self.tracked = tracked;
        self.pending_warnings.extend(warnings);
    }

    pub fn tracked_ids(&self) -> Vec<CatalogId> {
        self.tracked.iter().map(|p| p.catalog_id()).collect()
    }

    pub fn catalog(&self) -> &[ElementSet] {
        &self.catalog
    }

    pub fn observers(&self) -> &[ObserverLocation] {
        self.observers.list()
    }

    pub fn log(&self) -> &TelemetryLog {
        &self.log
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn alerts(&self) -> &AlertEvaluator {
        &self.alerts
    }

    pub fn add_observer(&mut self, observer: ObserverLocation) -> TrackerResult<()> {
        self.observers.add(observer)
    }

    /// Replace an observer. Renaming restarts its alert states.
    pub fn edit_observer(&mut self, name: &str, observer: ObserverLocation) -> TrackerResult<()> {
        let renamed = observer.name != name;
        self.observers.edit(name, observer)?;
        if renamed {
            self.alerts.remove_observer(name);
        }
        Ok(())
    }

    pub fn delete_observer(&mut self, name: &str) -> TrackerResult<ObserverLocation> {
        let removed = self.observers.delete(name)?;
        self.alerts.remove_observer(name);
        Ok(removed)
    }

    /// Operator "clear trails & logs"
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.log.clear();
        tracing::info!("Trails and telemetry log cleared");
    }

    fn compute(&self, propagator: &OrbitalPropagator, now: DateTime<Utc>) -> TrackerResult<ObjectUpdate> {
        let id = propagator.catalog_id();
        let state = propagator.state_at(now)?;
        let geodetic = to_geodetic(&state)?;

        let record = LogRecord::new(id, &state, &geodetic);
        if !self.history.accepts(id, now) || !self.log.accepts(&record) {
            return Err(TrackerError::PropagationFailure {
                object_id: id,
                instant: now,
                reason: "instant does not advance past the last recorded tick".to_string(),
            });
        }

        let lead_point = now
            .checked_add_signed(self.settings.lead)
            .and_then(|at| propagator.state_at(at).and_then(|s| to_geodetic(&s)).ok());

        let views = self
            .observers
            .list()
            .iter()
            .map(|observer| match to_topocentric(&state, observer) {
                Ok(view) => Some(view),
                Err(e) => {
                    tracing::debug!("{} from {}: {}", id, observer.name, e);
                    None
                }
            })
            .collect();

        let projection = compute_projection(
            propagator,
            now,
            self.settings.projection_minutes,
            self.settings.projection_samples,
        );

        Ok(ObjectUpdate {
            state,
            geodetic,
            lead_point,
            views,
            projection,
            record,
        })
    }

    /// Run one tick at `now`. Setting `cancel` stops the tick between objects;
    /// objects already processed stay committed.
    pub fn tick(&mut self, now: DateTime<Utc>, cancel: &AtomicBool) -> TickOutcome {
        self.tick += 1;
        let mut objects = Vec::with_capacity(self.tracked.len());
        let mut events = Vec::new();
        let mut warnings = std::mem::take(&mut self.pending_warnings);

        let tracked = std::mem::take(&mut self.tracked);
        for (index, propagator) in tracked.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                warnings.push(format!(
                    "tick {} cancelled after {} of {} objects",
                    self.tick,
                    index,
                    tracked.len()
                ));
                break;
            }

            let set = propagator.element_set();
            let id = set.catalog_id;
            let mut snapshot = ObjectSnapshot {
                object_id: id,
                name: set.name.clone(),
                source: set.source.clone(),
                epoch: set.epoch,
                state: None,
                geodetic: None,
                lead_point: None,
                trail: Vec::new(),
                projection: Vec::new(),
                footprint_radius_km: None,
                footprint: Vec::new(),
                observers: Vec::new(),
                error: None,
            };

            match self.compute(propagator, now) {
                Ok(update) => {
                    events.extend(self.commit(propagator, now, &update));
                    if let Err(e) = &update.projection {
                        tracing::warn!("Tick {} object {} ({}) has no projection: {}", self.tick, set.name, id, e);
                        warnings.push(format!("projection of {} unavailable: {}", id, e));
                    }

                    snapshot.state = Some(update.state);
                    snapshot.geodetic = Some(update.geodetic);
                    snapshot.lead_point = update.lead_point;
                    snapshot.footprint_radius_km = footprint_radius_km(update.geodetic.altitude_km);
                    snapshot.footprint = footprint_polygon(&update.geodetic);
                    snapshot.observers = self
                        .observers
                        .list()
                        .iter()
                        .zip(update.views)
                        .map(|(o, view)| ObserverView {
                            observer: o.name.clone(),
                            view,
                        })
                        .collect();
                }
                Err(e) => {
                    tracing::warn!("Tick {} object {} ({}) failed: {}", self.tick, set.name, id, e);
                    warnings.push(e.to_string());
                    snapshot.error = Some(e.to_string());
                }
            }

            snapshot.trail = self.history.trail(id);
            snapshot.projection = self.history.projection(id).to_vec();
            objects.push(snapshot);
        }
        self.tracked = tracked;

        TickOutcome {
            snapshot: TickSnapshot {
                tick: self.tick,
                instant: Some(now),
                objects,
                log_len: self.log.len(),
                warnings,
            },
            events,
        }
    }

    /// Apply one object's tick-local results to the owned buffers
    fn commit(
        &mut self,
        propagator: &OrbitalPropagator,
        now: DateTime<Utc>,
        update: &ObjectUpdate,
    ) -> Vec<AlertEvent> {
        let set = propagator.element_set();
        let id = set.catalog_id;

        if let Err(e) = self.history.record_tick(id, update.geodetic, now) {
            tracing::error!("Trail rejected a checked point: {}", e);
        }
        let projection = update.projection.as_ref().map(Vec::clone).unwrap_or_default();
        self.history.set_projection(id, projection);

        let mut events = Vec::new();
        for (observer, view) in self.observers.list().iter().zip(&update.views) {
            events.extend(self.alerts.evaluate(id, &set.name, observer, view.as_ref(), now));
        }

        if let Err(e) = self.log.append(update.record.clone()) {
            tracing::error!("Telemetry log rejected a checked record: {}", e);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::elements::parser::parse_payload;
    use crate::module::elements::parser::tests::{catalog_payload, DECAY_L1, DECAY_L2};
    use crate::module::elements::{offline_element_sets, AcquisitionOrigin};

    fn acquisition(sets: Vec<ElementSet>, origin: AcquisitionOrigin) -> Acquisition {
        Acquisition {
            filter: "stations".to_string(),
            sets,
            origin,
            failures: Vec::new(),
        }
    }

    fn remote_catalog() -> Vec<Acquisition> {
        let payload = format!("{}DECAY\n{}\n{}\n", catalog_payload(), DECAY_L1, DECAY_L2);
        let parsed = parse_payload(&payload, "test");
        vec![acquisition(
            parsed.sets,
            AcquisitionOrigin::Remote {
                source: "test".to_string(),
                rejected: 0,
            },
        )]
    }

    fn settings(selected: &[&str]) -> PipelineSettings {
        let mut settings = PipelineSettings::try_from(&TrackerConfig::default()).unwrap();
        settings.selected = selected.iter().map(|s| s.to_string()).collect();
        settings.projection_samples = 10;
        settings
    }

    fn setup(selected: &[&str]) -> (TrackingPipeline, DateTime<Utc>) {
        let mut pipeline = TrackingPipeline::new(settings(selected), TrackerConfig::default().observers).unwrap();
        let catalog = remote_catalog();
        let epoch = catalog[0].sets[0].epoch;
        pipeline.load_elements(&catalog, epoch);
        (pipeline, epoch + Duration::minutes(10))
    }

    #[test]
    fn test_default_selection_matches_name() {
        let (pipeline, _) = setup(&[]);
        // Only "ISS (ZARYA)" contains ISS
        assert_eq!(pipeline.tracked_ids(), vec![25544]);

        let (pipeline, _) = setup(&["twin", "25544", "GHOST"]);
        assert_eq!(pipeline.tracked_ids(), vec![25544, 43017]);
    }

    #[test]
    fn test_ticks_fill_buffers_and_log() {
        let (mut pipeline, start) = setup(&["ISS (ZARYA)", "TWIN"]);
        let cancel = AtomicBool::new(false);

        for i in 0..3 {
            let outcome = pipeline.tick(start + Duration::seconds(i), &cancel);
            assert_eq!(outcome.snapshot.objects.len(), 2);
            assert_eq!(outcome.snapshot.failed_objects(), 0);

            let object = &outcome.snapshot.objects[0];
            assert_eq!(object.trail.len(), i as usize + 1);
            assert_eq!(object.projection.len(), 10);
            assert_eq!(object.footprint.len(), 80);
            assert_eq!(object.observers.len(), 2);
            assert!(object.lead_point.is_some());
        }

        let records = pipeline.log().export_all();
        assert_eq!(records.len(), 3 * 2);
        assert!(records.windows(2).all(|w| w[0].sort_key() <= w[1].sort_key()));
        assert_eq!(
            records.iter().map(|r| r.object_id).collect::<Vec<_>>(),
            vec![25544, 43017, 25544, 43017, 25544, 43017]
        );
    }

    #[test]
    fn test_object_failure_is_isolated() {
        let (mut pipeline, now) = setup(&["ISS (ZARYA)"]);
        let cancel = AtomicBool::new(false);
        pipeline.tick(now, &cancel);

        // Same instant again: the ISS trail refuses it, the newly selected object does not
        pipeline.select(vec!["ISS (ZARYA)".to_string(), "TWIN".to_string()]);
        let outcome = pipeline.tick(now, &cancel);

        let iss = &outcome.snapshot.objects[0];
        let twin = &outcome.snapshot.objects[1];
        assert!(iss.error.is_some());
        assert_eq!(iss.trail.len(), 1);
        assert!(twin.error.is_none());
        assert_eq!(twin.trail.len(), 1);
        assert_eq!(pipeline.log().len(), 2);
        assert_eq!(outcome.snapshot.warnings.len(), 1);
    }

    #[test]
    fn test_remote_refresh_waits_full_period() {
        let (pipeline, now) = setup(&[]);
        assert!(!pipeline.needs_refresh(now + Duration::minutes(5)));
        assert!(pipeline.needs_refresh(now + Duration::minutes(120)));
    }

    #[test]
    fn test_propagation_failure_is_isolated() {
        let (mut pipeline, start) = setup(&["ISS (ZARYA)", "DECAY"]);
        let outcome = pipeline.tick(start + Duration::days(7), &AtomicBool::new(false));

        let iss = &outcome.snapshot.objects[0];
        let decayed = &outcome.snapshot.objects[1];
        assert_eq!(decayed.object_id, 49999);
        assert!(iss.error.is_none());
        assert!(iss.state.is_some());
        assert!(decayed.error.as_deref().is_some_and(|e| e.contains("propagation failed")));
        assert!(decayed.state.is_none());
        assert_eq!(outcome.snapshot.failed_objects(), 1);
        assert_eq!(pipeline.log().len(), 1);
    }

    #[test]
    fn test_projection_failure_keeps_current_state() {
        let mut settings = settings(&["DECAY"]);
        settings.projection_minutes = 7 * 1440;
        settings.projection_samples = 3;
        let mut pipeline = TrackingPipeline::new(settings, TrackerConfig::default().observers).unwrap();
        let catalog = remote_catalog();
        let epoch = catalog[0].sets[0].epoch;
        pipeline.load_elements(&catalog, epoch);

        // The object is fine now, but its orbit decays before the horizon
        let outcome = pipeline.tick(epoch + Duration::minutes(10), &AtomicBool::new(false));
        let object = &outcome.snapshot.objects[0];
        assert!(object.error.is_none());
        assert!(object.state.is_some());
        assert_eq!(object.trail.len(), 1);
        assert!(object.projection.is_empty());
        assert_eq!(outcome.snapshot.failed_objects(), 0);
        assert!(outcome.snapshot.warnings.iter().any(|w| w.contains("projection of 49999")));
        assert_eq!(pipeline.log().len(), 1);
    }

    #[test]
    fn test_cancel_between_objects() {
        let (mut pipeline, now) = setup(&["ISS (ZARYA)", "TWIN"]);
        let cancel = AtomicBool::new(true);

        let outcome = pipeline.tick(now, &cancel);
        assert!(outcome.snapshot.objects.is_empty());
        assert!(pipeline.log().is_empty());
        assert!(outcome.snapshot.warnings[0].contains("cancelled"));
        assert_eq!(pipeline.tracked_ids().len(), 2);
    }

    #[test]
    fn test_fallback_acquisition_reported() {
        let mut pipeline = TrackingPipeline::new(settings(&[]), Vec::new()).unwrap();
        let now = Utc::now();
        let mut fallback = acquisition(offline_element_sets().unwrap(), AcquisitionOrigin::Fallback);
        fallback.failures = vec!["a: refused".to_string()];

        assert!(pipeline.needs_refresh(now));
        pipeline.load_elements(&[fallback], now);
        assert!(!pipeline.needs_refresh(now + Duration::minutes(1)));
        // Remote sources are retried well before the regular refresh period
        assert!(pipeline.needs_refresh(now + Duration::minutes(5)));
        assert_eq!(pipeline.tracked_ids(), vec![25544]);

        let outcome = pipeline.tick(now, &AtomicBool::new(false));
        assert!(outcome.snapshot.warnings[0].contains("acquisition failed"));
        assert_eq!(outcome.snapshot.objects[0].source, "offline-fallback");
    }

    #[test]
    fn test_observer_changes() {
        let (mut pipeline, _) = setup(&[]);
        assert!(pipeline
            .add_observer(ObserverLocation::new("Bad", 100.0, 0.0, 0.0))
            .unwrap_err()
            .is_fatal());

        pipeline
            .add_observer(ObserverLocation::new("Quito", -0.1807, -78.4678, 2850.0))
            .unwrap();
        assert_eq!(pipeline.observers().len(), 3);

        pipeline.delete_observer("New Delhi").unwrap();
        assert!(pipeline.delete_observer("New Delhi").is_err());
        assert_eq!(pipeline.observers().len(), 2);
    }

    #[test]
    fn test_clear_history() {
        let (mut pipeline, now) = setup(&[]);
        let cancel = AtomicBool::new(false);
        pipeline.tick(now, &cancel);
        assert_eq!(pipeline.log().len(), 1);

        pipeline.clear_history();
        assert!(pipeline.log().is_empty());
        assert!(pipeline.history().trail(25544).is_empty());

        // A cleared trail accepts an earlier instant again
        let outcome = pipeline.tick(now - Duration::seconds(5), &cancel);
        assert_eq!(outcome.snapshot.failed_objects(), 0);
    }
}
