use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// NORAD catalog number
pub type CatalogId = u32;

/// Source tag carried by the embedded element set
pub const OFFLINE_FALLBACK_SOURCE: &str = "offline-fallback";

/// Files published into the output directory after every tick
pub const SNAPSHOT_FILE: &str = "snapshot.json";
pub const TELEMETRY_FILE: &str = "telemetry.csv";
pub const OBSERVERS_FILE: &str = "observers.json";

/// One trackable object's orbital elements, as fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSet {
    pub catalog_id: CatalogId,
    pub name: String,
    pub line1: String,
    pub line2: String,
    /// Element epoch (UTC)
    pub epoch: DateTime<Utc>,
    /// Feed the set came from, or `offline-fallback`
    pub source: String,
}

impl ElementSet {
    pub fn is_fallback(&self) -> bool {
        self.source == OFFLINE_FALLBACK_SOURCE
    }
}

/// Inertial position/velocity valid at `instant`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    pub instant: DateTime<Utc>,
    /// ECI position, km
    pub position_km: [f64; 3],
    /// ECI velocity, km/s
    pub velocity_km_s: [f64; 3],
    /// Signed minutes between the element epoch and `instant`
    pub epoch_offset_minutes: f64,
}

impl StateVector {
    pub fn radius_km(&self) -> f64 {
        norm(&self.position_km)
    }

    pub fn speed_km_s(&self) -> f64 {
        norm(&self.velocity_km_s)
    }

    /// True when the vector was computed for an instant before the element epoch
    pub fn predates_epoch(&self) -> bool {
        self.epoch_offset_minutes < 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.position_km
            .iter()
            .chain(self.velocity_km_s.iter())
            .all(|c| c.is_finite())
    }
}

fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Latitude/longitude/altitude on the reference ellipsoid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticPoint {
    pub instant: DateTime<Utc>,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_km: f64,
}

/// Look angles from one observer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TopocentricView {
    pub elevation_deg: f64,
    pub azimuth_deg: f64,
    pub range_km: f64,
}

/// Per-station alert thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_distance_km")]
    pub distance_km: f64,

    #[serde(default = "default_elevation_deg")]
    pub elevation_deg: f64,

    #[serde(default = "default_enabled")]
    pub distance_enabled: bool,

    #[serde(default = "default_enabled")]
    pub elevation_enabled: bool,
}

fn default_distance_km() -> f64 {
    500.0
}

fn default_elevation_deg() -> f64 {
    20.0
}

fn default_enabled() -> bool {
    true
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            distance_km: default_distance_km(),
            elevation_deg: default_elevation_deg(),
            distance_enabled: default_enabled(),
            elevation_enabled: default_enabled(),
        }
    }
}

impl AlertThresholds {
    pub fn is_enabled(&self, kind: ThresholdKind) -> bool {
        match kind {
            ThresholdKind::Distance => self.distance_enabled,
            ThresholdKind::Elevation => self.elevation_enabled,
        }
    }
}

/// A named ground station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverLocation {
    pub name: String,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    /// Height above the ellipsoid, meters
    #[serde(default)]
    pub altitude_m: f64,
    #[serde(default)]
    pub thresholds: AlertThresholds,
}

impl ObserverLocation {
    pub fn new(name: impl Into<String>, latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            name: name.into(),
            latitude_deg,
            longitude_deg,
            altitude_m,
            thresholds: AlertThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThresholdKind {
    #[serde(rename = "distance")]
    Distance,
    #[serde(rename = "elevation")]
    Elevation,
}

impl ThresholdKind {
    pub const ALL: [ThresholdKind; 2] = [ThresholdKind::Distance, ThresholdKind::Elevation];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdKind::Distance => "distance",
            ThresholdKind::Elevation => "elevation",
        }
    }
}

impl std::fmt::Display for ThresholdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AlertStatus {
    #[default]
    #[serde(rename = "quiet")]
    Quiet,
    #[serde(rename = "firing")]
    Firing,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Quiet => write!(f, "quiet"),
            AlertStatus::Firing => write!(f, "firing"),
        }
    }
}

/// One alert state transition, delivered to the notification side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub object_id: CatalogId,
    pub object_name: String,
    pub observer: String,
    pub kind: ThresholdKind,
    pub state: AlertStatus,
    /// Range (km) or elevation (deg) that caused the transition
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn is_firing(&self) -> bool {
        self.state == AlertStatus::Firing
    }
}

/// One telemetry row; field names match the exported CSV columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "objectId")]
    pub object_id: CatalogId,
    pub timestamp: DateTime<Utc>,
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub lat: f64,
    pub lon: f64,
    pub altitude: f64,
}

impl LogRecord {
    pub fn new(object_id: CatalogId, state: &StateVector, point: &GeodeticPoint) -> Self {
        Self {
            object_id,
            timestamp: state.instant,
            px: state.position_km[0],
            py: state.position_km[1],
            pz: state.position_km[2],
            vx: state.velocity_km_s[0],
            vy: state.velocity_km_s[1],
            vz: state.velocity_km_s[2],
            lat: point.latitude_deg,
            lon: point.longitude_deg,
            altitude: point.altitude_km,
        }
    }

    /// Ordering key of the log: timestamp, then object id
    pub fn sort_key(&self) -> (DateTime<Utc>, CatalogId) {
        (self.timestamp, self.object_id)
    }
}

/// Look angles for one observer; `view` is `None` when the geometry is undefined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverView {
    pub observer: String,
    pub view: Option<TopocentricView>,
}

/// Everything the rendering side needs for one object after a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub object_id: CatalogId,
    pub name: String,
    pub source: String,
    pub epoch: DateTime<Utc>,
    pub state: Option<StateVector>,
    pub geodetic: Option<GeodeticPoint>,
    /// Sub-satellite point a few seconds ahead, for the velocity cue
    pub lead_point: Option<GeodeticPoint>,
    pub trail: Vec<GeodeticPoint>,
    pub projection: Vec<GeodeticPoint>,
    pub footprint_radius_km: Option<f64>,
    /// Footprint polygon as `[lon, lat]` pairs
    pub footprint: Vec<[f64; 2]>,
    pub observers: Vec<ObserverView>,
    /// Per-object failure of this tick, if any
    pub error: Option<String>,
}

/// Committed state of the pipeline after one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TickSnapshot {
    pub tick: u64,
    pub instant: Option<DateTime<Utc>>,
    pub objects: Vec<ObjectSnapshot>,
    pub log_len: usize,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl TickSnapshot {
    pub fn failed_objects(&self) -> usize {
        self.objects.iter().filter(|o| o.error.is_some()).count()
    }
}
