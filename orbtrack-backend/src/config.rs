use std::sync::OnceLock;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use orbtrack_common::ObserverLocation;

use crate::error::{TrackerError, TrackerResult};
use crate::module::track::observers::validate_observer;

/// Upper bounds on periods and horizons; larger values overflow time arithmetic
pub const MAX_TIMEOUT_SECS: u64 = 300;
pub const MAX_REFRESH_SECS: u64 = 3_600;
pub const MAX_ELEMENT_REFRESH_MINUTES: u64 = 10_080;
pub const MAX_TRAIL_WINDOW_MINUTES: u64 = 43_200;
pub const MAX_PROJECTION_MINUTES: u64 = 10_080;
pub const MAX_LEAD_SECONDS: u64 = 86_400;

/// One remote element-set feed; `{group}` in the URL is replaced by the catalog filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Catalog filters to track, e.g. "stations", "visual"
    #[serde(default = "default_groups")]
    pub groups: Vec<String>,

    /// Remote sources in priority order
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,

    /// Timeout applied to each source attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How often element sets are re-acquired
    #[serde(default = "default_refresh_minutes")]
    pub refresh_minutes: u64,

    /// Retry period after a refresh that fell back to the embedded element set
    #[serde(default = "default_fallback_retry_minutes")]
    pub fallback_retry_minutes: u64,
}

fn default_groups() -> Vec<String> {
    vec!["stations".to_string()]
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "celestrak.org".to_string(),
            url: "https://celestrak.org/NORAD/elements/{group}.txt".to_string(),
        },
        SourceConfig {
            name: "celestrak.com".to_string(),
            url: "https://celestrak.com/NORAD/elements/{group}.txt".to_string(),
        },
        SourceConfig {
            name: "www.celestrak.org".to_string(),
            url: "https://www.celestrak.org/NORAD/elements/{group}.txt".to_string(),
        },
    ]
}

fn default_timeout_secs() -> u64 {
    6
}

fn default_refresh_minutes() -> u64 {
    120
}

fn default_fallback_retry_minutes() -> u64 {
    5
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            groups: default_groups(),
            sources: default_sources(),
            timeout_secs: default_timeout_secs(),
            refresh_minutes: default_refresh_minutes(),
            fallback_retry_minutes: default_fallback_retry_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Tick period
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,

    /// Object names (case-insensitive substrings) to track; empty selects by `default_match`
    #[serde(default)]
    pub selected: Vec<String>,

    #[serde(default = "default_match")]
    pub default_match: String,

    #[serde(default = "default_max_default_objects")]
    pub max_default_objects: usize,

    /// Trail length cap, in points
    #[serde(default = "default_trail_cap")]
    pub trail_cap: usize,

    /// Optional trail time window
    #[serde(default)]
    pub trail_window_minutes: Option<u64>,

    #[serde(default = "default_projection_minutes")]
    pub projection_minutes: u64,

    #[serde(default = "default_projection_samples")]
    pub projection_samples: usize,

    /// Look-ahead of the velocity cue point
    #[serde(default = "default_lead_seconds")]
    pub lead_seconds: u64,
}

fn default_refresh_secs() -> u64 {
    1
}

fn default_match() -> String {
    "ISS".to_string()
}

fn default_max_default_objects() -> usize {
    2
}

fn default_trail_cap() -> usize {
    600
}

fn default_projection_minutes() -> u64 {
    90
}

fn default_projection_samples() -> usize {
    270
}

fn default_lead_seconds() -> u64 {
    30
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_refresh_secs(),
            selected: Vec::new(),
            default_match: default_match(),
            max_default_objects: default_max_default_objects(),
            trail_cap: default_trail_cap(),
            trail_window_minutes: None,
            projection_minutes: default_projection_minutes(),
            projection_samples: default_projection_samples(),
            lead_seconds: default_lead_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// Emit an audible cue alongside firing alerts
    #[serde(default)]
    pub sound: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Directory receiving snapshot and telemetry exports
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default = "default_observers")]
    pub observers: Vec<ObserverLocation>,

    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_output_dir() -> String {
    "data".to_string()
}

fn default_observers() -> Vec<ObserverLocation> {
    vec![
        ObserverLocation::new("New Delhi", 28.6139, 77.2090, 216.0),
        ObserverLocation::new("New York", 40.7128, -74.0060, 10.0),
    ]
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            output_dir: default_output_dir(),
            acquisition: AcquisitionConfig::default(),
            tracking: TrackingConfig::default(),
            observers: default_observers(),
            notify: NotifyConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file '{}'", path))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: TrackerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with. Values are never clamped.
    pub fn validate(&self) -> TrackerResult<()> {
        let acq = &self.acquisition;
        if acq.groups.is_empty() || acq.groups.iter().any(|g| g.trim().is_empty()) {
            return Err(TrackerError::config("at least one non-empty catalog group is required"));
        }
        if acq.sources.is_empty() {
            return Err(TrackerError::config("at least one element-set source is required"));
        }
        if let Some(source) = acq.sources.iter().find(|s| !s.url.contains("{group}")) {
            return Err(TrackerError::config(format!(
                "source '{}' URL has no {{group}} placeholder",
                source.name
            )));
        }
        check_range("source timeout (s)", acq.timeout_secs, 1, MAX_TIMEOUT_SECS)?;
        check_range(
            "element refresh period (min)",
            acq.refresh_minutes,
            1,
            MAX_ELEMENT_REFRESH_MINUTES,
        )?;
        check_range(
            "fallback retry period (min)",
            acq.fallback_retry_minutes,
            1,
            MAX_ELEMENT_REFRESH_MINUTES,
        )?;

        let trk = &self.tracking;
        check_range("refresh period (s)", trk.refresh_secs, 1, MAX_REFRESH_SECS)?;
        if trk.trail_cap == 0 {
            return Err(TrackerError::config("trail cap must be positive"));
        }
        if let Some(window) = trk.trail_window_minutes {
            check_range("trail window (min)", window, 1, MAX_TRAIL_WINDOW_MINUTES)?;
        }
        check_range("projection horizon (min)", trk.projection_minutes, 1, MAX_PROJECTION_MINUTES)?;
        if trk.projection_samples == 0 {
            return Err(TrackerError::config("projection sample count must be positive"));
        }
        check_range("lead time (s)", trk.lead_seconds, 0, MAX_LEAD_SECONDS)?;

        for (i, observer) in self.observers.iter().enumerate() {
            validate_observer(observer)?;
            if self.observers[..i].iter().any(|o| o.name == observer.name) {
                return Err(TrackerError::config(format!(
                    "duplicate observer name '{}'",
                    observer.name
                )));
            }
        }
        Ok(())
    }
}

fn check_range(what: &str, value: u64, min: u64, max: u64) -> TrackerResult<()> {
    if value < min || value > max {
        return Err(TrackerError::config(format!(
            "{} must be within {}..={}, got {}",
            what, min, max, value
        )));
    }
    Ok(())
}

/// Where the active configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    File,
    Defaults,
}

pub static CONFIG: OnceLock<TrackerConfig> = OnceLock::new();

/// Load a configuration file. A missing file yields the defaults; an invalid one is an error.
pub fn load_config(path: &str) -> anyhow::Result<(TrackerConfig, ConfigOrigin)> {
    if std::path::Path::new(path).exists() {
        Ok((TrackerConfig::from_file(path)?, ConfigOrigin::File))
    } else {
        Ok((TrackerConfig::default(), ConfigOrigin::Defaults))
    }
}

/// Load the configuration once for the whole process.
/// Logging is not up yet, so the origin is returned for the caller to report.
pub fn read_config(path: &str) -> anyhow::Result<(&'static TrackerConfig, ConfigOrigin)> {
    let (config, origin) = load_config(path)?;
    Ok((CONFIG.get_or_init(|| config), origin))
}
