///! Per-object tracking state: trails, projections, alerts, telemetry
///!
///! ## Main Components
///! - `TrackingPipeline`: owns every buffer and runs one tick at a time
///! - `HistoryBuffer`: bounded trails and recomputed projections
///! - `AlertEvaluator`: quiet/firing state machines per (object, observer, kind)
///! - `TelemetryLog`: append-only record log with CSV export

pub mod alert;
pub mod history;
pub mod observers;
mod pipeline;
pub mod telemetry;

pub use alert::{AlertEvaluator, AlertState};
pub use history::{compute_projection, HistoryBuffer, HistoryError, TrailBuffer};
pub use observers::{validate_observer, ObserverRegistry};
pub use pipeline::{PipelineSettings, TickOutcome, TrackingPipeline};
pub use telemetry::{TelemetryError, TelemetryLog};
