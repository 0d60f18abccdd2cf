//! Geofence geometry, storage and per-tick evaluation for the collar.

pub mod doctor;
pub mod evaluator;
pub mod fence;
pub mod geo;
pub mod gnss;
pub mod store;
pub mod thresholds;

pub use evaluator::{calculate_alert_level, Evaluation, GeofenceEvaluator};
pub use fence::{FenceKind, Geofence};
pub use store::{FenceStats, GeofenceStore, MAX_GEOFENCES};
pub use thresholds::{DistanceThreshold, ThresholdTable};
