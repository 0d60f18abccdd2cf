use tracing::debug;

use collar_proto::{AlertLevel, Position};

use crate::store::GeofenceStore;
use crate::thresholds::ThresholdTable;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Signed distance-to-limit, positive inside.
    pub distance_m: f32,
    pub level: AlertLevel,
    pub inside: bool,
    /// This sample crossed from inside to outside.
    pub violation: bool,
}

/// Per-tick geofence evaluation.
///
/// Returns `None` when there is nothing to evaluate (no usable fix, no active
/// fence); the caller holds its previous distance and level in that case.
#[derive(Debug, Default)]
pub struct GeofenceEvaluator {
    last: Option<Evaluation>,
}

impl GeofenceEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(&mut self, store: &mut GeofenceStore, position: &Position, now_ms: u32) -> Option<Evaluation> {
        if !position.is_usable() {
            debug!(valid = position.valid, "no usable fix, holding last evaluation");
            return None;
        }
        let distance_m = store.min_distance(position)?;
        let inside = distance_m >= 0.0;
        let level = calculate_alert_level(store.thresholds(), distance_m);
        let violation = store.record_observation(inside, distance_m, now_ms);

        let eval = Evaluation { distance_m, level, inside, violation };
        self.last = Some(eval);
        Some(eval)
    }

    /// Most recent successful evaluation.
    pub fn last(&self) -> Option<Evaluation> {
        self.last
    }
}

pub fn calculate_alert_level(thresholds: &ThresholdTable, distance_m: f32) -> AlertLevel {
    thresholds.level_for(distance_m)
}
