use serde::{Deserialize, Serialize};

use collar_proto::{AlertLevel, CollarError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceThreshold {
    /// Distance-to-limit in metres at or below which `level` applies.
    pub distance_m: f32,
    pub level: AlertLevel,
}

/// Maps a signed distance-to-limit onto a raw alert level.
///
/// Entries ascend by distance and descend by severity, so a smaller margin
/// never yields a milder level. A distance equal to a threshold takes that
/// threshold's (more severe) level. Anything outside the fence is `Emergency`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    entries: Vec<DistanceThreshold>,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            entries: vec![
                DistanceThreshold { distance_m: 0.0, level: AlertLevel::Emergency },
                DistanceThreshold { distance_m: 5.0, level: AlertLevel::Danger },
                DistanceThreshold { distance_m: 10.0, level: AlertLevel::Warning },
                DistanceThreshold { distance_m: 20.0, level: AlertLevel::Caution },
            ],
        }
    }
}

impl ThresholdTable {
    pub fn new(entries: Vec<DistanceThreshold>) -> Result<Self, CollarError> {
        if entries.is_empty() {
            return Err(CollarError::invalid("threshold table is empty"));
        }
        for t in &entries {
            if !t.distance_m.is_finite() || t.distance_m < 0.0 {
                return Err(CollarError::invalid(format!("threshold distance {} must be >= 0", t.distance_m)));
            }
            if t.level == AlertLevel::Safe {
                return Err(CollarError::invalid("threshold level cannot be safe"));
            }
        }
        for pair in entries.windows(2) {
            if pair[1].distance_m <= pair[0].distance_m {
                return Err(CollarError::invalid("threshold distances must strictly ascend"));
            }
            if pair[1].level >= pair[0].level {
                return Err(CollarError::invalid("threshold levels must descend in severity"));
            }
        }
        Ok(Self { entries })
    }

    /// Table from the four per-level margins used in config files.
    pub fn from_margins(caution: f32, warning: f32, danger: f32, emergency: f32) -> Result<Self, CollarError> {
        Self::new(vec![
            DistanceThreshold { distance_m: emergency, level: AlertLevel::Emergency },
            DistanceThreshold { distance_m: danger, level: AlertLevel::Danger },
            DistanceThreshold { distance_m: warning, level: AlertLevel::Warning },
            DistanceThreshold { distance_m: caution, level: AlertLevel::Caution },
        ])
    }

    pub fn entries(&self) -> &[DistanceThreshold] {
        &self.entries
    }

    pub fn level_for(&self, distance_to_limit_m: f32) -> AlertLevel {
        if distance_to_limit_m.is_nan() {
            return AlertLevel::Safe;
        }
        if distance_to_limit_m < 0.0 {
            return AlertLevel::Emergency;
        }
        self.entries
            .iter()
            .find(|t| distance_to_limit_m <= t.distance_m)
            .map(|t| t.level)
            .unwrap_or(AlertLevel::Safe)
    }
}
