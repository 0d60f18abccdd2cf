use serde::{Deserialize, Serialize};

use crate::AlertLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Status,
    LevelChange,
    Escalation,
    Violation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub ts_unix_ms: i64,
    pub device_id: String,
    pub kind: EventKind,
    pub level: AlertLevel,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub sats: u8,
    /// Signed distance to the fence limit, positive inside
    pub distance_m: Option<f32>,
    pub msg: String,
    // Battery monitoring
    pub battery_voltage: Option<f32>,
    pub battery_percent: Option<u8>,
    // Link health
    pub link_quality: Option<u8>,
}
