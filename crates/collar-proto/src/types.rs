use serde::{Deserialize, Serialize};

use crate::clock::elapsed_ms;

pub fn is_valid_coordinate(lat: f64, lng: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        is_valid_coordinate(self.lat, self.lng)
    }
}

/// One GPS reading. When `valid` is false the other fields carry no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f32,
    /// Estimated horizontal accuracy (m)
    pub accuracy: f32,
    pub satellites: u8,
    /// Milliseconds on the device clock
    pub timestamp: u32,
    pub valid: bool,
}

impl Default for Position {
    fn default() -> Self {
        Self::invalid(0)
    }
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, timestamp: u32) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
            accuracy: 5.0,
            satellites: 4,
            timestamp,
            valid: true,
        }
    }

    pub fn invalid(timestamp: u32) -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            accuracy: 999.0,
            satellites: 0,
            timestamp,
            valid: false,
        }
    }

    /// Flagged valid and within coordinate bounds; only such readings feed geofence math.
    pub fn is_usable(&self) -> bool {
        self.valid && is_valid_coordinate(self.latitude, self.longitude)
    }

    /// Usable and taken no more than `max_age_ms` before `now_ms`.
    pub fn is_fresh(&self, now_ms: u32, max_age_ms: u32) -> bool {
        self.is_usable() && elapsed_ms(now_ms, self.timestamp) <= max_age_ms
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub voltage: f32,
    pub percentage: u8,
    pub charging: bool,
    pub low: bool,
    pub critical: bool,
}

impl BatteryStatus {
    /// Builds a status from a voltage sample using the given low/critical limits.
    pub fn from_voltage(voltage: f32, low_v: f32, critical_v: f32) -> Self {
        Self {
            voltage,
            percentage: battery_percentage(voltage),
            charging: false,
            low: voltage <= low_v,
            critical: voltage <= critical_v,
        }
    }
}

/// Single-cell Li-ion discharge curve, 4.2 V full and 3.0 V empty.
pub fn battery_percentage(voltage: f32) -> u8 {
    let pct = if voltage >= 4.2 {
        100.0
    } else if voltage >= 4.0 {
        80.0 + (voltage - 4.0) * 100.0
    } else if voltage >= 3.8 {
        60.0 + (voltage - 3.8) * 100.0
    } else if voltage >= 3.6 {
        40.0 + (voltage - 3.6) * 100.0
    } else if voltage >= 3.4 {
        20.0 + (voltage - 3.4) * 100.0
    } else if voltage >= 3.0 {
        (voltage - 3.0) * 50.0
    } else {
        0.0
    };
    pct.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_age_limits_freshness() {
        let p = Position::new(-37.3, -72.9, 1_000);
        assert!(p.is_fresh(11_000, 10_000));
        assert!(!p.is_fresh(11_001, 10_000));
        // clock wrap between fix and now
        let late = Position::new(-37.3, -72.9, u32::MAX - 500);
        assert!(late.is_fresh(499, 10_000));
        assert!(!Position::invalid(1_000).is_fresh(1_000, 10_000));
    }

    #[test]
    fn out_of_range_coordinates_are_not_usable() {
        let mut p = Position::new(91.0, 10.0, 0);
        assert!(!p.is_usable());
        p.latitude = -37.3;
        assert!(p.is_usable());
        p.valid = false;
        assert!(!p.is_usable());
    }

    #[test]
    fn battery_curve_endpoints() {
        assert_eq!(battery_percentage(4.3), 100);
        assert_eq!(battery_percentage(3.8), 60);
        assert_eq!(battery_percentage(3.4), 20);
        assert_eq!(battery_percentage(2.9), 0);
    }

    #[test]
    fn status_flags_follow_limits() {
        let s = BatteryStatus::from_voltage(3.5, 3.6, 3.4);
        assert!(s.low);
        assert!(!s.critical);
    }
}
