//! Radio frames sent by the collar.
//!
//! Position frame, 15 bytes, little-endian:
//! `lat_e7:i32 lon_e7:i32 alt_m:u16 sats:u8 hdop_x10:u8 battery_pct:u8 alert:u8 status:u8`
//!
//! Battery frame, 4 bytes: `mv:u16 (big-endian) pct:u8 flags:u8`

use crate::{AlertLevel, BatteryStatus, Position};

pub const POSITION_FRAME_LEN: usize = 15;
pub const BATTERY_FRAME_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = 32;

pub const PORT_POSITION: u8 = 1;
pub const PORT_BATTERY: u8 = 2;

pub const STATUS_GPS_FIX: u8 = 0x01;
pub const STATUS_INSIDE_FENCE: u8 = 0x02;

pub const BATTERY_CHARGING: u8 = 0x01;
pub const BATTERY_LOW: u8 = 0x02;
pub const BATTERY_CRITICAL: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionReport {
    pub position: Position,
    pub hdop: f32,
    pub battery_pct: u8,
    pub level: AlertLevel,
    pub inside_fence: bool,
}

pub fn encode_position(report: &PositionReport) -> [u8; POSITION_FRAME_LEN] {
    let p = &report.position;
    let mut buf = [0u8; POSITION_FRAME_LEN];

    let lat = (p.latitude * 1e7).round() as i32;
    let lon = (p.longitude * 1e7).round() as i32;
    let alt = p.altitude.clamp(0.0, u16::MAX as f32) as u16;
    let hdop = (report.hdop * 10.0).clamp(0.0, u8::MAX as f32) as u8;

    let mut status = 0u8;
    if p.valid {
        status |= STATUS_GPS_FIX;
    }
    if report.inside_fence {
        status |= STATUS_INSIDE_FENCE;
    }

    buf[0..4].copy_from_slice(&lat.to_le_bytes());
    buf[4..8].copy_from_slice(&lon.to_le_bytes());
    buf[8..10].copy_from_slice(&alt.to_le_bytes());
    buf[10] = p.satellites;
    buf[11] = hdop;
    buf[12] = report.battery_pct.min(100);
    buf[13] = report.level.into();
    buf[14] = status;
    buf
}

pub fn encode_battery(battery: &BatteryStatus) -> [u8; BATTERY_FRAME_LEN] {
    let mv = (battery.voltage * 1000.0).round().clamp(0.0, u16::MAX as f32) as u16;
    let mut flags = 0u8;
    if battery.charging {
        flags |= BATTERY_CHARGING;
    }
    if battery.low {
        flags |= BATTERY_LOW;
    }
    if battery.critical {
        flags |= BATTERY_CRITICAL;
    }
    let [hi, lo] = mv.to_be_bytes();
    [hi, lo, battery.percentage, flags]
}
