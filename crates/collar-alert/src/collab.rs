//! Interfaces to the hardware around the alert core.
//!
//! Implementations must not block: the control loop calls into them once per
//! tick and expects an immediate return.

use collar_proto::payload::{encode_battery, encode_position, PositionReport, PORT_BATTERY, PORT_POSITION};
use collar_proto::{AlertLevel, BatteryStatus, CollarError, Position};

pub trait GpsSource {
    /// Latest reading. `HardwareUnavailable` when the receiver is not up.
    fn position(&mut self) -> Result<Position, CollarError>;
    fn has_valid_fix(&self) -> bool;
}

pub trait BatterySource {
    fn read(&mut self) -> Result<BatteryStatus, CollarError>;
}

pub trait Buzzer {
    fn tone(&mut self, frequency_hz: u16) -> Result<(), CollarError>;
    fn stop(&mut self);
    fn set_volume(&mut self, pct: u8);
}

/// What the main screen shows besides position and battery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceStatus {
    pub uptime_ms: u32,
    pub gps_fix: bool,
    pub inside_fence: bool,
    pub distance_m: Option<f32>,
}

pub trait Display {
    fn show_main_screen(&mut self, status: &DeviceStatus, position: &Position, battery: &BatteryStatus, level: AlertLevel);
    fn show_alert_screen(&mut self, level: AlertLevel, distance_m: f32);
}

pub trait Radio {
    fn send_packet(&mut self, port: u8, payload: &[u8]) -> Result<(), CollarError>;

    fn send_position(&mut self, report: &PositionReport) -> Result<(), CollarError> {
        self.send_packet(PORT_POSITION, &encode_position(report))
    }

    fn send_battery(&mut self, battery: &BatteryStatus) -> Result<(), CollarError> {
        self.send_packet(PORT_BATTERY, &encode_battery(battery))
    }

    /// Next received downlink frame as `(port, payload)`, if any.
    fn poll_downlink(&mut self) -> Option<(u8, Vec<u8>)> {
        None
    }
}

/// Observer of alert transitions. Called synchronously from the tick; must return quickly.
pub trait AlertListener {
    fn on_level_change(&mut self, old: AlertLevel, new: AlertLevel, distance_m: f32, reason: &str);

    fn on_escalation(&mut self, _old: AlertLevel, _new: AlertLevel) {}
}

/// Hardware handles owned by the controller.
pub struct Collaborators {
    pub gps: Box<dyn GpsSource + Send>,
    pub battery: Box<dyn BatterySource + Send>,
    pub buzzer: Box<dyn Buzzer + Send>,
    pub display: Box<dyn Display + Send>,
    pub radio: Box<dyn Radio + Send>,
}

/// Borrowed output side handed to the dispatcher each tick.
pub struct Outputs<'a> {
    pub buzzer: &'a mut dyn Buzzer,
    pub display: &'a mut dyn Display,
    pub radio: &'a mut dyn Radio,
}
