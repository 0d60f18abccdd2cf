//! Collaborators for running the collar core on a Linux host.

use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use collar_alert::{AlertListener, BatteryLimits, BatterySource, Buzzer, DeviceStatus, Display, GpsSource, Radio};
use collar_proto::telemetry::{EventKind, TelemetryEvent};
use collar_proto::{AlertLevel, BatteryStatus, CollarError, DeviceClock, Position};

/// Latest GNSS reading published by the reader task.
///
/// A reading older than `max_fix_age_ms` is reported as no fix, so a receiver
/// that goes quiet does not leave the last position in use.
pub struct WatchGps {
    rx: watch::Receiver<Position>,
    clock: DeviceClock,
    max_fix_age_ms: u32,
}

impl WatchGps {
    pub fn new(rx: watch::Receiver<Position>, clock: DeviceClock, max_fix_age_ms: u32) -> Self {
        Self { rx, clock, max_fix_age_ms }
    }
}

impl GpsSource for WatchGps {
    fn position(&mut self) -> Result<Position, CollarError> {
        if self.rx.has_changed().is_err() {
            return Err(CollarError::unavailable("gnss reader stopped"));
        }
        let mut p = *self.rx.borrow_and_update();
        if p.valid && !p.is_fresh(self.clock.now_ms(), self.max_fix_age_ms) {
            debug!(fix_ts = p.timestamp, "gnss fix too old");
            p.valid = false;
        }
        Ok(p)
    }

    fn has_valid_fix(&self) -> bool {
        self.rx.borrow().is_fresh(self.clock.now_ms(), self.max_fix_age_ms)
    }
}

/// Reads a Linux power-supply node (`voltage_now` in microvolts).
pub struct SysfsBattery {
    dir: PathBuf,
    limits: BatteryLimits,
}

impl SysfsBattery {
    pub fn new(dir: impl Into<PathBuf>, limits: BatteryLimits) -> Self {
        Self { dir: dir.into(), limits }
    }
}

fn read_trimmed(path: &Path) -> Result<String, CollarError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| CollarError::unavailable(format!("read {}: {}", path.display(), e)))
}

impl BatterySource for SysfsBattery {
    fn read(&mut self) -> Result<BatteryStatus, CollarError> {
        let raw = read_trimmed(&self.dir.join("voltage_now"))?;
        let microvolts: i64 = raw
            .parse()
            .map_err(|_| CollarError::unavailable(format!("bad voltage_now value {:?}", raw)))?;
        let voltage = microvolts as f32 / 1_000_000.0;

        let mut status = BatteryStatus::from_voltage(voltage, self.limits.low_v, self.limits.critical_v);
        status.charging = read_trimmed(&self.dir.join("status")).map(|s| s == "Charging").unwrap_or(false);
        Ok(status)
    }
}

pub struct FixedBattery(pub BatteryStatus);

impl BatterySource for FixedBattery {
    fn read(&mut self) -> Result<BatteryStatus, CollarError> {
        Ok(self.0)
    }
}

#[derive(Default)]
pub struct LogBuzzer {
    volume: u8,
}

impl Buzzer for LogBuzzer {
    fn tone(&mut self, frequency_hz: u16) -> Result<(), CollarError> {
        debug!(frequency_hz, volume = self.volume, "buzzer on");
        Ok(())
    }

    fn stop(&mut self) {
        debug!("buzzer off");
    }

    fn set_volume(&mut self, pct: u8) {
        self.volume = pct.min(100);
    }
}

pub struct LogDisplay;

impl Display for LogDisplay {
    fn show_main_screen(&mut self, status: &DeviceStatus, position: &Position, battery: &BatteryStatus, level: AlertLevel) {
        info!(
            %level,
            fix = status.gps_fix,
            inside = status.inside_fence,
            distance_m = status.distance_m.unwrap_or(f32::NAN),
            lat = position.latitude,
            lon = position.longitude,
            battery_pct = battery.percentage,
            uptime_s = status.uptime_ms / 1000,
            "screen: main"
        );
    }

    fn show_alert_screen(&mut self, level: AlertLevel, distance_m: f32) {
        warn!(%level, distance_m, "screen: alert");
    }
}

/// Radio stand-in when `[radio]` is disabled.
pub struct NullRadio;

impl Radio for NullRadio {
    fn send_packet(&mut self, port: u8, payload: &[u8]) -> Result<(), CollarError> {
        debug!(port, payload = %hex::encode_upper(payload), "radio disabled, frame dropped");
        Ok(())
    }
}

/// Emits a telemetry event for every alert transition.
pub struct TelemetryListener {
    device_id: String,
    gps: watch::Receiver<Position>,
}

impl TelemetryListener {
    pub fn new(device_id: String, gps: watch::Receiver<Position>) -> Self {
        Self { device_id, gps }
    }

    fn emit(&self, kind: EventKind, level: AlertLevel, distance_m: Option<f32>, msg: String) {
        let p = *self.gps.borrow();
        let ev = TelemetryEvent {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            device_id: self.device_id.clone(),
            kind,
            level,
            lat: p.valid.then_some(p.latitude),
            lon: p.valid.then_some(p.longitude),
            sats: p.satellites,
            distance_m,
            msg,
            battery_voltage: None,
            battery_percent: None,
            link_quality: None,
        };
        match serde_json::to_string(&ev) {
            Ok(json) => info!(target: "telemetry", "{}", json),
            Err(e) => warn!("telemetry encode failed: {:#}", e),
        }
    }
}

impl AlertListener for TelemetryListener {
    fn on_level_change(&mut self, old: AlertLevel, new: AlertLevel, distance_m: f32, reason: &str) {
        let kind = if new == AlertLevel::Emergency && distance_m < 0.0 {
            EventKind::Violation
        } else {
            EventKind::LevelChange
        };
        self.emit(kind, new, Some(distance_m), format!("{} -> {}: {}", old, new, reason));
    }

    fn on_escalation(&mut self, old: AlertLevel, new: AlertLevel) {
        self.emit(EventKind::Escalation, new, None, format!("escalated {} -> {}", old, new));
    }
}
