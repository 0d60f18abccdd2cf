//! Drives buzzer, display and radio from the resolved alert level.
//!
//! Every output is rate limited by its own timestamp, so repeated calls
//! within the same millisecond do not repeat side effects.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use collar_geo::gnss::ACCURACY_PER_HDOP_M;
use collar_proto::payload::PositionReport;
use collar_proto::{elapsed_ms, AlertLevel, BatteryStatus, Position};

use crate::collab::{AlertListener, DeviceStatus, Outputs};
use crate::escalator::{Transition, TransitionKind};
use crate::tone::{BuzzerPattern, TonePlayer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub audio_enabled: bool,
    pub display_enabled: bool,
    pub display_refresh_ms: u32,
    /// Position report interval per level, indexed by `AlertLevel::index`.
    pub tx_interval_ms: [u32; AlertLevel::COUNT],
    pub battery_tx_interval_ms: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            display_enabled: true,
            display_refresh_ms: 3_000,
            tx_interval_ms: [120_000, 120_000, 90_000, 60_000, 30_000],
            battery_tx_interval_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Main,
    Alert(AlertLevel),
}

/// Resolved state handed to the dispatcher for one tick.
#[derive(Debug, Clone, Copy)]
pub struct DispatchFrame<'a> {
    pub level: AlertLevel,
    pub distance_m: f32,
    pub position: &'a Position,
    pub battery: &'a BatteryStatus,
    pub status: &'a DeviceStatus,
}

#[derive(Default)]
pub struct AlertDispatcher {
    config: DispatchConfig,
    tone: TonePlayer,
    last_fired: [Option<u32>; AlertLevel::COUNT],
    display_mode: Option<DisplayMode>,
    last_display_ms: Option<u32>,
    last_tx_ms: Option<u32>,
    last_battery_tx_ms: Option<u32>,
    tx_pending: bool,
    listeners: Vec<Box<dyn AlertListener + Send>>,
}

impl AlertDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config, ..Self::default() }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn set_audio_enabled(&mut self, on: bool) {
        self.config.audio_enabled = on;
    }

    pub fn set_display_enabled(&mut self, on: bool) {
        self.config.display_enabled = on;
    }

    pub fn add_listener(&mut self, listener: Box<dyn AlertListener + Send>) {
        self.listeners.push(listener);
    }

    pub fn display_mode(&self) -> Option<DisplayMode> {
        self.display_mode
    }

    pub fn is_sounding(&self) -> bool {
        self.tone.is_playing()
    }

    pub fn dispatch(&mut self, frame: &DispatchFrame<'_>, transitions: &[Transition], out: &mut Outputs<'_>, now_ms: u32) {
        for t in transitions {
            self.notify(t);
            if t.to != AlertLevel::Safe {
                // entering a level sounds its pattern now, not after the window
                self.last_fired[t.to.index()] = None;
            }
            if t.is_rise() {
                self.tx_pending = true;
            }
        }

        self.drive_buzzer(frame.level, out, now_ms);
        self.drive_display(frame, out, now_ms);
        self.drive_radio(frame, out, now_ms);
    }

    fn notify(&mut self, t: &Transition) {
        for l in self.listeners.iter_mut() {
            l.on_level_change(t.from, t.to, t.distance_m, &t.reason);
            if t.kind == TransitionKind::Escalation {
                l.on_escalation(t.from, t.to);
            }
        }
    }

    fn drive_buzzer(&mut self, level: AlertLevel, out: &mut Outputs<'_>, now_ms: u32) {
        let pattern = match BuzzerPattern::for_level(level) {
            Some(p) if self.config.audio_enabled => p,
            _ => {
                self.tone.stop(out.buzzer);
                return;
            }
        };

        let due = self.last_fired[level.index()]
            .map_or(true, |t| elapsed_ms(now_ms, t) >= pattern.repeat_interval_ms);
        if due {
            self.last_fired[level.index()] = Some(now_ms);
            self.tone.play(pattern.steps(), pattern.volume_pct, now_ms, out.buzzer);
        } else {
            self.tone.advance(now_ms, out.buzzer);
        }
    }

    fn drive_display(&mut self, frame: &DispatchFrame<'_>, out: &mut Outputs<'_>, now_ms: u32) {
        if !self.config.display_enabled {
            return;
        }
        let mode = match frame.level {
            AlertLevel::Safe => DisplayMode::Main,
            level => DisplayMode::Alert(level),
        };
        let stale = self
            .last_display_ms
            .map_or(true, |t| elapsed_ms(now_ms, t) >= self.config.display_refresh_ms);
        if Some(mode) == self.display_mode && !stale {
            return;
        }

        match mode {
            DisplayMode::Main => out.display.show_main_screen(frame.status, frame.position, frame.battery, frame.level),
            DisplayMode::Alert(level) => out.display.show_alert_screen(level, frame.distance_m),
        }
        self.display_mode = Some(mode);
        self.last_display_ms = Some(now_ms);
    }

    fn drive_radio(&mut self, frame: &DispatchFrame<'_>, out: &mut Outputs<'_>, now_ms: u32) {
        let interval = self.config.tx_interval_ms[frame.level.index()];
        let due = self.tx_pending || self.last_tx_ms.map_or(true, |t| elapsed_ms(now_ms, t) >= interval);
        if due && frame.position.is_usable() {
            let report = PositionReport {
                position: *frame.position,
                hdop: frame.position.accuracy / ACCURACY_PER_HDOP_M,
                battery_pct: frame.battery.percentage,
                level: frame.level,
                inside_fence: frame.status.inside_fence,
            };
            if let Err(e) = out.radio.send_position(&report) {
                warn!(error = %e, "position report not sent");
            } else {
                debug!(level = %frame.level, "position report sent");
            }
            self.last_tx_ms = Some(now_ms);
            self.tx_pending = false;
        }

        let battery_due = self
            .last_battery_tx_ms
            .map_or(true, |t| elapsed_ms(now_ms, t) >= self.config.battery_tx_interval_ms);
        if battery_due && frame.battery.voltage > 0.0 {
            if let Err(e) = out.radio.send_battery(frame.battery) {
                warn!(error = %e, "battery report not sent");
            }
            self.last_battery_tx_ms = Some(now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{Buzzer, Display, Radio};
    use crate::escalator::AlertSource;
    use collar_proto::CollarError;

    #[derive(Default)]
    struct Rec {
        tones: Vec<u16>,
        stops: u32,
        mains: u32,
        alerts: Vec<AlertLevel>,
    }

    impl Buzzer for Rec {
        fn tone(&mut self, f: u16) -> Result<(), CollarError> {
            self.tones.push(f);
            Ok(())
        }
        fn stop(&mut self) {
            self.stops += 1;
        }
        fn set_volume(&mut self, _pct: u8) {}
    }

    struct Screen<'a>(&'a mut Rec);

    impl Display for Screen<'_> {
        fn show_main_screen(&mut self, _s: &DeviceStatus, _p: &Position, _b: &BatteryStatus, _l: AlertLevel) {
            self.0.mains += 1;
        }
        fn show_alert_screen(&mut self, level: AlertLevel, _d: f32) {
            self.0.alerts.push(level);
        }
    }

    #[derive(Default)]
    struct Air(Vec<(u8, Vec<u8>)>);

    impl Radio for Air {
        fn send_packet(&mut self, port: u8, payload: &[u8]) -> Result<(), CollarError> {
            self.0.push((port, payload.to_vec()));
            Ok(())
        }
    }

    struct Harness {
        d: AlertDispatcher,
        buzzer: Rec,
        screen: Rec,
        air: Air,
        position: Position,
        battery: BatteryStatus,
        status: DeviceStatus,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                d: AlertDispatcher::new(DispatchConfig::default()),
                buzzer: Rec::default(),
                screen: Rec::default(),
                air: Air::default(),
                position: Position::new(-37.3464, -72.9149, 0),
                battery: BatteryStatus::from_voltage(3.9, 3.6, 3.4),
                status: DeviceStatus { uptime_ms: 0, gps_fix: true, inside_fence: true, distance_m: Some(8.0) },
            }
        }

        fn tick(&mut self, level: AlertLevel, transitions: &[Transition], now: u32) {
            let frame = DispatchFrame {
                level,
                distance_m: 8.0,
                position: &self.position,
                battery: &self.battery,
                status: &self.status,
            };
            let mut screen = Screen(&mut self.screen);
            let mut out = Outputs { buzzer: &mut self.buzzer, display: &mut screen, radio: &mut self.air };
            self.d.dispatch(&frame, transitions, &mut out, now);
        }

        fn position_reports(&self) -> usize {
            self.air.0.iter().filter(|(port, _)| *port == collar_proto::payload::PORT_POSITION).count()
        }
    }

    fn rise(from: AlertLevel, to: AlertLevel) -> Transition {
        Transition { from, to, kind: TransitionKind::Change, source: AlertSource::Geofence, distance_m: 8.0, reason: String::new() }
    }

    #[test]
    fn pattern_repeats_on_its_own_window() {
        let mut h = Harness::new();
        h.tick(AlertLevel::Warning, &[rise(AlertLevel::Safe, AlertLevel::Warning)], 1_000);
        assert_eq!(h.buzzer.tones, [2730]);
        h.tick(AlertLevel::Warning, &[], 5_999);
        assert_eq!(h.buzzer.tones.len(), 1);
        h.tick(AlertLevel::Warning, &[], 6_000);
        assert_eq!(h.buzzer.tones, [2730, 2730]);
    }

    #[test]
    fn same_millisecond_is_idempotent() {
        let mut h = Harness::new();
        let t = [rise(AlertLevel::Safe, AlertLevel::Danger)];
        h.tick(AlertLevel::Danger, &t, 500);
        h.tick(AlertLevel::Danger, &[], 500);
        assert_eq!(h.buzzer.tones, [3400]);
        assert_eq!(h.position_reports(), 1);
        assert_eq!(h.screen.alerts, [AlertLevel::Danger]);
    }

    #[test]
    fn safe_stops_buzzer_and_shows_main() {
        let mut h = Harness::new();
        h.tick(AlertLevel::Emergency, &[rise(AlertLevel::Safe, AlertLevel::Emergency)], 0);
        assert!(h.d.is_sounding());
        h.tick(AlertLevel::Safe, &[rise(AlertLevel::Emergency, AlertLevel::Safe)], 100);
        assert!(!h.d.is_sounding());
        assert_eq!(h.buzzer.stops, 1);
        assert_eq!(h.screen.mains, 1);
        assert_eq!(h.d.display_mode(), Some(DisplayMode::Main));
    }

    #[test]
    fn radio_follows_level_interval_and_escalation() {
        let mut h = Harness::new();
        h.tick(AlertLevel::Safe, &[], 0);
        assert_eq!(h.position_reports(), 1);
        h.tick(AlertLevel::Safe, &[], 119_999);
        assert_eq!(h.position_reports(), 1);

        h.tick(AlertLevel::Danger, &[rise(AlertLevel::Safe, AlertLevel::Danger)], 120_000 - 10);
        assert_eq!(h.position_reports(), 2);

        // no fix: escalation report waits for one
        h.position.valid = false;
        h.tick(AlertLevel::Emergency, &[rise(AlertLevel::Danger, AlertLevel::Emergency)], 121_000);
        assert_eq!(h.position_reports(), 2);
        h.position.valid = true;
        h.tick(AlertLevel::Emergency, &[], 121_100);
        assert_eq!(h.position_reports(), 3);
        h.tick(AlertLevel::Emergency, &[], 151_100);
        assert_eq!(h.position_reports(), 4);
    }

    #[test]
    fn position_report_carries_hdop_from_accuracy() {
        let mut h = Harness::new();
        h.position.accuracy = 1.5 * ACCURACY_PER_HDOP_M;
        h.tick(AlertLevel::Safe, &[], 0);
        let (_, frame) = h
            .air
            .0
            .iter()
            .find(|(port, _)| *port == collar_proto::payload::PORT_POSITION)
            .unwrap();
        // hdop_x10
        assert_eq!(frame[11], 15);
    }

    #[test]
    fn audio_and_display_can_be_disabled() {
        let mut h = Harness::new();
        h.d.set_audio_enabled(false);
        h.d.set_display_enabled(false);
        h.tick(AlertLevel::Danger, &[rise(AlertLevel::Safe, AlertLevel::Danger)], 0);
        assert!(h.buzzer.tones.is_empty());
        assert!(h.screen.alerts.is_empty());
        assert_eq!(h.position_reports(), 1);
    }
}
