//! Alert escalation state machine.
//!
//! Two severity inputs (geofence proximity and battery) are combined by
//! taking the maximum. Rising severity is applied at once, a return to
//! `Safe` is applied at once when auto-stop is on, and a sustained non-safe
//! condition climbs one level per `time_to_escalate_ms`.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use collar_proto::{elapsed_ms, AlertLevel, BatteryStatus, CollarError};

pub const MAX_REASON_LEN: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub enabled: bool,
    pub time_to_escalate_ms: u32,
    pub reset_on_improvement: bool,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { enabled: true, time_to_escalate_ms: 30_000, reset_on_improvement: true }
    }
}

impl EscalationConfig {
    pub fn validate(&self) -> Result<(), CollarError> {
        if self.time_to_escalate_ms == 0 {
            return Err(CollarError::invalid("time_to_escalate_ms must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryLimits {
    pub low_v: f32,
    pub critical_v: f32,
}

impl Default for BatteryLimits {
    fn default() -> Self {
        Self { low_v: 3.6, critical_v: 3.4 }
    }
}

impl BatteryLimits {
    /// Severity implied by a battery reading. `None` for a 0 V sample, which is
    /// an ADC that has not produced data yet.
    pub fn severity(&self, battery: &BatteryStatus) -> Option<AlertLevel> {
        if battery.voltage <= 0.0 {
            return None;
        }
        let level = if battery.critical || battery.voltage <= self.critical_v {
            AlertLevel::Emergency
        } else if battery.low || battery.voltage <= self.low_v {
            AlertLevel::Warning
        } else {
            AlertLevel::Safe
        };
        Some(level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSource {
    Geofence,
    Battery,
    System,
    Manual,
    Emergency,
}

impl AlertSource {
    /// Held sources are not recomputed from sensor input until `stop_alert`.
    pub fn is_held(self) -> bool {
        matches!(self, AlertSource::Manual | AlertSource::Emergency)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertState {
    pub current_level: AlertLevel,
    pub previous_level: AlertLevel,
    pub max_level_reached: AlertLevel,
    pub alert_active: bool,
    pub current_distance: f32,
    pub alert_start_ms: u32,
    pub last_alert_ms: u32,
    pub level_start_ms: u32,
    pub escalation_pending: bool,
    pub total_alerts_triggered: u32,
    pub source: AlertSource,
    pub reason: String,
}

impl AlertState {
    fn initial(now_ms: u32) -> Self {
        Self {
            current_level: AlertLevel::Safe,
            previous_level: AlertLevel::Safe,
            max_level_reached: AlertLevel::Safe,
            alert_active: false,
            current_distance: 0.0,
            alert_start_ms: 0,
            last_alert_ms: 0,
            level_start_ms: now_ms,
            escalation_pending: false,
            total_alerts_triggered: 0,
            source: AlertSource::Geofence,
            reason: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Level set from input, a command, or a stop.
    Change,
    /// Level raised by the escalation timer.
    Escalation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: AlertLevel,
    pub to: AlertLevel,
    pub kind: TransitionKind,
    pub source: AlertSource,
    pub distance_m: f32,
    pub reason: String,
}

impl Transition {
    pub fn is_rise(&self) -> bool {
        self.to > self.from
    }
}

/// Geofence part of one tick's input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceInput {
    pub distance_m: f32,
    pub level: AlertLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickInput {
    /// `None` when the position could not be evaluated this tick.
    pub geofence: Option<GeofenceInput>,
    /// `None` when the battery could not be read this tick.
    pub battery: Option<BatteryStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertStats {
    pub total_alerts: u32,
    pub max_level_reached: AlertLevel,
    /// Duration of the running alert, 0 when none is active.
    pub alert_duration_ms: u32,
    pub time_since_last_alert_ms: Option<u32>,
}

pub struct AlertEscalator {
    config: EscalationConfig,
    battery_limits: BatteryLimits,
    auto_stop: bool,
    enabled: bool,
    state: AlertState,
    geo_level: AlertLevel,
    battery_level: AlertLevel,
    prev_raw: AlertLevel,
    system_floor: Option<(AlertLevel, String)>,
    any_alert: bool,
}

impl AlertEscalator {
    pub fn new(config: EscalationConfig, battery_limits: BatteryLimits) -> Result<Self, CollarError> {
        config.validate()?;
        if battery_limits.low_v <= battery_limits.critical_v {
            return Err(CollarError::invalid("battery low voltage must be above critical voltage"));
        }
        Ok(Self {
            config,
            battery_limits,
            auto_stop: true,
            enabled: true,
            state: AlertState::initial(0),
            geo_level: AlertLevel::Safe,
            battery_level: AlertLevel::Safe,
            prev_raw: AlertLevel::Safe,
            system_floor: None,
            any_alert: false,
        })
    }

    /// Back to the entry state: `Safe`, inactive, level timer starting at `now_ms`.
    pub fn reset(&mut self, now_ms: u32) {
        self.state = AlertState::initial(now_ms);
        self.geo_level = AlertLevel::Safe;
        self.battery_level = AlertLevel::Safe;
        self.prev_raw = AlertLevel::Safe;
        self.system_floor = None;
        self.any_alert = false;
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    pub fn level(&self) -> AlertLevel {
        self.state.current_level
    }

    pub fn config(&self) -> EscalationConfig {
        self.config
    }

    /// Rejected configs leave the running one in place.
    pub fn set_config(&mut self, config: EscalationConfig) -> Result<(), CollarError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_auto_stop(&mut self, on: bool) {
        self.auto_stop = on;
    }

    pub fn auto_stop(&self) -> bool {
        self.auto_stop
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling stops every alert and suppresses automatic computation.
    pub fn set_enabled(&mut self, on: bool, now_ms: u32) -> Vec<Transition> {
        self.enabled = on;
        info!(enabled = on, "alert system enable changed");
        if on {
            Vec::new()
        } else {
            self.stop_all_alerts(now_ms)
        }
    }

    /// Raw level from the last geofence and battery inputs (and any system alert).
    pub fn raw_level(&self) -> AlertLevel {
        let floor = self.system_floor.as_ref().map(|(l, _)| *l).unwrap_or(AlertLevel::Safe);
        self.geo_level.max(self.battery_level).max(floor)
    }

    /// Sets the level unconditionally. No-op when `level` is already current.
    pub fn set_alert_level(
        &mut self,
        level: AlertLevel,
        distance_m: f32,
        source: AlertSource,
        reason: &str,
        now_ms: u32,
    ) -> Option<Transition> {
        self.change_level(level, distance_m, source, reason, TransitionKind::Change, now_ms)
    }

    /// One control tick of automatic computation.
    pub fn update(&mut self, input: TickInput, now_ms: u32) -> Vec<Transition> {
        let mut out = Vec::new();

        if let Some(g) = input.geofence {
            self.state.current_distance = g.distance_m;
            self.geo_level = g.level;
        }
        if let Some(level) = input.battery.as_ref().and_then(|b| self.battery_limits.severity(b)) {
            self.battery_level = level;
        }

        if !self.enabled || self.state.source.is_held() {
            return out;
        }

        let raw = self.raw_level();
        let improving = raw < self.prev_raw;
        self.prev_raw = raw;
        let (source, reason) = self.describe_raw(raw, input.battery.as_ref());
        let current = self.state.current_level;
        let distance = self.state.current_distance;

        if raw > current {
            out.extend(self.change_level(raw, distance, source, &reason, TransitionKind::Change, now_ms));
        } else if raw == AlertLevel::Safe && current != AlertLevel::Safe && self.auto_stop {
            out.extend(self.change_level(raw, distance, source, "condition cleared", TransitionKind::Change, now_ms));
        } else if improving && self.config.reset_on_improvement {
            self.state.level_start_ms = now_ms;
        }

        out.extend(self.update_escalation(raw, now_ms));
        self.state.escalation_pending = self.state.alert_active
            && self.config.enabled
            && raw > AlertLevel::Safe
            && !self.state.current_level.is_max();
        out
    }

    fn update_escalation(&mut self, raw: AlertLevel, now_ms: u32) -> Option<Transition> {
        let s = &self.state;
        if !self.config.enabled || !s.alert_active || raw == AlertLevel::Safe || s.current_level.is_max() {
            return None;
        }
        if elapsed_ms(now_ms, s.level_start_ms) < self.config.time_to_escalate_ms {
            return None;
        }
        let next = s.current_level.next();
        let reason = format!("escalated after {} ms in {}", elapsed_ms(now_ms, s.level_start_ms), s.current_level);
        let (distance, source) = (s.current_distance, s.source);
        self.change_level(next, distance, source, &reason, TransitionKind::Escalation, now_ms)
    }

    /// Manual alert; held until `stop_alert`. A manual `Safe` is a stop.
    pub fn start_alert(&mut self, level: AlertLevel, distance_m: f32, now_ms: u32) -> Option<Transition> {
        if level == AlertLevel::Safe {
            return self.stop_alert(now_ms);
        }
        info!(%level, "manual alert started");
        let t = self.change_level(level, distance_m, AlertSource::Manual, "manual alert", TransitionKind::Change, now_ms);
        self.hold(AlertSource::Manual, "manual alert");
        t
    }

    /// Clears manual, emergency and system alerts. Automatic computation resumes on the next tick.
    pub fn stop_alert(&mut self, now_ms: u32) -> Option<Transition> {
        self.system_floor = None;
        let distance = self.state.current_distance;
        let t = self.change_level(AlertLevel::Safe, distance, AlertSource::Geofence, "alert stopped", TransitionKind::Change, now_ms);
        self.state.source = AlertSource::Geofence;
        t
    }

    /// `stop_alert` plus forgetting the held sensor severities.
    pub fn stop_all_alerts(&mut self, now_ms: u32) -> Vec<Transition> {
        let out: Vec<Transition> = self.stop_alert(now_ms).into_iter().collect();
        self.geo_level = AlertLevel::Safe;
        self.battery_level = AlertLevel::Safe;
        self.prev_raw = AlertLevel::Safe;
        self.state.escalation_pending = false;
        out
    }

    pub fn trigger_emergency_alert(&mut self, reason: &str, now_ms: u32) -> Option<Transition> {
        error!(reason, "emergency alert triggered");
        let distance = self.state.current_distance;
        let t = self.change_level(AlertLevel::Emergency, distance, AlertSource::Emergency, reason, TransitionKind::Change, now_ms);
        self.hold(AlertSource::Emergency, reason);
        t
    }

    /// Latches a held source even when the level itself did not move.
    fn hold(&mut self, source: AlertSource, reason: &str) {
        self.state.source = source;
        self.state.reason = clip_reason(reason);
        self.state.escalation_pending = false;
    }

    /// Raises the automatic level to at least `level` until `stop_alert`.
    pub fn trigger_system_alert(&mut self, message: &str, level: AlertLevel, now_ms: u32) -> Option<Transition> {
        warn!(msg = message, %level, "system alert");
        self.system_floor = Some((level, clip_reason(message)));
        if self.state.source.is_held() || level <= self.state.current_level {
            return None;
        }
        let distance = self.state.current_distance;
        self.change_level(level, distance, AlertSource::System, message, TransitionKind::Change, now_ms)
    }

    pub fn stats(&self, now_ms: u32) -> AlertStats {
        let s = &self.state;
        AlertStats {
            total_alerts: s.total_alerts_triggered,
            max_level_reached: s.max_level_reached,
            alert_duration_ms: if s.alert_active { elapsed_ms(now_ms, s.alert_start_ms) } else { 0 },
            time_since_last_alert_ms: self.any_alert.then(|| elapsed_ms(now_ms, s.last_alert_ms)),
        }
    }

    fn describe_raw(&self, raw: AlertLevel, battery: Option<&BatteryStatus>) -> (AlertSource, String) {
        if let Some((level, msg)) = &self.system_floor {
            if *level == raw && raw > self.geo_level.max(self.battery_level) {
                return (AlertSource::System, msg.clone());
            }
        }
        if self.battery_level > self.geo_level {
            let v = battery.map(|b| b.voltage).unwrap_or_default();
            return (AlertSource::Battery, format!("battery {:.2} V", v));
        }
        let d = self.state.current_distance;
        let reason = if d < 0.0 {
            format!("outside geofence by {:.1} m", -d)
        } else {
            format!("{:.1} m to geofence limit", d)
        };
        (AlertSource::Geofence, reason)
    }

    fn change_level(
        &mut self,
        level: AlertLevel,
        distance_m: f32,
        source: AlertSource,
        reason: &str,
        kind: TransitionKind,
        now_ms: u32,
    ) -> Option<Transition> {
        let s = &mut self.state;
        if level == s.current_level {
            return None;
        }
        let from = s.current_level;
        s.previous_level = from;
        s.current_level = level;
        s.level_start_ms = now_ms;
        s.source = source;
        s.reason = clip_reason(reason);
        if level > s.max_level_reached {
            s.max_level_reached = level;
        }

        if level != AlertLevel::Safe {
            if !s.alert_active {
                s.alert_active = true;
                s.alert_start_ms = now_ms;
                s.total_alerts_triggered += 1;
                info!(%level, reason = %s.reason, "alert started");
            }
            s.last_alert_ms = now_ms;
            self.any_alert = true;
        } else if s.alert_active {
            s.alert_active = false;
            s.escalation_pending = false;
            info!(duration_ms = elapsed_ms(now_ms, s.alert_start_ms), "alert ended");
        }

        match kind {
            TransitionKind::Escalation => warn!(%from, to = %level, reason = %s.reason, "alert escalated"),
            TransitionKind::Change => info!(%from, to = %level, ?source, reason = %s.reason, "alert level changed"),
        }

        Some(Transition { from, to: level, kind, source, distance_m, reason: s.reason.clone() })
    }
}

fn clip_reason(reason: &str) -> String {
    reason.chars().take(MAX_REASON_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn esc() -> AlertEscalator {
        AlertEscalator::new(EscalationConfig::default(), BatteryLimits::default()).unwrap()
    }

    fn geo(level: AlertLevel, distance_m: f32) -> TickInput {
        TickInput { geofence: Some(GeofenceInput { distance_m, level }), battery: None }
    }

    #[test]
    fn escalates_at_exactly_time_to_escalate() {
        let mut e = esc();
        e.reset(0);
        assert_eq!(e.update(geo(AlertLevel::Caution, 15.0), 0).len(), 1);
        assert!(e.update(geo(AlertLevel::Caution, 15.0), 29_999).is_empty());
        assert_eq!(e.level(), AlertLevel::Caution);

        let t = e.update(geo(AlertLevel::Caution, 15.0), 30_000);
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].kind, TransitionKind::Escalation);
        assert_eq!(e.level(), AlertLevel::Warning);
        assert_eq!(e.state().total_alerts_triggered, 1);
    }

    #[test]
    fn recovery_is_immediate() {
        for level in [AlertLevel::Caution, AlertLevel::Danger, AlertLevel::Emergency] {
            let mut e = esc();
            e.update(geo(level, 1.0), 100);
            let t = e.update(geo(AlertLevel::Safe, 40.0), 101);
            assert_eq!(t[0].to, AlertLevel::Safe);
            assert_eq!(e.level(), AlertLevel::Safe);
            assert!(!e.state().alert_active);
        }
    }

    #[test]
    fn improvement_holds_level_and_restarts_timer() {
        let mut e = esc();
        e.update(geo(AlertLevel::Danger, 3.0), 0);
        assert!(e.update(geo(AlertLevel::Caution, 15.0), 20_000).is_empty());
        assert_eq!(e.level(), AlertLevel::Danger);
        assert_eq!(e.state().level_start_ms, 20_000);
        assert!(e.update(geo(AlertLevel::Caution, 15.0), 49_999).is_empty());
        let t = e.update(geo(AlertLevel::Caution, 15.0), 50_000);
        assert_eq!(t[0].to, AlertLevel::Emergency);
    }

    #[test]
    fn auto_stop_off_holds_level() {
        let mut e = esc();
        e.set_auto_stop(false);
        e.update(geo(AlertLevel::Warning, 8.0), 0);
        assert!(e.update(geo(AlertLevel::Safe, 40.0), 10).is_empty());
        assert_eq!(e.level(), AlertLevel::Warning);
        // a safe raw level never escalates
        assert!(e.update(geo(AlertLevel::Safe, 40.0), 100_000).is_empty());
    }

    #[test]
    fn missing_input_holds_distance_and_level() {
        let mut e = esc();
        e.update(geo(AlertLevel::Warning, 8.0), 0);
        let before = e.state().clone();
        assert!(e.update(TickInput::default(), 10).is_empty());
        assert_eq!(e.state(), &before);
    }

    #[test]
    fn battery_forces_minimum_level() {
        let mut e = esc();
        let low = BatteryStatus::from_voltage(3.55, 3.6, 3.4);
        let t = e.update(TickInput { geofence: Some(GeofenceInput { distance_m: 40.0, level: AlertLevel::Safe }), battery: Some(low) }, 0);
        assert_eq!(t[0].to, AlertLevel::Warning);
        assert_eq!(t[0].source, AlertSource::Battery);

        let crit = BatteryStatus::from_voltage(3.3, 3.6, 3.4);
        e.update(TickInput { geofence: None, battery: Some(crit) }, 10);
        assert_eq!(e.level(), AlertLevel::Emergency);

        // 0 V sample is held, not treated as critical or healthy
        let glitch = BatteryStatus { voltage: 0.0, ..Default::default() };
        assert!(e.update(TickInput { geofence: None, battery: Some(glitch) }, 20).is_empty());
        assert_eq!(e.level(), AlertLevel::Emergency);
    }

    #[test]
    fn manual_alert_is_held_until_stopped() {
        let mut e = esc();
        e.start_alert(AlertLevel::Warning, 0.0, 0).unwrap();
        assert!(e.update(geo(AlertLevel::Safe, 40.0), 10).is_empty());
        assert!(e.update(geo(AlertLevel::Safe, 40.0), 60_000).is_empty());
        assert_eq!(e.level(), AlertLevel::Warning);

        e.stop_alert(60_001).unwrap();
        assert_eq!(e.level(), AlertLevel::Safe);
        let t = e.update(geo(AlertLevel::Caution, 15.0), 60_002);
        assert_eq!(t[0].to, AlertLevel::Caution);
    }

    #[test]
    fn manual_alert_at_current_level_is_still_held() {
        let mut e = esc();
        e.update(geo(AlertLevel::Warning, 8.0), 0);
        assert!(e.start_alert(AlertLevel::Warning, 8.0, 10).is_none());
        assert_eq!(e.state().source, AlertSource::Manual);

        assert!(e.update(geo(AlertLevel::Safe, 40.0), 20).is_empty());
        assert!(e.update(geo(AlertLevel::Caution, 15.0), 90_000).is_empty());
        assert_eq!(e.level(), AlertLevel::Warning);

        e.stop_alert(90_001).unwrap();
        assert_eq!(e.level(), AlertLevel::Safe);
    }

    #[test]
    fn emergency_at_current_level_keeps_reason_and_holds() {
        let mut e = esc();
        e.update(geo(AlertLevel::Emergency, -3.0), 0);
        assert!(e.trigger_emergency_alert("collar removed", 10).is_none());
        assert_eq!(e.state().source, AlertSource::Emergency);
        assert_eq!(e.state().reason, "collar removed");

        assert!(e.update(geo(AlertLevel::Safe, 40.0), 20).is_empty());
        assert_eq!(e.level(), AlertLevel::Emergency);
    }

    #[test]
    fn emergency_jumps_directly() {
        let mut e = esc();
        e.update(geo(AlertLevel::Caution, 15.0), 0);
        let t = e.trigger_emergency_alert("tamper detected", 5).unwrap();
        assert_eq!((t.from, t.to), (AlertLevel::Caution, AlertLevel::Emergency));
        assert_eq!(e.state().source, AlertSource::Emergency);
        assert_eq!(e.state().total_alerts_triggered, 1);
    }

    #[test]
    fn system_alert_acts_as_floor() {
        let mut e = esc();
        e.trigger_system_alert("gps antenna fault", AlertLevel::Caution, 0).unwrap();
        assert!(e.update(geo(AlertLevel::Safe, 40.0), 10).is_empty());
        assert_eq!(e.level(), AlertLevel::Caution);
        e.update(geo(AlertLevel::Danger, 3.0), 20);
        assert_eq!(e.level(), AlertLevel::Danger);
        e.stop_alert(30);
        assert!(e.update(geo(AlertLevel::Safe, 40.0), 40).is_empty());
        assert_eq!(e.level(), AlertLevel::Safe);
    }

    #[test]
    fn disabled_suppresses_everything() {
        let mut e = esc();
        e.update(geo(AlertLevel::Danger, 3.0), 0);
        let t = e.set_enabled(false, 10);
        assert_eq!(t[0].to, AlertLevel::Safe);
        assert!(e.update(geo(AlertLevel::Emergency, -3.0), 20).is_empty());
        e.set_enabled(true, 30);
        assert_eq!(e.update(geo(AlertLevel::Emergency, -3.0), 40)[0].to, AlertLevel::Emergency);
    }

    #[test]
    fn stats_and_reason_limits() {
        let mut e = esc();
        assert_eq!(e.stats(0).time_since_last_alert_ms, None);
        e.trigger_system_alert(&"x".repeat(100), AlertLevel::Warning, 1_000);
        assert_eq!(e.state().reason.chars().count(), MAX_REASON_LEN);
        let st = e.stats(4_000);
        assert_eq!(st.alert_duration_ms, 3_000);
        assert_eq!(st.time_since_last_alert_ms, Some(3_000));
        assert_eq!(st.max_level_reached, AlertLevel::Warning);
    }

    #[test]
    fn zero_escalation_time_rejected() {
        let bad = EscalationConfig { time_to_escalate_ms: 0, ..Default::default() };
        assert!(AlertEscalator::new(bad, BatteryLimits::default()).is_err());
        let mut e = esc();
        assert!(e.set_config(bad).is_err());
        assert_eq!(e.config().time_to_escalate_ms, 30_000);
    }
}
