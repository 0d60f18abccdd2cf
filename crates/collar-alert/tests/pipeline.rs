use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use collar_alert::{
    AlertListener, AlertSource, BatterySource, Buzzer, Collaborators, CollarController, ControllerConfig, DeviceStatus,
    Display, GpsSource, Radio,
};
use collar_geo::geo::destination;
use collar_geo::GeofenceStore;
use collar_proto::payload::PORT_POSITION;
use collar_proto::{AlertLevel, BatteryStatus, CollarError, GeoPoint, Position};

const CHACAY: GeoPoint = GeoPoint { lat: -37.34640277978371, lng: -72.91495492379738 };

#[derive(Default)]
struct World {
    position: Position,
    fix: bool,
    battery: BatteryStatus,
    tones: Vec<u16>,
    buzzer_stops: u32,
    alert_screens: Vec<AlertLevel>,
    main_screens: u32,
    packets: Vec<(u8, Vec<u8>)>,
    downlink: VecDeque<(u8, Vec<u8>)>,
    events: Vec<String>,
}

#[derive(Clone, Default)]
struct Shared(Arc<Mutex<World>>);

impl Shared {
    fn world(&self) -> MutexGuard<'_, World> {
        self.0.lock().unwrap()
    }

    fn place(&self, distance_from_center_m: f64, ts: u32) {
        let p = destination(CHACAY, 135.0, distance_from_center_m);
        let mut w = self.world();
        w.position = Position::new(p.lat, p.lng, ts);
        w.fix = true;
    }

    fn position_reports(&self) -> usize {
        self.world().packets.iter().filter(|(port, _)| *port == PORT_POSITION).count()
    }
}

impl GpsSource for Shared {
    fn position(&mut self) -> Result<Position, CollarError> {
        Ok(self.world().position)
    }
    fn has_valid_fix(&self) -> bool {
        self.world().fix
    }
}

impl BatterySource for Shared {
    fn read(&mut self) -> Result<BatteryStatus, CollarError> {
        Ok(self.world().battery)
    }
}

impl Buzzer for Shared {
    fn tone(&mut self, frequency_hz: u16) -> Result<(), CollarError> {
        self.world().tones.push(frequency_hz);
        Ok(())
    }
    fn stop(&mut self) {
        self.world().buzzer_stops += 1;
    }
    fn set_volume(&mut self, _pct: u8) {}
}

impl Display for Shared {
    fn show_main_screen(&mut self, _s: &DeviceStatus, _p: &Position, _b: &BatteryStatus, _l: AlertLevel) {
        self.world().main_screens += 1;
    }
    fn show_alert_screen(&mut self, level: AlertLevel, _distance_m: f32) {
        self.world().alert_screens.push(level);
    }
}

impl Radio for Shared {
    fn send_packet(&mut self, port: u8, payload: &[u8]) -> Result<(), CollarError> {
        self.world().packets.push((port, payload.to_vec()));
        Ok(())
    }
    fn poll_downlink(&mut self) -> Option<(u8, Vec<u8>)> {
        self.world().downlink.pop_front()
    }
}

struct Events(Shared);

impl AlertListener for Events {
    fn on_level_change(&mut self, old: AlertLevel, new: AlertLevel, _distance_m: f32, _reason: &str) {
        self.0.world().events.push(format!("{}->{}", old, new));
    }
    fn on_escalation(&mut self, old: AlertLevel, new: AlertLevel) {
        self.0.world().events.push(format!("escalated {}->{}", old, new));
    }
}

fn collar() -> (CollarController, Shared) {
    let hw = Shared::default();
    hw.world().battery = BatteryStatus::from_voltage(3.95, 3.6, 3.4);
    let mut store = GeofenceStore::default();
    store.set_circle(CHACAY, 50.0, "Chacay").unwrap();

    let collab = Collaborators {
        gps: Box::new(hw.clone()),
        battery: Box::new(hw.clone()),
        buzzer: Box::new(hw.clone()),
        display: Box::new(hw.clone()),
        radio: Box::new(hw.clone()),
    };
    let mut c = CollarController::new(store, ControllerConfig::default(), collab).unwrap();
    c.add_listener(Box::new(Events(hw.clone())));
    (c, hw)
}

#[test]
fn tick_before_init_is_rejected() {
    let (mut c, _hw) = collar();
    assert_eq!(c.tick(0).unwrap_err(), CollarError::NotInitialized);
}

#[test]
fn chacay_boundary_scenario() {
    let (mut c, hw) = collar();
    c.init(0);

    hw.place(45.0, 0);
    let r = c.tick(0).unwrap();
    assert!((r.distance_m - 5.0).abs() < 0.01);
    assert_eq!(r.level, AlertLevel::Danger);

    hw.place(55.0, 1_000);
    let r = c.tick(1_000).unwrap();
    assert!((r.distance_m + 5.0).abs() < 0.01);
    assert_eq!(r.level, AlertLevel::Emergency);
    assert_eq!(c.store().stats().violations, 1);
    assert_eq!(hw.world().events, ["SAFE->DANGER", "DANGER->EMERGENCY"]);
    assert_eq!(hw.world().tones, [3400, 4000]);
}

#[test]
fn sustained_caution_escalates_at_thirty_seconds() {
    let (mut c, hw) = collar();
    c.init(0);
    hw.place(35.0, 0);

    assert_eq!(c.tick(0).unwrap().level, AlertLevel::Caution);
    for now in (100..30_000).step_by(100) {
        assert_eq!(c.tick(now).unwrap().level, AlertLevel::Caution);
    }
    assert_eq!(c.tick(29_999).unwrap().level, AlertLevel::Caution);
    let r = c.tick(30_000).unwrap();
    assert_eq!(r.level, AlertLevel::Warning);
    assert!(hw.world().events.contains(&"escalated CAUTION->WARNING".to_string()));
}

#[test]
fn recovery_to_safe_is_immediate() {
    let (mut c, hw) = collar();
    c.init(0);
    hw.place(52.0, 0);
    assert_eq!(c.tick(0).unwrap().level, AlertLevel::Emergency);

    hw.place(10.0, 100);
    let r = c.tick(100).unwrap();
    assert_eq!(r.level, AlertLevel::Safe);
    assert!(!c.escalator().state().alert_active);
    assert!(hw.world().buzzer_stops >= 1);
    assert!(hw.world().main_screens >= 1);
}

#[test]
fn same_millisecond_ticks_are_idempotent() {
    let (mut c, hw) = collar();
    c.init(0);
    hw.place(47.0, 500);
    c.tick(500).unwrap();
    let alerts = c.escalator().state().total_alerts_triggered;
    let tones = hw.world().tones.len();
    let reports = hw.position_reports();

    c.tick(500).unwrap();
    assert_eq!(c.escalator().state().total_alerts_triggered, alerts);
    assert_eq!(hw.world().tones.len(), tones);
    assert_eq!(hw.position_reports(), reports);
}

#[test]
fn lost_fix_holds_distance_and_level() {
    let (mut c, hw) = collar();
    c.init(0);
    hw.place(42.0, 0);
    let before = c.tick(0).unwrap();
    assert_eq!(before.level, AlertLevel::Warning);

    hw.world().fix = false;
    hw.world().position.latitude = 0.0;
    let r = c.tick(1_000).unwrap();
    assert!(r.evaluation.is_none());
    assert_eq!(r.level, before.level);
    assert_eq!(c.escalator().state().current_distance, before.distance_m);
}

#[test]
fn critical_battery_forces_emergency_inside_fence() {
    let (mut c, hw) = collar();
    c.init(0);
    hw.place(0.0, 0);
    hw.world().battery = BatteryStatus::from_voltage(3.3, 3.6, 3.4);
    let r = c.tick(0).unwrap();
    assert_eq!(r.level, AlertLevel::Emergency);
    assert_eq!(c.escalator().state().source, AlertSource::Battery);
}

#[test]
fn downlink_commands_drive_manual_alerts() {
    let (mut c, hw) = collar();
    c.init(0);
    hw.place(0.0, 0);
    c.tick(0).unwrap();

    hw.world().downlink.push_back((2, vec![0x03, 9]));
    assert_eq!(c.tick(100).unwrap().level, AlertLevel::Safe);

    hw.world().downlink.push_back((2, vec![0x03, 3]));
    assert_eq!(c.tick(200).unwrap().level, AlertLevel::Danger);
    assert_eq!(c.escalator().state().source, AlertSource::Manual);
    // manual level is held while the animal is safe and the timer runs
    assert_eq!(c.tick(60_000).unwrap().level, AlertLevel::Danger);

    hw.world().downlink.push_back((2, vec![0x02]));
    assert_eq!(c.tick(60_100).unwrap().level, AlertLevel::Safe);
    assert_eq!(hw.world().events, ["SAFE->DANGER", "DANGER->SAFE"]);
}

#[test]
fn emergency_trigger_reaches_listeners_on_next_tick() {
    let (mut c, hw) = collar();
    c.init(0);
    hw.place(0.0, 0);
    c.tick(0).unwrap();

    c.trigger_emergency_alert("collar removed", 50).unwrap();
    assert!(hw.world().events.is_empty());
    assert_eq!(c.tick(100).unwrap().level, AlertLevel::Emergency);
    assert_eq!(hw.world().events, ["SAFE->EMERGENCY"]);
    assert_eq!(hw.world().tones, [4000]);
}

#[test]
fn manual_alert_at_current_level_survives_safe_ticks() {
    let (mut c, hw) = collar();
    c.init(0);
    hw.place(42.0, 0);
    assert_eq!(c.tick(0).unwrap().level, AlertLevel::Warning);

    assert!(c.start_alert(AlertLevel::Warning, 10).is_none());
    hw.place(0.0, 100);
    assert_eq!(c.tick(100).unwrap().level, AlertLevel::Warning);
    assert_eq!(c.tick(40_000).unwrap().level, AlertLevel::Warning);
    assert_eq!(c.escalator().state().source, AlertSource::Manual);
}

#[test]
fn stop_all_alerts_clears_system_floor_and_reaches_listeners() {
    let (mut c, hw) = collar();
    c.init(0);
    hw.place(52.0, 0);
    assert_eq!(c.tick(0).unwrap().level, AlertLevel::Emergency);

    // below the current level, so only the floor is recorded
    assert!(c.trigger_system_alert("gps antenna fault", AlertLevel::Caution, 10).is_none());

    let t = c.stop_all_alerts(20);
    assert_eq!(t.len(), 1);
    assert_eq!(t[0].to, AlertLevel::Safe);
    assert!(!c.escalator().state().alert_active);

    hw.place(0.0, 100);
    let r = c.tick(100).unwrap();
    assert_eq!(r.level, AlertLevel::Safe);
    assert_eq!(r.transitions.len(), 1);
    assert_eq!(hw.world().events, ["SAFE->EMERGENCY", "EMERGENCY->SAFE"]);
}

#[test]
fn system_alert_is_dispatched_on_next_tick() {
    let (mut c, hw) = collar();
    c.init(0);
    hw.place(0.0, 0);
    c.tick(0).unwrap();

    let t = c.trigger_system_alert("gps antenna fault", AlertLevel::Caution, 10).unwrap();
    assert_eq!(t.source, AlertSource::System);
    assert_eq!(c.tick(100).unwrap().level, AlertLevel::Caution);
    assert_eq!(hw.world().events, ["SAFE->CAUTION"]);
    assert_eq!(hw.world().tones, [2000]);
}
