use tracing::{debug, info, warn};

use collar_geo::{Evaluation, GeofenceEvaluator, GeofenceStore};
use collar_proto::downlink::DownlinkCommand;
use collar_proto::{elapsed_ms, AlertLevel, BatteryStatus, CollarError, Position};

use crate::collab::{AlertListener, Collaborators, DeviceStatus, Outputs};
use crate::dispatcher::{AlertDispatcher, DispatchConfig, DispatchFrame};
use crate::escalator::{AlertEscalator, AlertSource, BatteryLimits, EscalationConfig, GeofenceInput, TickInput, Transition};

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub escalation: EscalationConfig,
    pub battery: BatteryLimits,
    pub auto_stop: bool,
    pub dispatch: DispatchConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            escalation: EscalationConfig::default(),
            battery: BatteryLimits::default(),
            auto_stop: true,
            dispatch: DispatchConfig::default(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub level: AlertLevel,
    pub distance_m: f32,
    pub evaluation: Option<Evaluation>,
    pub transitions: Vec<Transition>,
}

/// Ties GPS and battery input to the alert outputs, one tick at a time.
pub struct CollarController {
    store: GeofenceStore,
    evaluator: GeofenceEvaluator,
    escalator: AlertEscalator,
    dispatcher: AlertDispatcher,
    hw: Collaborators,
    started_ms: Option<u32>,
    /// Transitions made outside a tick, dispatched on the next one.
    pending: Vec<Transition>,
    position: Position,
    battery: BatteryStatus,
}

impl CollarController {
    pub fn new(store: GeofenceStore, config: ControllerConfig, hw: Collaborators) -> Result<Self, CollarError> {
        let mut escalator = AlertEscalator::new(config.escalation, config.battery)?;
        escalator.set_auto_stop(config.auto_stop);
        Ok(Self {
            store,
            evaluator: GeofenceEvaluator::new(),
            escalator,
            dispatcher: AlertDispatcher::new(config.dispatch),
            hw,
            started_ms: None,
            pending: Vec::new(),
            position: Position::default(),
            battery: BatteryStatus::default(),
        })
    }

    pub fn init(&mut self, now_ms: u32) {
        self.escalator.reset(now_ms);
        self.started_ms = Some(now_ms);
        info!(
            fence = self.store.geofence().map(|f| f.name()).unwrap_or("<none>"),
            extra_fences = self.store.fence_count(),
            "collar controller initialized"
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.started_ms.is_some()
    }

    pub fn add_listener(&mut self, listener: Box<dyn AlertListener + Send>) {
        self.dispatcher.add_listener(listener);
    }

    pub fn store(&self) -> &GeofenceStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut GeofenceStore {
        &mut self.store
    }

    pub fn escalator(&self) -> &AlertEscalator {
        &self.escalator
    }

    pub fn dispatcher_mut(&mut self) -> &mut AlertDispatcher {
        &mut self.dispatcher
    }

    pub fn last_position(&self) -> &Position {
        &self.position
    }

    pub fn last_battery(&self) -> &BatteryStatus {
        &self.battery
    }

    pub fn tick(&mut self, now_ms: u32) -> Result<TickReport, CollarError> {
        let started = self.started_ms.ok_or(CollarError::NotInitialized)?;

        while let Some((port, data)) = self.hw.radio.poll_downlink() {
            if let Err(e) = self.handle_downlink(port, &data, now_ms) {
                warn!(port, error = %e, "downlink rejected");
            }
        }
        let mut transitions = std::mem::take(&mut self.pending);

        let position = self.read_position(now_ms);
        let evaluation = self.evaluator.evaluate(&mut self.store, &position, now_ms);
        let battery = match self.hw.battery.read() {
            Ok(b) => {
                self.battery = b;
                Some(b)
            }
            Err(e) => {
                debug!(error = %e, "battery read failed, holding last sample");
                None
            }
        };

        let input = TickInput {
            geofence: evaluation.map(|e| GeofenceInput { distance_m: e.distance_m, level: e.level }),
            battery,
        };
        transitions.extend(self.escalator.update(input, now_ms));

        let state = self.escalator.state();
        let (level, distance_m) = (state.current_level, state.current_distance);
        let status = DeviceStatus {
            uptime_ms: elapsed_ms(now_ms, started),
            gps_fix: position.is_usable(),
            inside_fence: self.store.is_inside_any(&position),
            distance_m: self.evaluator.last().map(|e| e.distance_m),
        };
        let frame = DispatchFrame { level, distance_m, position: &position, battery: &self.battery, status: &status };
        let mut out = Outputs {
            buzzer: &mut *self.hw.buzzer,
            display: &mut *self.hw.display,
            radio: &mut *self.hw.radio,
        };
        self.dispatcher.dispatch(&frame, &transitions, &mut out, now_ms);

        self.position = position;
        Ok(TickReport { level, distance_m, evaluation, transitions })
    }

    /// Applies a backend command. Invalid frames leave the alert state untouched.
    pub fn handle_downlink(&mut self, port: u8, data: &[u8], now_ms: u32) -> Result<Vec<Transition>, CollarError> {
        let cmd = DownlinkCommand::decode(port, data)?;
        info!(?cmd, "downlink command");
        let t = match cmd {
            DownlinkCommand::StartBuzzer => self.start_alert(AlertLevel::Warning, now_ms),
            DownlinkCommand::StopAlert => self.stop_alert(now_ms),
            DownlinkCommand::SetLevel(level) => self.start_alert(level, now_ms),
            DownlinkCommand::Unsupported { port, command } => {
                debug!(port, command, "downlink command ignored");
                None
            }
        };
        Ok(t.into_iter().collect())
    }

    // Commands below change the level now; listeners and outputs see it on the next tick.

    pub fn start_alert(&mut self, level: AlertLevel, now_ms: u32) -> Option<Transition> {
        let distance = self.escalator.state().current_distance;
        let t = self.escalator.start_alert(level, distance, now_ms);
        self.queue(t)
    }

    pub fn set_alert_level(&mut self, level: AlertLevel, source: AlertSource, reason: &str, now_ms: u32) -> Option<Transition> {
        let distance = self.escalator.state().current_distance;
        let t = self.escalator.set_alert_level(level, distance, source, reason, now_ms);
        self.queue(t)
    }

    pub fn trigger_emergency_alert(&mut self, reason: &str, now_ms: u32) -> Option<Transition> {
        let t = self.escalator.trigger_emergency_alert(reason, now_ms);
        self.queue(t)
    }

    pub fn trigger_system_alert(&mut self, message: &str, level: AlertLevel, now_ms: u32) -> Option<Transition> {
        let t = self.escalator.trigger_system_alert(message, level, now_ms);
        self.queue(t)
    }

    pub fn stop_alert(&mut self, now_ms: u32) -> Option<Transition> {
        let t = self.escalator.stop_alert(now_ms);
        self.queue(t)
    }

    pub fn stop_all_alerts(&mut self, now_ms: u32) -> Vec<Transition> {
        let t = self.escalator.stop_all_alerts(now_ms);
        self.pending.extend(t.iter().cloned());
        t
    }

    pub fn set_enabled(&mut self, on: bool, now_ms: u32) {
        let t = self.escalator.set_enabled(on, now_ms);
        self.pending.extend(t);
    }

    fn queue(&mut self, t: Option<Transition>) -> Option<Transition> {
        self.pending.extend(t.iter().cloned());
        t
    }

    fn read_position(&mut self, now_ms: u32) -> Position {
        let fix = self.hw.gps.has_valid_fix();
        match self.hw.gps.position() {
            Ok(mut p) => {
                p.valid &= fix;
                p
            }
            Err(e) => {
                debug!(error = %e, "gps unavailable");
                Position::invalid(now_ms)
            }
        }
    }
}
