pub mod collab;
pub mod controller;
pub mod dispatcher;
pub mod escalator;
pub mod tone;

pub use collab::{AlertListener, BatterySource, Buzzer, Collaborators, DeviceStatus, Display, GpsSource, Outputs, Radio};
pub use controller::{CollarController, ControllerConfig, TickReport};
pub use dispatcher::{AlertDispatcher, DispatchConfig, DisplayMode};
pub use escalator::{
    AlertEscalator, AlertSource, AlertState, AlertStats, BatteryLimits, EscalationConfig, Transition, TransitionKind,
};
pub use tone::{BuzzerPattern, TonePlayer, ToneStep};
