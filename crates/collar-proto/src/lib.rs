pub mod clock;
pub mod downlink;
pub mod error;
pub mod level;
pub mod payload;
pub mod telemetry;
pub mod types;

pub use clock::{elapsed_ms, DeviceClock};
pub use error::CollarError;
pub use level::AlertLevel;
pub use types::{is_valid_coordinate, BatteryStatus, GeoPoint, Position};
