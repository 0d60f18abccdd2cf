use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CollarError;

/// Alert severity, totally ordered from `Safe` to `Emergency`.
///
/// The same scale is used for geofence proximity and battery severity;
/// concerns are combined by taking the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AlertLevel {
    #[default]
    Safe = 0,
    Caution = 1,
    Warning = 2,
    Danger = 3,
    Emergency = 4,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 5] = [
        AlertLevel::Safe,
        AlertLevel::Caution,
        AlertLevel::Warning,
        AlertLevel::Danger,
        AlertLevel::Emergency,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// One step more severe, saturating at `Emergency`.
    pub fn next(self) -> Self {
        match self {
            AlertLevel::Safe => AlertLevel::Caution,
            AlertLevel::Caution => AlertLevel::Warning,
            AlertLevel::Warning => AlertLevel::Danger,
            AlertLevel::Danger | AlertLevel::Emergency => AlertLevel::Emergency,
        }
    }

    pub fn is_max(self) -> bool {
        self == AlertLevel::Emergency
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Safe => "SAFE",
            AlertLevel::Caution => "CAUTION",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Danger => "DANGER",
            AlertLevel::Emergency => "EMERGENCY",
        }
    }

    /// Maps the older three-level encoding `{Safe, Caution, Warning}`.
    pub fn from_legacy(raw: u8) -> Result<Self, CollarError> {
        match raw {
            0 => Ok(AlertLevel::Safe),
            1 => Ok(AlertLevel::Caution),
            2 => Ok(AlertLevel::Warning),
            other => Err(CollarError::invalid(format!("legacy alert level {} out of range 0..=2", other))),
        }
    }
}

impl TryFrom<u8> for AlertLevel {
    type Error = CollarError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        AlertLevel::ALL
            .get(raw as usize)
            .copied()
            .ok_or_else(|| CollarError::invalid(format!("alert level {} out of range 0..=4", raw)))
    }
}

impl From<AlertLevel> for u8 {
    fn from(level: AlertLevel) -> u8 {
        level as u8
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
