use thiserror::Error;

/// Errors surfaced by the collar core.
///
/// Configuration calls report these to the caller and leave the previous
/// state untouched. Per-tick failures are absorbed by the update loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollarError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("no valid GPS fix")]
    NoFix,

    #[error("not initialized")]
    NotInitialized,

    #[error("store full (capacity {capacity})")]
    StoreFull { capacity: usize },
}

impl CollarError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn unavailable(what: impl Into<String>) -> Self {
        Self::HardwareUnavailable(what.into())
    }

    /// Ephemeral errors are held over for the next tick instead of being reported.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HardwareUnavailable(_) | Self::NoFix)
    }
}
