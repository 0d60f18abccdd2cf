use crate::{AlertLevel, CollarError};

pub const PORT_SYSTEM: u8 = 1;
pub const PORT_ALERT: u8 = 2;
pub const PORT_CONFIG: u8 = 3;

const CMD_BUZZER_ON: u8 = 0x01;
const CMD_BUZZER_OFF: u8 = 0x02;
const CMD_SET_LEVEL: u8 = 0x03;

/// Commands received from the backend over the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownlinkCommand {
    /// Sound the buzzer as a manual alert.
    StartBuzzer,
    /// Clear any manual or automatic alert.
    StopAlert,
    /// Force a specific level.
    SetLevel(AlertLevel),
    /// Valid frame on a port the core does not act on.
    Unsupported { port: u8, command: u8 },
}

impl DownlinkCommand {
    pub fn decode(port: u8, data: &[u8]) -> Result<Self, CollarError> {
        let (&command, rest) = data
            .split_first()
            .ok_or_else(|| CollarError::invalid("empty downlink frame"))?;

        if port != PORT_ALERT {
            return Ok(Self::Unsupported { port, command });
        }

        match command {
            CMD_BUZZER_ON => Ok(Self::StartBuzzer),
            CMD_BUZZER_OFF => Ok(Self::StopAlert),
            CMD_SET_LEVEL => {
                let raw = rest
                    .first()
                    .copied()
                    .ok_or_else(|| CollarError::invalid("set-level command without level byte"))?;
                Ok(Self::SetLevel(AlertLevel::try_from(raw)?))
            }
            other => Err(CollarError::invalid(format!("unknown alert command 0x{:02X}", other))),
        }
    }
}
