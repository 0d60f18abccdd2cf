use std::time::Instant;

/// Millisecond device clock shared by the GNSS reader and the control loop.
///
/// Wraps after ~49 days like the collar's hardware tick counter; consumers
/// compare timestamps with `wrapping_sub`.
#[derive(Debug, Clone, Copy)]
pub struct DeviceClock {
    epoch: Instant,
}

impl DeviceClock {
    pub fn start() -> Self {
        Self { epoch: Instant::now() }
    }

    pub fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }
}

impl Default for DeviceClock {
    fn default() -> Self {
        Self::start()
    }
}

/// Milliseconds elapsed from `since` to `now`, tolerant of counter wrap.
pub fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_survives_wrap() {
        assert_eq!(elapsed_ms(5, u32::MAX - 4), 10);
        assert_eq!(elapsed_ms(30_000, 0), 30_000);
    }
}
