use serde::{Deserialize, Serialize};
use tracing::debug;

use collar_proto::{elapsed_ms, AlertLevel};

use crate::collab::Buzzer;

/// How a level sounds and how often it repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuzzerPattern {
    pub frequency_hz: u16,
    pub duration_ms: u32,
    pub volume_pct: u8,
    pub repeat_interval_ms: u32,
}

impl BuzzerPattern {
    pub fn for_level(level: AlertLevel) -> Option<Self> {
        let p = |frequency_hz, duration_ms, volume_pct, repeat_interval_ms| Self {
            frequency_hz,
            duration_ms,
            volume_pct,
            repeat_interval_ms,
        };
        match level {
            AlertLevel::Safe => None,
            AlertLevel::Caution => Some(p(2000, 200, 50, 8_000)),
            AlertLevel::Warning => Some(p(2730, 500, 75, 5_000)),
            AlertLevel::Danger => Some(p(3400, 1_000, 90, 3_000)),
            AlertLevel::Emergency => Some(p(4000, 1_000, 100, 2_000)),
        }
    }

    pub fn steps(&self) -> Vec<ToneStep> {
        vec![ToneStep { frequency_hz: Some(self.frequency_hz), duration_ms: self.duration_ms }]
    }
}

/// One timed step; `None` is a rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneStep {
    pub frequency_hz: Option<u16>,
    pub duration_ms: u32,
}

/// Plays a step sequence without blocking: each `advance` compares the
/// clock against the running step and moves on when it has elapsed.
#[derive(Debug, Default)]
pub struct TonePlayer {
    steps: Vec<ToneStep>,
    index: usize,
    step_start_ms: u32,
}

impl TonePlayer {
    pub fn is_playing(&self) -> bool {
        self.index < self.steps.len()
    }

    pub fn play(&mut self, steps: Vec<ToneStep>, volume_pct: u8, now_ms: u32, buzzer: &mut dyn Buzzer) {
        buzzer.set_volume(volume_pct);
        self.steps = steps;
        self.index = 0;
        self.start_step(now_ms, buzzer);
    }

    pub fn advance(&mut self, now_ms: u32, buzzer: &mut dyn Buzzer) {
        while let Some(step) = self.steps.get(self.index) {
            if elapsed_ms(now_ms, self.step_start_ms) < step.duration_ms {
                return;
            }
            self.step_start_ms = self.step_start_ms.wrapping_add(step.duration_ms);
            self.index += 1;
            self.start_step(now_ms, buzzer);
        }
    }

    pub fn stop(&mut self, buzzer: &mut dyn Buzzer) {
        if self.is_playing() {
            buzzer.stop();
        }
        self.steps.clear();
        self.index = 0;
    }

    fn start_step(&mut self, now_ms: u32, buzzer: &mut dyn Buzzer) {
        if self.index == 0 {
            self.step_start_ms = now_ms;
        }
        match self.steps.get(self.index) {
            Some(ToneStep { frequency_hz: Some(f), .. }) => {
                if let Err(e) = buzzer.tone(*f) {
                    debug!(error = %e, "buzzer unavailable");
                }
            }
            Some(ToneStep { frequency_hz: None, .. }) | None => buzzer.stop(),
        }
    }
}
