use serde::{Deserialize, Serialize};

use crate::time::{self, seconds_to_beats};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub beat: f64,
    pub bpm: f64,
}

impl ClockSnapshot {
    #[must_use]
    pub fn new(beat: f64, bpm: f64) -> Self {
        Self { beat, bpm }
    }

    #[must_use]
    pub fn next_whole_beat(&self) -> f64 {
        time::next_whole_beat(self.beat)
    }

    #[must_use]
    pub fn units_per_beat(&self, unit_rate: f64) -> f64 {
        time::units_per_beat(self.bpm, unit_rate)
    }

    #[must_use]
    pub fn beats_per_unit(&self, unit_rate: f64) -> f64 {
        time::beats_per_unit(self.bpm, unit_rate)
    }
}

pub trait TempoClock {
    fn current_beat(&self) -> f64;
    fn tempo(&self) -> f64;

    fn next_whole_beat(&self) -> f64 {
        time::next_whole_beat(self.current_beat())
    }

    fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot::new(self.current_beat(), self.tempo())
    }
}

/// Free-running clock integrated from elapsed seconds. Tempo changes keep the
/// beat continuous.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedClock {
    beat: f64,
    bpm: f64,
}

impl SimulatedClock {
    #[must_use]
    pub fn new(bpm: f64) -> Self {
        Self::starting_at(0.0, bpm)
    }

    #[must_use]
    pub fn starting_at(beat: f64, bpm: f64) -> Self {
        Self {
            beat: beat.max(0.0),
            bpm: bpm.max(0.0),
        }
    }

    pub fn advance_seconds(&mut self, seconds: f64) {
        self.beat += seconds_to_beats(seconds, self.bpm);
    }

    pub fn advance_beats(&mut self, beats: f64) {
        self.beat += beats.max(0.0);
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        self.bpm = bpm.max(0.0);
    }
}

impl TempoClock for SimulatedClock {
    fn current_beat(&self) -> f64 {
        self.beat
    }

    fn tempo(&self) -> f64 {
        self.bpm
    }
}

/// Clock positioned by hand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualClock {
    pub beat: f64,
    pub bpm: f64,
}

impl TempoClock for ManualClock {
    fn current_beat(&self) -> f64 {
        self.beat
    }

    fn tempo(&self) -> f64 {
        self.bpm
    }
}
