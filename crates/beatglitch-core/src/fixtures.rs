use std::f64::consts::TAU;

use rand::{SeedableRng, rngs::StdRng};

use crate::{
    action::Media,
    buffer::RingBuffer,
    clock::ClockSnapshot,
    config::{Parameters, PerformanceConfig},
    engine::Frame,
    scheduler::{Scheduler, Tick, TickReport},
    time,
};

/// Sine tone generator standing in for a microphone.
#[derive(Debug, Clone)]
pub struct ToneSource {
    frequency_hz: f64,
    sample_rate: f64,
    amplitude: f32,
    position: u64,
}

impl ToneSource {
    #[must_use]
    pub fn new(frequency_hz: f64, sample_rate: u32, amplitude: f32) -> Self {
        Self {
            frequency_hz,
            sample_rate: f64::from(sample_rate.max(1)),
            amplitude,
            position: 0,
        }
    }

    pub fn fill(&mut self, block: &mut [f32]) {
        for sample in block {
            let phase = TAU * self.frequency_hz * self.position as f64 / self.sample_rate;
            *sample = phase.sin() as f32 * self.amplitude;
            self.position += 1;
        }
    }
}

/// Capture source whose unit `k` holds the value `k`, so tests can read
/// buffer indices straight out of rendered output.
#[derive(Debug, Clone, Default)]
pub struct RampSource {
    next: u64,
}

impl RampSource {
    pub fn fill(&mut self, block: &mut [f32]) {
        for sample in block {
            *sample = self.next as f32;
            self.next += 1;
        }
    }

    #[must_use]
    pub fn next_value(&self) -> u64 {
        self.next
    }
}

/// A tiny frame whose every pixel is the low byte of its sequence number.
#[must_use]
pub fn pattern_frame(sequence: u64, width: u32, height: u32) -> Frame {
    let len = width as usize * height as usize;
    Frame::new(sequence, width, height, vec![sequence as u8; len])
}

/// Config for sample-exact tests: 64 Hz audio, 120 BPM, fixed seed.
///
/// At these rates one beat is 32 audio units, so a quarter beat is 8 units and
/// a ramp input's values equal their ring indices.
#[must_use]
pub fn ramp_config() -> PerformanceConfig {
    let mut config = PerformanceConfig::default();
    config.seed = Some(7);
    config.audio.sample_rate = 64;
    config.audio.block_size = 8;
    config.audio.deck_gain = 0.0;
    config.video.frame_rate = 8.0;
    config.parameters.beats_per_minute = 120.0;
    config.parameters.record_length_beats = 0.25;
    config.parameters.stutter_length_beats = 0.25;
    config.parameters.stutter_times = 4;
    config.buffer.min_supported_bpm = 60.0;
    config
}

/// Drives a bare [`Scheduler`] against rings owned by the harness.
#[derive(Debug)]
pub struct SchedulerHarness {
    pub audio: RingBuffer<f32>,
    pub video: RingBuffer<Frame>,
    pub parameters: Parameters,
    pub audio_rate: f64,
    pub video_rate: f64,
    rng: StdRng,
}

impl SchedulerHarness {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            audio: RingBuffer::with_capacity(1_024),
            video: RingBuffer::with_capacity(64),
            parameters: Parameters {
                beats_per_minute: 120.0,
                ..Parameters::default()
            },
            audio_rate: 64.0,
            video_rate: 8.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Writes ramp units tagged `1 / units_per_beat` apart until the audio
    /// ring's newest tag reaches `beat`.
    pub fn capture_until(&mut self, beat: f64) {
        let step = time::beats_per_unit(self.parameters.beats_per_minute, self.audio_rate);
        loop {
            let next = self.audio.written();
            let tag = next as f64 * step;
            if tag > beat {
                break;
            }
            self.audio.write(next as f32, tag);
        }
    }

    pub fn advance(&mut self, scheduler: &mut Scheduler, beat: f64) -> TickReport {
        let media = Media {
            audio: &self.audio,
            video: &self.video,
            audio_rate: self.audio_rate,
            video_rate: self.video_rate,
            deck: None,
        };
        scheduler.advance(Tick {
            snapshot: ClockSnapshot::new(beat, self.parameters.beats_per_minute),
            parameters: &self.parameters,
            media,
            rng: &mut self.rng,
        })
    }
}
