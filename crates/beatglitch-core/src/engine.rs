use std::{path::Path, sync::Arc};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    action::{
        ActionEvent, ActionId, ActionKind, BeatAction, Media, OutputChannel, ReadPosition,
        Retirement, Source,
    },
    assets::{SampleBank, SamplePair},
    buffer::{RingBuffer, SharedRingBuffer},
    clock::ClockSnapshot,
    config::{
        AudioConfig, GeneratorConfig, Parameters, PerformanceConfig, RandomConfig, VideoConfig,
    },
    deck::Deck,
    effects::{
        EffectGenerator, GeneratorSettings, RewindEffect, RewindSettings, StutterEffect,
        StutterSettings,
    },
    scheduler::{ScheduleError, Scheduler, Tick, TickReport},
    time,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("sample {index} is out of range, the bank holds {len}")]
    SampleOutOfRange { index: usize, len: usize },
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// One captured video frame. Pixels are shared so ring reads never copy them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl Frame {
    #[must_use]
    pub fn new(sequence: u64, width: u32, height: u32, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self {
            sequence,
            width,
            height,
            pixels: pixels.into(),
        }
    }
}

/// Effects a performer can fire at the next whole beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Stutter,
    RandomStutter,
    Rewind,
    RandomRewind,
    Generator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Activated {
        id: ActionId,
        beat: f64,
    },
    Retired {
        id: ActionId,
        kind: ActionKind,
        reason: Retirement,
        beat: f64,
    },
    Rejected {
        reason: String,
        beat: f64,
    },
    Action(ActionEvent),
    SampleSelected {
        index: usize,
        name: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub ticks: u64,
    pub audio_blocks: u64,
    pub video_frames: u64,
    pub samples_captured: u64,
    /// Audio units re-written from the previous capture because input ran short.
    pub samples_held: u64,
    pub frames_held: u64,
    pub scheduled: u64,
    pub activated: u64,
    pub completed: u64,
    pub preempted: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub windows_clamped: u64,
    pub generator_effects: u64,
    pub events_dropped: u64,
    pub last_beat: f64,
}

/// The performance engine: capture rings, scheduler, deck and output mixing.
///
/// Callers drive it from one thread per tick. Capture threads that run on their
/// own cadence may write through [`Engine::audio_buffer`] and
/// [`Engine::video_buffer`] instead of handing input to the process calls.
pub struct Engine {
    parameters: Parameters,
    random: RandomConfig,
    generator: GeneratorConfig,
    audio_config: AudioConfig,
    video_config: VideoConfig,
    scheduler: Scheduler,
    audio: SharedRingBuffer<f32>,
    video: SharedRingBuffer<Frame>,
    deck: Deck,
    bank: SampleBank,
    selected: usize,
    rng: StdRng,
    stats: EngineStats,
    events: Option<Sender<EngineEvent>>,
    event_capacity: usize,
}

impl Engine {
    #[must_use]
    pub fn new(config: &PerformanceConfig) -> Self {
        Self::with_bank(config, SampleBank::new(config.audio.sample_rate))
    }

    #[instrument(skip(config, bank), fields(seed = ?config.seed, pairs = bank.len()))]
    pub fn with_bank(config: &PerformanceConfig, bank: SampleBank) -> Self {
        let sample_rate = f64::from(config.audio.sample_rate.max(1));
        let frame_rate = config.video.frame_rate.max(1.0);
        let max_beats = config.buffer.max_window_beats.max(Parameters::REWIND_LENGTH_BEATS.max);
        let min_bpm = Parameters::BEATS_PER_MINUTE.clamp(config.buffer.min_supported_bpm);
        let audio_capacity = time::capacity_for(max_beats, min_bpm, sample_rate);
        let video_capacity = time::capacity_for(max_beats, min_bpm, frame_rate);

        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let deck = Deck::new(
            bank.get(0)
                .unwrap_or_else(|| Arc::new(SamplePair::silence(config.audio.sample_rate))),
        );

        info!(audio_capacity, video_capacity, "engine created");
        Self {
            parameters: config.parameters.clamped(),
            random: config.random.clone(),
            generator: config.generator.clone(),
            audio_config: config.audio.clone(),
            video_config: config.video.clone(),
            scheduler: Scheduler::new(),
            audio: SharedRingBuffer::with_capacity(audio_capacity),
            video: SharedRingBuffer::with_capacity(video_capacity),
            deck,
            bank,
            selected: 0,
            rng,
            stats: EngineStats::default(),
            events: None,
            event_capacity: config.diagnostics.event_capacity.max(1),
        }
    }

    #[must_use]
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    #[instrument(skip(self, parameters))]
    pub fn set_parameters(&mut self, parameters: Parameters) {
        self.parameters = parameters.clamped();
        info!(
            bpm = self.parameters.beats_per_minute,
            stutter_times = self.parameters.stutter_times,
            "parameters updated"
        );
    }

    #[must_use]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    #[must_use]
    pub fn bank(&self) -> &SampleBank {
        &self.bank
    }

    #[must_use]
    pub fn selected_sample(&self) -> usize {
        self.selected
    }

    #[must_use]
    pub fn audio_buffer(&self) -> SharedRingBuffer<f32> {
        self.audio.clone()
    }

    #[must_use]
    pub fn video_buffer(&self) -> SharedRingBuffer<Frame> {
        self.video.clone()
    }

    /// Opens a fresh event stream. Only the newest subscriber receives events;
    /// when it falls behind, events are dropped rather than blocking a tick.
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (sender, receiver) = crossbeam_channel::bounded(self.event_capacity);
        self.events = Some(sender);
        receiver
    }

    #[instrument(skip(self, action), fields(id = %action.id(), kind = %action.kind()))]
    pub fn schedule(
        &mut self,
        action: Box<dyn BeatAction>,
        at_beat: f64,
    ) -> Result<ActionId, EngineError> {
        match self.scheduler.schedule(action, at_beat) {
            Ok(id) => {
                self.stats.scheduled += 1;
                Ok(id)
            }
            Err(error) => {
                self.stats.rejected += 1;
                warn!(%error, "schedule rejected");
                Err(error.into())
            }
        }
    }

    /// A stutter built from the current parameters.
    pub fn schedule_stutter(&mut self, at_beat: f64) -> Result<ActionId, EngineError> {
        let effect = StutterEffect::new(StutterSettings::from_parameters(&self.parameters));
        self.schedule(Box::new(effect), at_beat)
    }

    pub fn schedule_rewind(&mut self, at_beat: f64) -> Result<ActionId, EngineError> {
        let effect = RewindEffect::new(RewindSettings::from_parameters(&self.parameters));
        self.schedule(Box::new(effect), at_beat)
    }

    pub fn schedule_random_stutter(&mut self, at_beat: f64) -> Result<ActionId, EngineError> {
        let effect = StutterEffect::make_random(&mut self.rng, &self.parameters, &self.random);
        self.schedule(Box::new(effect), at_beat)
    }

    pub fn schedule_random_rewind(&mut self, at_beat: f64) -> Result<ActionId, EngineError> {
        let effect = RewindEffect::make_random(&mut self.rng, &self.random);
        self.schedule(Box::new(effect), at_beat)
    }

    pub fn schedule_generator(&mut self, at_beat: f64) -> Result<ActionId, EngineError> {
        let generator =
            EffectGenerator::new(GeneratorSettings::from_config(&self.generator, &self.random));
        self.schedule(Box::new(generator), at_beat)
    }

    /// Schedules `trigger` at the first whole beat after `snapshot`.
    pub fn trigger(
        &mut self,
        trigger: Trigger,
        snapshot: ClockSnapshot,
    ) -> Result<ActionId, EngineError> {
        let at_beat = snapshot.next_whole_beat();
        debug!(?trigger, at_beat, "trigger received");
        match trigger {
            Trigger::Stutter => self.schedule_stutter(at_beat),
            Trigger::RandomStutter => self.schedule_random_stutter(at_beat),
            Trigger::Rewind => self.schedule_rewind(at_beat),
            Trigger::RandomRewind => self.schedule_random_rewind(at_beat),
            Trigger::Generator => self.schedule_generator(at_beat),
        }
    }

    pub fn cancel(&mut self, id: ActionId) -> bool {
        self.scheduler.cancel(id)
    }

    #[instrument(skip(self), fields(pairs = self.bank.len()))]
    pub fn select_sample(&mut self, index: usize) -> Result<(), EngineError> {
        let pair = self.bank.get(index).ok_or(EngineError::SampleOutOfRange {
            index,
            len: self.bank.len(),
        })?;
        let name = pair.name.clone();
        self.deck.load(pair);
        self.selected = index;
        info!(index, name = %name, "sample selected");
        self.publish(EngineEvent::SampleSelected { index, name });
        Ok(())
    }

    /// Replaces the sample bank with the pairs found in `directory`.
    #[instrument(skip(self), fields(directory = %directory.display()))]
    pub fn load_samples(&mut self, directory: &Path) -> Result<usize, EngineError> {
        self.bank = SampleBank::load_directory(directory, self.audio_config.sample_rate)?;
        self.select_sample(0)?;
        Ok(self.bank.len())
    }

    /// Runs one scheduler tick against the current ring contents.
    pub fn advance(&mut self, snapshot: ClockSnapshot) -> TickReport {
        let audio_rate = f64::from(self.audio_config.sample_rate);
        let report = {
            let audio = self.audio.read();
            let video = self.video.read();
            let units_per_beat = snapshot.units_per_beat(audio_rate);
            let media = Media {
                audio: &*audio,
                video: &*video,
                audio_rate,
                video_rate: self.video_config.frame_rate,
                deck: Some(self.deck.view(snapshot.beat, units_per_beat)),
            };
            self.scheduler.advance(Tick {
                snapshot,
                parameters: &self.parameters,
                media,
                rng: &mut self.rng,
            })
        };

        self.record(&report);
        report
    }

    /// Captures `input`, then renders `output.len()` samples.
    ///
    /// The scheduler ticks at the block's first beat and again at every sample
    /// where a pending action falls due, so effects start on their exact beat
    /// even when blocks straddle the beat grid. Missing or short input repeats
    /// the last captured sample so the ring's timeline never has holes.
    pub fn process_audio_block(
        &mut self,
        snapshot: ClockSnapshot,
        input: Option<&[f32]>,
        output: &mut [f32],
    ) -> TickReport {
        let rate = f64::from(self.audio_config.sample_rate);
        let beats_per_unit = snapshot.beats_per_unit(rate);
        let frames = output.len();
        let first_index = self.capture_audio(snapshot.beat, beats_per_unit, input, frames);

        let mut report = self.advance(snapshot);
        let mut offset = 0;
        loop {
            let end = self.segment_end(snapshot.beat, beats_per_unit, offset, frames);
            self.render_audio(
                &mut output[offset..end],
                first_index + offset as u64,
                snapshot.beat + offset as f64 * beats_per_unit,
                beats_per_unit,
            );
            offset = end;
            if offset >= frames {
                break;
            }
            let beat = snapshot.beat + offset as f64 * beats_per_unit;
            report.absorb(self.advance(ClockSnapshot::new(beat, snapshot.bpm)));
        }

        self.stats.audio_blocks += 1;
        report
    }

    /// Writes one block into the audio ring and returns the index of its first
    /// unit.
    fn capture_audio(
        &mut self,
        first_beat: f64,
        beats_per_unit: f64,
        input: Option<&[f32]>,
        frames: usize,
    ) -> u64 {
        let mut held = 0_u64;
        let mut last = {
            let ring = self.audio.read();
            newest_unit(&ring).copied().unwrap_or(0.0)
        };
        let input = input.unwrap_or(&[]);
        self.audio.write_block((0..frames).map(|offset| {
            let sample = match input.get(offset) {
                Some(sample) => *sample,
                None => {
                    held += 1;
                    last
                }
            };
            last = sample;
            (sample, first_beat + offset as f64 * beats_per_unit)
        }));
        self.stats.samples_captured += frames as u64;
        if held > 0 {
            self.stats.samples_held += held;
            debug!(held, frames, "audio input short, holding last sample");
        }
        self.audio
            .read()
            .written()
            .saturating_sub(frames as u64)
    }

    /// First offset at or after which the next pending action is due, or the
    /// block end. Always past `offset` so every segment renders something.
    fn segment_end(
        &self,
        block_beat: f64,
        beats_per_unit: f64,
        offset: usize,
        frames: usize,
    ) -> usize {
        let beat = block_beat + offset as f64 * beats_per_unit;
        let Some(due) = self.scheduler.next_due(beat) else {
            return frames;
        };
        let due_offset = ((due - block_beat) / beats_per_unit).ceil();
        if due_offset >= frames as f64 {
            return frames;
        }
        (due_offset.max(0.0) as usize).max(offset + 1)
    }

    /// Mixes live, glitched and deck audio for `output`, whose first sample is
    /// ring unit `first_index` at `first_beat`.
    fn render_audio(
        &mut self,
        output: &mut [f32],
        first_index: u64,
        first_beat: f64,
        beats_per_unit: f64,
    ) {
        let live_gain = self.audio_config.live_gain;
        let deck_gain = self.audio_config.deck_gain;
        let ring = self.audio.read();
        let effect = self.scheduler.active_on(OutputChannel::Audio);
        for (offset, out) in output.iter_mut().enumerate() {
            let beat = first_beat + offset as f64 * beats_per_unit;
            let live = ring.get(first_index + offset as u64).copied().unwrap_or(0.0);

            let glitched_live = effect
                .and_then(|effect| effect.read_position(Source::Audio, beat))
                .and_then(|position| match position {
                    ReadPosition::Ring(index) => ring.get(index).ok().copied(),
                    ReadPosition::Sample { samples, index } => samples.get(index).copied(),
                })
                .unwrap_or(live);
            let deck = effect
                .and_then(|effect| effect.read_position(Source::Deck, beat))
                .and_then(|position| match position {
                    ReadPosition::Sample { samples, index } => samples.get(index).copied(),
                    ReadPosition::Ring(_) => None,
                })
                .unwrap_or_else(|| self.deck.current());

            *out = glitched_live * live_gain + deck * deck_gain;
            self.deck.step();
        }
    }

    /// Captures `frame` (or repeats the last one), ticks the scheduler and
    /// returns the frame to display. `None` only before anything was captured.
    pub fn process_video_frame(
        &mut self,
        snapshot: ClockSnapshot,
        frame: Option<Frame>,
    ) -> (TickReport, Option<Frame>) {
        match frame {
            Some(frame) => self.video.write(frame, snapshot.beat),
            None => {
                if self.video.hold_last(snapshot.beat) {
                    self.stats.frames_held += 1;
                    debug!(beat = snapshot.beat, "video frame missing, holding last frame");
                }
            }
        }

        let report = self.advance(snapshot);
        self.stats.video_frames += 1;

        let ring = self.video.read();
        let live = newest_unit(&ring).cloned();
        let glitched = self
            .scheduler
            .active_on(OutputChannel::Video)
            .and_then(|effect| effect.read_position(Source::Video, snapshot.beat))
            .and_then(|position| match position {
                ReadPosition::Ring(index) => ring.get(index).ok().cloned(),
                ReadPosition::Sample { .. } => None,
            });
        (report, glitched.or(live))
    }

    fn record(&mut self, report: &TickReport) {
        self.stats.ticks += 1;
        self.stats.last_beat = report.beat;
        self.stats.activated += report.activated.len() as u64;
        self.stats.scheduled += report.spawned.len() as u64;
        self.stats.rejected += report.rejected.len() as u64;

        for id in &report.activated {
            self.publish(EngineEvent::Activated {
                id: *id,
                beat: report.beat,
            });
        }
        for retired in &report.retired {
            match retired.reason {
                Retirement::Completed => self.stats.completed += 1,
                Retirement::Preempted => self.stats.preempted += 1,
                Retirement::Cancelled => self.stats.cancelled += 1,
            }
            self.publish(EngineEvent::Retired {
                id: retired.id,
                kind: retired.kind,
                reason: retired.reason,
                beat: report.beat,
            });
        }
        for error in &report.rejected {
            self.publish(EngineEvent::Rejected {
                reason: error.to_string(),
                beat: report.beat,
            });
        }

        let mut rotate_to = None;
        for event in &report.events {
            match event {
                ActionEvent::WindowClamped {
                    source,
                    requested,
                    retained,
                    ..
                } => {
                    self.stats.windows_clamped += 1;
                    warn!(?source, requested, retained, "effect window clamped");
                }
                ActionEvent::EffectScheduled { total, .. } => {
                    self.stats.generator_effects += 1;
                    rotate_to = Some(*total as usize % self.bank.len().max(1));
                }
            }
            self.publish(EngineEvent::Action(event.clone()));
        }

        if let Some(index) = rotate_to {
            if index != self.selected {
                if let Err(error) = self.select_sample(index) {
                    warn!(%error, "sample rotation failed");
                }
            }
        }
    }

    fn publish(&mut self, event: EngineEvent) {
        let Some(sender) = &self.events else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.stats.events_dropped += 1,
            Err(TrySendError::Disconnected(_)) => {
                debug!("event subscriber went away");
                self.events = None;
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("parameters", &self.parameters)
            .field("scheduler", &self.scheduler)
            .field("selected", &self.selected)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn newest_unit<T>(ring: &RingBuffer<T>) -> Option<&T> {
    ring.newest_index().and_then(|index| ring.get(index).ok())
}
