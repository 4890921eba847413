use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Targets, Windows, WindowRequest, position_for, resolve_windows, sample_beats, sample_count};
use crate::{
    action::{ActionId, ActionKind, BeatAction, ChannelSet, Progress, ReadPosition, Source, TickContext},
    config::{Parameters, RandomConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StutterSettings {
    /// Beats of material captured before the loop starts.
    pub record_length_beats: f64,
    /// Beats of that material that make up one loop.
    pub stutter_length_beats: f64,
    /// Beats between activation and the first loop.
    pub delay_beats: f64,
    pub times: u32,
    pub targets: Targets,
}

impl StutterSettings {
    #[must_use]
    pub fn from_parameters(parameters: &Parameters) -> Self {
        let parameters = parameters.clamped();
        Self {
            record_length_beats: parameters.record_length_beats,
            stutter_length_beats: parameters.stutter_length_beats,
            delay_beats: parameters.stutter_delay_beats,
            times: parameters.stutter_times,
            targets: Targets::LIVE,
        }
    }

    /// Length of one loop; never longer than what was recorded.
    #[must_use]
    pub fn loop_beats(&self) -> f64 {
        self.stutter_length_beats.min(self.record_length_beats)
    }

    /// Beats from activation until the last loop ends.
    #[must_use]
    pub fn duration_beats(&self) -> f64 {
        self.delay_beats + self.loop_beats() * f64::from(self.times)
    }
}

/// Captures the material just before the loop start and repeats it `times` times.
#[derive(Debug, Clone)]
pub struct StutterEffect {
    id: ActionId,
    settings: StutterSettings,
    bpm: f64,
    loop_start: f64,
    end: f64,
    windows: Windows,
    activated: bool,
}

impl StutterEffect {
    #[must_use]
    pub fn new(settings: StutterSettings) -> Self {
        Self {
            id: ActionId::new(),
            settings,
            bpm: 0.0,
            loop_start: 0.0,
            end: 0.0,
            windows: Windows::default(),
            activated: false,
        }
    }

    /// Loop length and repeat count drawn uniformly from `random`, narrowed to
    /// the documented parameter ranges. The loop replays exactly what it records.
    #[must_use]
    pub fn make_random(
        rng: &mut dyn RngCore,
        parameters: &Parameters,
        random: &RandomConfig,
    ) -> Self {
        let length = sample_beats(
            rng,
            random
                .stutter_length_beats
                .intersect(Parameters::STUTTER_LENGTH_BEATS),
        );
        let times = Parameters::STUTTER_TIMES.clamp(sample_count(rng, random.stutter_times));
        Self::new(StutterSettings {
            record_length_beats: length,
            stutter_length_beats: length,
            delay_beats: parameters.clamped().stutter_delay_beats,
            times,
            targets: Targets::LIVE,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &StutterSettings {
        &self.settings
    }

    /// Beat the first loop starts at, once active.
    #[must_use]
    pub fn loop_start(&self) -> Option<f64> {
        self.activated.then_some(self.loop_start)
    }

    #[must_use]
    pub fn end_beat(&self) -> Option<f64> {
        self.activated.then_some(self.end)
    }

    /// Loops completed on `source` as of the last update.
    #[must_use]
    pub fn repeats(&self, source: Source) -> Option<u32> {
        self.windows
            .get(source)
            .map(|window| window.cursor.repeats())
    }

    /// Material before the loop start is complete once the capture path has
    /// tagged a unit at or after it.
    fn ready(&self, ctx: &TickContext<'_>) -> bool {
        if ctx.beat() >= self.loop_start {
            return true;
        }
        let media = ctx.media();
        let mut newest = self
            .settings
            .targets
            .sources()
            .filter_map(|source| media.ring(source))
            .filter_map(|ring| ring.newest_beat())
            .peekable();
        newest.peek().is_some() && newest.all(|beat| beat >= self.loop_start)
    }

    fn resolve(&mut self, ctx: &mut TickContext<'_>) {
        if self.windows.is_resolved() || !self.ready(ctx) {
            return;
        }
        self.windows = resolve_windows(
            self.id,
            self.settings.targets,
            WindowRequest {
                end_beat: self.loop_start,
                record_beats: self.settings.record_length_beats,
                play_beats: self.settings.loop_beats(),
                bpm: self.bpm,
                reverse: false,
            },
            ctx,
        );
        debug!(id = %self.id, loop_start = self.loop_start, "stutter windows resolved");
    }
}

impl BeatAction for StutterEffect {
    fn id(&self) -> ActionId {
        self.id
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Stutter
    }

    fn channels(&self) -> ChannelSet {
        self.settings.targets.channels
    }

    #[instrument(skip(self, ctx), fields(id = %self.id))]
    fn activate(&mut self, anchor_beat: f64, ctx: &mut TickContext<'_>) {
        self.bpm = ctx.snapshot().bpm;
        self.loop_start = anchor_beat + self.settings.delay_beats.max(0.0);
        self.end = self.loop_start + self.settings.loop_beats() * f64::from(self.settings.times);
        self.activated = true;
        debug!(
            loop_start = self.loop_start,
            end = self.end,
            times = self.settings.times,
            "stutter armed"
        );
        self.resolve(ctx);
    }

    fn update(&mut self, ctx: &mut TickContext<'_>) -> Progress {
        let beat = ctx.beat();
        if beat >= self.end {
            return Progress::Complete;
        }

        self.resolve(ctx);
        if !self.windows.is_resolved() {
            return Progress::Running;
        }

        self.windows.clamp_to_media(self.id, ctx);
        if self.windows.all_exhausted() {
            debug!(id = %self.id, "stutter has no material left");
            return Progress::Complete;
        }

        let loop_start = self.loop_start;
        for (_, window) in self.windows.iter_mut() {
            let elapsed = window.elapsed(loop_start, beat);
            window.cursor.seek(elapsed);
        }
        Progress::Running
    }

    fn finish(&mut self, _ctx: &mut TickContext<'_>) {
        debug!(id = %self.id, repeats = ?self.repeats(Source::Audio), "stutter finished");
    }

    fn read_position(&self, source: Source, beat: f64) -> Option<ReadPosition<'_>> {
        if !self.activated || beat < self.loop_start || beat >= self.end {
            return None;
        }
        let window = self.windows.get(source)?;
        let index = window
            .cursor
            .index_at(window.elapsed(self.loop_start, beat))?;
        position_for(&self.windows, source, index, false)
    }
}
