use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Targets, WindowRequest, Windows, position_for, resolve_windows, sample_beats};
use crate::{
    action::{ActionId, ActionKind, BeatAction, ChannelSet, Progress, ReadPosition, Source, TickContext},
    config::{Parameters, RandomConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewindSettings {
    pub length_beats: f64,
    pub targets: Targets,
}

impl RewindSettings {
    #[must_use]
    pub fn from_parameters(parameters: &Parameters) -> Self {
        Self {
            length_beats: parameters.clamped().rewind_length_beats,
            targets: Targets::LIVE,
        }
    }
}

/// Plays the material leading up to the anchor backwards, once.
///
/// Ring sources walk their window newest unit first. The deck instead plays
/// the pair's backward take forwards over the mirrored range, which sounds the
/// same without reversing anything at render time.
#[derive(Debug, Clone)]
pub struct RewindEffect {
    id: ActionId,
    settings: RewindSettings,
    anchor: f64,
    end: f64,
    windows: Windows,
    activated: bool,
}

impl RewindEffect {
    #[must_use]
    pub fn new(settings: RewindSettings) -> Self {
        Self {
            id: ActionId::new(),
            settings,
            anchor: 0.0,
            end: 0.0,
            windows: Windows::default(),
            activated: false,
        }
    }

    /// Window length drawn uniformly from `random`, narrowed to the documented range.
    #[must_use]
    pub fn make_random(rng: &mut dyn RngCore, random: &RandomConfig) -> Self {
        let length_beats = sample_beats(
            rng,
            random
                .rewind_length_beats
                .intersect(Parameters::REWIND_LENGTH_BEATS),
        );
        Self::new(RewindSettings {
            length_beats,
            targets: Targets::LIVE,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &RewindSettings {
        &self.settings
    }

    #[must_use]
    pub fn anchor(&self) -> Option<f64> {
        self.activated.then_some(self.anchor)
    }

    #[must_use]
    pub fn end_beat(&self) -> Option<f64> {
        self.activated.then_some(self.end)
    }

    /// Units left in the window for `source` as of the last update.
    #[must_use]
    pub fn window_len(&self, source: Source) -> Option<usize> {
        self.windows.get(source).map(|window| window.cursor.len())
    }
}

impl BeatAction for RewindEffect {
    fn id(&self) -> ActionId {
        self.id
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Rewind
    }

    fn channels(&self) -> ChannelSet {
        self.settings.targets.channels
    }

    #[instrument(skip(self, ctx), fields(id = %self.id))]
    fn activate(&mut self, anchor_beat: f64, ctx: &mut TickContext<'_>) {
        self.anchor = anchor_beat;
        self.end = anchor_beat + self.settings.length_beats.max(0.0);
        self.activated = true;
        self.windows = resolve_windows(
            self.id,
            self.settings.targets,
            WindowRequest {
                end_beat: anchor_beat,
                record_beats: self.settings.length_beats,
                play_beats: self.settings.length_beats,
                bpm: ctx.snapshot().bpm,
                reverse: true,
            },
            ctx,
        );
        debug!(anchor = self.anchor, end = self.end, "rewind armed");
    }

    fn update(&mut self, ctx: &mut TickContext<'_>) -> Progress {
        let beat = ctx.beat();
        if beat >= self.end {
            return Progress::Complete;
        }

        self.windows.clamp_to_media(self.id, ctx);
        let anchor = self.anchor;
        for (_, window) in self.windows.iter_mut() {
            let elapsed = window.elapsed(anchor, beat);
            window.cursor.seek(elapsed);
        }

        if self.windows.all_exhausted() {
            debug!(id = %self.id, "rewind ran out of material");
            return Progress::Complete;
        }
        Progress::Running
    }

    fn finish(&mut self, _ctx: &mut TickContext<'_>) {
        debug!(id = %self.id, "rewind finished");
    }

    fn read_position(&self, source: Source, beat: f64) -> Option<ReadPosition<'_>> {
        if !self.activated || beat < self.anchor || beat >= self.end {
            return None;
        }
        let window = self.windows.get(source)?;
        let index = window.cursor.index_at(window.elapsed(self.anchor, beat))?;
        position_for(&self.windows, source, index, true)
    }
}
