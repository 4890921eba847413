use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{
    RewindEffect, RewindSettings, StutterEffect, StutterSettings, Targets, sample_beats,
    sample_count,
};
use crate::{
    action::{ActionEvent, ActionId, ActionKind, BeatAction, Progress, TickContext},
    config::{Bounds, CountBounds, GeneratorConfig, Parameters, RandomConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    pub span_beats: f64,
    pub target_effects: u32,
    /// Chance of sitting out a decision beat.
    pub rest_probability: f64,
    /// Chance a scheduled child is a rewind rather than a stutter.
    pub rewind_probability: f64,
    pub stutter_times: CountBounds,
    pub targets: Targets,
}

impl GeneratorSettings {
    #[must_use]
    pub fn from_config(generator: &GeneratorConfig, random: &RandomConfig) -> Self {
        Self {
            span_beats: generator.span_beats,
            target_effects: generator.target_effects,
            rest_probability: generator.rest_probability,
            rewind_probability: generator.rewind_probability,
            stutter_times: random.stutter_times,
            targets: Targets::LIVE,
        }
        .sanitized()
    }

    /// Pulls every field into a range the tick path can feed to the RNG.
    #[must_use]
    pub fn sanitized(self) -> Self {
        Self {
            span_beats: self.span_beats.max(0.0),
            rest_probability: Bounds::PROBABILITY.clamp(self.rest_probability),
            rewind_probability: Bounds::PROBABILITY.clamp(self.rewind_probability),
            ..self
        }
    }
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self::from_config(&GeneratorConfig::default(), &RandomConfig::default())
    }
}

/// Schedules a run of stutters and rewinds, one at a time, over a span of beats.
///
/// The generator owns no output channel. Its children go through the same
/// scheduler as everything else; the generator only remembers the id of the
/// one it is waiting on.
#[derive(Debug, Clone)]
pub struct EffectGenerator {
    id: ActionId,
    settings: GeneratorSettings,
    span_end: f64,
    scheduled: u32,
    child: Option<ActionId>,
    next_decision: f64,
}

impl EffectGenerator {
    #[must_use]
    pub fn new(settings: GeneratorSettings) -> Self {
        Self {
            id: ActionId::new(),
            settings: settings.sanitized(),
            span_end: 0.0,
            scheduled: 0,
            child: None,
            next_decision: 0.0,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Children scheduled so far.
    #[must_use]
    pub fn scheduled(&self) -> u32 {
        self.scheduled
    }

    #[must_use]
    pub fn child(&self) -> Option<ActionId> {
        self.child
    }

    fn exhausted(&self, beat: f64) -> bool {
        beat >= self.span_end || self.scheduled >= self.settings.target_effects
    }

    /// A child starting at `start`, fitted to end inside the span, or `None` to rest.
    fn pick_child(&self, start: f64, ctx: &mut TickContext<'_>) -> Option<Box<dyn BeatAction>> {
        let parameters = ctx.parameters().clamped();
        let room = self.span_end - start;
        let rewind = ctx.rng().random_bool(self.settings.rewind_probability);

        if rewind {
            let upper = parameters.rewind_length_beats.min(room);
            if upper < Parameters::REWIND_LENGTH_BEATS.min {
                return None;
            }
            let length_beats = sample_beats(
                ctx.rng(),
                Bounds::new(Parameters::REWIND_LENGTH_BEATS.min, upper),
            );
            return Some(Box::new(RewindEffect::new(RewindSettings {
                length_beats,
                targets: self.settings.targets,
            })));
        }

        let stutter_length_beats = sample_beats(
            ctx.rng(),
            Bounds::new(
                Parameters::STUTTER_LENGTH_BEATS.min,
                parameters.stutter_length_beats,
            ),
        );
        let mut settings = StutterSettings {
            record_length_beats: parameters.record_length_beats,
            stutter_length_beats,
            delay_beats: 0.0,
            times: sample_count(ctx.rng(), self.settings.stutter_times),
            targets: self.settings.targets,
        };
        settings.times = Parameters::STUTTER_TIMES.clamp(settings.times);

        let fits = (room / settings.loop_beats()).floor();
        if fits < 1.0 {
            return None;
        }
        settings.times = settings.times.min(fits as u32);
        Some(Box::new(StutterEffect::new(settings)))
    }
}

impl BeatAction for EffectGenerator {
    fn id(&self) -> ActionId {
        self.id
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Generator
    }

    #[instrument(skip(self, ctx), fields(id = %self.id))]
    fn activate(&mut self, anchor_beat: f64, ctx: &mut TickContext<'_>) {
        self.span_end = anchor_beat + self.settings.span_beats;
        self.next_decision = ctx.beat();
        info!(
            span_end = self.span_end,
            target_effects = self.settings.target_effects,
            "effect generator started"
        );
    }

    fn update(&mut self, ctx: &mut TickContext<'_>) -> Progress {
        let beat = ctx.beat();
        if let Some(child) = self.child {
            if !ctx.is_live(child) {
                debug!(%child, "generator child retired");
                self.child = None;
            }
        }

        if self.exhausted(beat) {
            return if self.child.is_some() {
                Progress::Running
            } else {
                Progress::Complete
            };
        }
        if self.child.is_some() || beat < self.next_decision {
            return Progress::Running;
        }

        let start = ctx.snapshot().next_whole_beat();
        self.next_decision = start;
        if start >= self.span_end {
            return Progress::Running;
        }

        if ctx.rng().random_bool(self.settings.rest_probability) {
            debug!(start, "generator resting");
            return Progress::Running;
        }
        let Some(child) = self.pick_child(start, ctx) else {
            debug!(start, "no effect fits the remaining span");
            return Progress::Running;
        };

        let kind = child.kind();
        match ctx.spawn(child, start) {
            Ok(id) => {
                self.child = Some(id);
                self.scheduled += 1;
                debug!(%id, %kind, start, total = self.scheduled, "generator scheduled effect");
                ctx.emit(ActionEvent::EffectScheduled {
                    generator: self.id,
                    child: id,
                    kind,
                    at_beat: start,
                    total: self.scheduled,
                });
            }
            Err(error) => warn!(%error, "generator could not schedule effect"),
        }
        Progress::Running
    }

    fn finish(&mut self, ctx: &mut TickContext<'_>) {
        if let Some(child) = self.child.take() {
            if ctx.is_live(child) {
                debug!(%child, "cancelling generator child");
                ctx.cancel(child);
            }
        }
        info!(id = %self.id, scheduled = self.scheduled, "effect generator finished");
    }
}
