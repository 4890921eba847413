use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{
    assets::SampleBank,
    clock::{SimulatedClock, TempoClock},
    config::PerformanceConfig,
    engine::{Engine, EngineError, Trigger},
    fixtures::{ToneSource, pattern_frame},
    report::SessionReport,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("expected <effect>@<beat>, got {0:?}")]
    Malformed(String),
    #[error("unknown effect {0:?}")]
    UnknownEffect(String),
    #[error("invalid beat {0:?}")]
    InvalidBeat(String),
}

/// An effect fired at a fixed beat, written `stutter@4` on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScriptedTrigger {
    pub trigger: Trigger,
    pub at_beat: f64,
}

impl FromStr for ScriptedTrigger {
    type Err = ScriptError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (effect, beat) = value
            .split_once('@')
            .ok_or_else(|| ScriptError::Malformed(value.to_string()))?;
        let trigger = match effect.trim() {
            "stutter" => Trigger::Stutter,
            "random-stutter" => Trigger::RandomStutter,
            "rewind" => Trigger::Rewind,
            "random-rewind" => Trigger::RandomRewind,
            "generator" => Trigger::Generator,
            other => return Err(ScriptError::UnknownEffect(other.to_string())),
        };
        let at_beat = beat
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|beat| beat.is_finite() && *beat >= 0.0)
            .ok_or_else(|| ScriptError::InvalidBeat(beat.to_string()))?;
        Ok(Self { trigger, at_beat })
    }
}

/// A tempo change applied at the first block starting at or after `at_beat`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoChange {
    pub at_beat: f64,
    pub bpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPlan {
    pub beats: f64,
    pub tone_hz: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub triggers: Vec<ScriptedTrigger>,
    pub tempo_changes: Vec<TempoChange>,
}

impl Default for SessionPlan {
    fn default() -> Self {
        Self {
            beats: 16.0,
            tone_hz: 220.0,
            frame_width: 4,
            frame_height: 4,
            triggers: Vec::new(),
            tempo_changes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub audio: Vec<f32>,
    pub frames_rendered: u64,
    pub report: SessionReport,
}

#[instrument(skip(config, bank, plan), fields(beats = plan.beats, triggers = plan.triggers.len()))]
pub fn run_session(
    config: &PerformanceConfig,
    bank: SampleBank,
    plan: &SessionPlan,
) -> Result<SessionOutput, EngineError> {
    let mut engine = Engine::with_bank(config, bank);
    if engine.bank().len() > 1 {
        engine.select_sample(1)?;
    }

    for scripted in &plan.triggers {
        let at_beat = scripted.at_beat;
        match scripted.trigger {
            Trigger::Stutter => engine.schedule_stutter(at_beat)?,
            Trigger::RandomStutter => engine.schedule_random_stutter(at_beat)?,
            Trigger::Rewind => engine.schedule_rewind(at_beat)?,
            Trigger::RandomRewind => engine.schedule_random_rewind(at_beat)?,
            Trigger::Generator => engine.schedule_generator(at_beat)?,
        };
    }

    let sample_rate = config.audio.sample_rate.max(1);
    let block_size = config.audio.block_size.max(1);
    let block_seconds = block_size as f64 / f64::from(sample_rate);
    let frame_seconds = 1.0 / config.video.frame_rate.max(1.0);

    let mut clock = SimulatedClock::new(engine.parameters().beats_per_minute);
    let mut tone = ToneSource::new(plan.tone_hz, sample_rate, 0.5);
    let mut tempo_changes = plan.tempo_changes.clone();
    tempo_changes.sort_by(|left, right| left.at_beat.total_cmp(&right.at_beat));
    let mut tempo_changes = tempo_changes.into_iter().peekable();

    let mut input = vec![0.0_f32; block_size];
    let mut output = vec![0.0_f32; block_size];
    let mut audio = Vec::new();
    let mut elapsed = 0.0_f64;
    let mut next_frame_at = 0.0_f64;
    let mut frames_rendered = 0_u64;

    while clock.current_beat() < plan.beats {
        let beat = clock.current_beat();
        while let Some(change) = tempo_changes.next_if(|change| change.at_beat <= beat) {
            clock.set_tempo(change.bpm);
            let mut parameters = *engine.parameters();
            parameters.beats_per_minute = change.bpm;
            engine.set_parameters(parameters);
            debug!(beat, bpm = change.bpm, "tempo changed");
        }

        let snapshot = clock.snapshot();
        tone.fill(&mut input);
        engine.process_audio_block(snapshot, Some(&input), &mut output);
        audio.extend_from_slice(&output);

        if config.video.enabled {
            while next_frame_at <= elapsed {
                let frame = pattern_frame(frames_rendered, plan.frame_width, plan.frame_height);
                let (_, shown) = engine.process_video_frame(snapshot, Some(frame));
                if shown.is_some() {
                    frames_rendered += 1;
                }
                next_frame_at += frame_seconds;
            }
        }

        clock.advance_seconds(block_seconds);
        elapsed += block_seconds;
    }

    let report = SessionReport::new(
        config.seed,
        sample_rate,
        config.parameters.beats_per_minute,
        plan.beats,
        engine.stats().clone(),
        &audio,
    );
    info!(
        frames = audio.len(),
        frames_rendered,
        completed = report.stats.completed,
        "session finished"
    );
    Ok(SessionOutput {
        audio,
        frames_rendered,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_triggers_parse_effect_and_beat() {
        let parsed: ScriptedTrigger = "random-rewind@8.5".parse().expect("trigger should parse");
        assert_eq!(parsed.trigger, Trigger::RandomRewind);
        assert_eq!(parsed.at_beat, 8.5);
    }

    #[test]
    fn malformed_triggers_are_rejected() {
        assert_eq!(
            "stutter".parse::<ScriptedTrigger>(),
            Err(ScriptError::Malformed("stutter".to_string()))
        );
        assert_eq!(
            "wobble@4".parse::<ScriptedTrigger>(),
            Err(ScriptError::UnknownEffect("wobble".to_string()))
        );
        assert_eq!(
            "stutter@-1".parse::<ScriptedTrigger>(),
            Err(ScriptError::InvalidBeat("-1".to_string()))
        );
    }
}
