//! Beat-synchronized effects.
//!
//! Every effect resolves one window per source it reads, then maps the current
//! beat onto a position in that window. Positions are a pure function of the
//! beat, so the per-sample render path and the per-tick update agree without
//! sharing mutable state.

mod generator;
mod rewind;
mod stutter;

use std::sync::Arc;

use rand::{Rng, RngCore};
use tracing::debug;

pub use generator::{EffectGenerator, GeneratorSettings};
pub use rewind::{RewindEffect, RewindSettings};
pub use stutter::{StutterEffect, StutterSettings};

use crate::{
    action::{ActionEvent, ActionId, ChannelSet, Media, ReadPosition, Source, TickContext},
    assets::SamplePair,
    buffer::{BufferError, Span},
    config::{Bounds, CountBounds},
    cursor::PlaybackCursor,
    time,
};

/// Which takes an effect reads and whether it follows the deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Targets {
    /// Output channels the effect replaces while active.
    pub channels: ChannelSet,
    /// Also glitch the sample deck alongside the live audio.
    pub deck: bool,
}

impl Targets {
    pub const LIVE: Self = Self {
        channels: ChannelSet::ALL,
        deck: true,
    };

    #[must_use]
    pub fn sources(&self) -> impl Iterator<Item = Source> + '_ {
        [Source::Audio, Source::Video, Source::Deck]
            .into_iter()
            .filter(|source| match source {
                Source::Deck => self.deck && self.channels.contains(source.channel()),
                _ => self.channels.contains(source.channel()),
            })
    }
}

impl Default for Targets {
    fn default() -> Self {
        Self::LIVE
    }
}

/// One resolved source window and the unit density it plays at.
#[derive(Debug, Clone)]
pub(crate) struct SourceWindow {
    pub(crate) cursor: PlaybackCursor,
    pub(crate) units_per_beat: f64,
}

impl SourceWindow {
    pub(crate) fn elapsed(&self, from: f64, beat: f64) -> u64 {
        time::elapsed_units(from, beat, self.units_per_beat)
    }
}

/// Per-source windows for one effect.
#[derive(Debug, Clone, Default)]
pub(crate) struct Windows {
    audio: Option<SourceWindow>,
    video: Option<SourceWindow>,
    deck: Option<SourceWindow>,
    /// The sample pair the deck window indexes, captured at resolve time.
    pair: Option<Arc<SamplePair>>,
}

impl Windows {
    pub(crate) fn get(&self, source: Source) -> Option<&SourceWindow> {
        match source {
            Source::Audio => self.audio.as_ref(),
            Source::Video => self.video.as_ref(),
            Source::Deck => self.deck.as_ref(),
        }
    }

    fn slot(&mut self, source: Source) -> &mut Option<SourceWindow> {
        match source {
            Source::Audio => &mut self.audio,
            Source::Video => &mut self.video,
            Source::Deck => &mut self.deck,
        }
    }

    pub(crate) fn pair(&self) -> Option<&Arc<SamplePair>> {
        self.pair.as_ref()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (Source, &mut SourceWindow)> {
        [
            (Source::Audio, self.audio.as_mut()),
            (Source::Video, self.video.as_mut()),
            (Source::Deck, self.deck.as_mut()),
        ]
        .into_iter()
        .filter_map(|(source, window)| window.map(|window| (source, window)))
    }

    /// True when no resolved window has material left to play.
    pub(crate) fn all_exhausted(&self) -> bool {
        [&self.audio, &self.video, &self.deck]
            .into_iter()
            .flatten()
            .all(|window| window.cursor.is_exhausted())
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.audio.is_some() || self.video.is_some() || self.deck.is_some()
    }

    /// Drops evicted units from ring windows, reporting every shrink.
    pub(crate) fn clamp_to_media(&mut self, action: ActionId, ctx: &mut TickContext<'_>) {
        let media = *ctx.media();
        let mut clamped = Vec::new();
        for (source, window) in self.iter_mut() {
            let Some(ring) = media.ring(source) else {
                continue;
            };
            let Some(oldest) = ring.oldest_index() else {
                continue;
            };
            let before = window.cursor.len();
            if window.cursor.clamp_to(oldest) {
                clamped.push((source, before, window.cursor.len()));
            }
        }
        for (source, requested, retained) in clamped {
            debug!(%action, ?source, requested, retained, "window evicted mid-effect");
            ctx.emit(ActionEvent::WindowClamped {
                action,
                source,
                requested,
                retained,
            });
        }
    }
}

/// How a window is cut from the material before the anchor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WindowRequest {
    /// Beat the window ends at (exclusive).
    pub(crate) end_beat: f64,
    /// Beats of material reached back for.
    pub(crate) record_beats: f64,
    /// Beats actually played from the start of the recorded span.
    pub(crate) play_beats: f64,
    pub(crate) bpm: f64,
    pub(crate) reverse: bool,
}

/// Resolves one window per targeted source, reporting any clamping.
pub(crate) fn resolve_windows(
    action: ActionId,
    targets: Targets,
    request: WindowRequest,
    ctx: &mut TickContext<'_>,
) -> Windows {
    let media: Media<'_> = *ctx.media();
    let mut windows = Windows::default();
    let mut events = Vec::new();

    for source in targets.sources() {
        let rate = media.unit_rate(source);
        let units_per_beat = time::units_per_beat(request.bpm, rate);
        let record_units = time::beats_to_units(request.record_beats, request.bpm, rate);
        let play_units = time::beats_to_units(request.play_beats, request.bpm, rate);

        let recorded = match source {
            Source::Deck => {
                let Some(deck) = media.deck else {
                    continue;
                };
                if deck.pair.is_empty() {
                    continue;
                }
                windows.pair = Some(Arc::clone(deck.pair));
                deck.window_before(request.end_beat, record_units)
            }
            _ => {
                let Some(ring) = media.ring(source) else {
                    continue;
                };
                match ring.window_before(request.end_beat, record_units) {
                    Ok(span) => span,
                    Err(BufferError::Empty) => continue,
                    Err(BufferError::OutOfWindow { oldest, .. }) => Span {
                        first: oldest,
                        len: 0,
                        requested: record_units,
                    },
                }
            }
        };

        if recorded.is_clamped() {
            events.push(ActionEvent::WindowClamped {
                action,
                source,
                requested: recorded.requested,
                retained: recorded.len,
            });
        }

        let played = Span {
            first: recorded.first,
            len: recorded.len.min(play_units),
            requested: play_units,
        };
        let cursor = if request.reverse {
            PlaybackCursor::reversing(played)
        } else {
            PlaybackCursor::looping(played)
        };
        *windows.slot(source) = Some(SourceWindow {
            cursor,
            units_per_beat,
        });
    }

    for event in events {
        if let ActionEvent::WindowClamped {
            source,
            requested,
            retained,
            ..
        } = &event
        {
            debug!(%action, ?source, requested, retained, "window clamped to retained material");
        }
        ctx.emit(event);
    }
    windows
}

/// Maps a resolved window position onto a read for `source`.
pub(crate) fn position_for<'a>(
    windows: &'a Windows,
    source: Source,
    index: u64,
    backward_take: bool,
) -> Option<ReadPosition<'a>> {
    match source {
        Source::Deck => {
            let pair = windows.pair()?;
            let forward = crate::deck::wrap(index, pair.forward.len())?;
            if backward_take {
                let index = pair.mirror_index(forward)?;
                Some(ReadPosition::Sample {
                    samples: &pair.backward,
                    index,
                })
            } else {
                Some(ReadPosition::Sample {
                    samples: &pair.forward,
                    index: forward,
                })
            }
        }
        _ => Some(ReadPosition::Ring(index)),
    }
}

pub(crate) fn sample_beats(rng: &mut dyn RngCore, bounds: Bounds) -> f64 {
    let bounds = bounds.normalized();
    if bounds.min >= bounds.max {
        return bounds.min;
    }
    rng.random_range(bounds.min..=bounds.max)
}

pub(crate) fn sample_count(rng: &mut dyn RngCore, bounds: CountBounds) -> u32 {
    let min = bounds.min.min(bounds.max);
    let max = bounds.min.max(bounds.max);
    if min == max {
        return min;
    }
    rng.random_range(min..=max)
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn targets_skip_the_deck_unless_audio_is_taken() {
        let video_only = Targets {
            channels: ChannelSet::VIDEO,
            deck: true,
        };
        assert_eq!(video_only.sources().collect::<Vec<_>>(), vec![Source::Video]);
        assert_eq!(
            Targets::LIVE.sources().collect::<Vec<_>>(),
            vec![Source::Audio, Source::Video, Source::Deck]
        );
    }

    #[test]
    fn sampling_stays_inside_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let beats = sample_beats(&mut rng, Bounds::new(0.5, 0.125));
            assert!((0.125..=0.5).contains(&beats));
            let count = sample_count(&mut rng, CountBounds::new(2, 8));
            assert!((2..=8).contains(&count));
        }
        assert_eq!(sample_beats(&mut rng, Bounds::new(0.25, 0.25)), 0.25);
    }
}
