use std::sync::Arc;

use crate::{assets::SamplePair, buffer::Span};

/// Plays the selected pair on a loop. Effects address its material by the
/// unwrapped play count, like ring indices, and wrap only when reading.
#[derive(Debug, Clone)]
pub struct Deck {
    pair: Arc<SamplePair>,
    played: u64,
}

impl Deck {
    #[must_use]
    pub fn new(pair: Arc<SamplePair>) -> Self {
        Self { pair, played: 0 }
    }

    /// Swaps in a pair and restarts playback from its first sample.
    pub fn load(&mut self, pair: Arc<SamplePair>) {
        self.pair = pair;
        self.played = 0;
    }

    #[must_use]
    pub fn pair(&self) -> &Arc<SamplePair> {
        &self.pair
    }

    #[must_use]
    pub fn played(&self) -> u64 {
        self.played
    }

    /// The live sample under the playhead.
    #[must_use]
    pub fn current(&self) -> f32 {
        forward_sample(&self.pair, self.played)
    }

    pub fn step(&mut self) {
        self.played += 1;
    }

    #[must_use]
    pub fn view(&self, beat: f64, units_per_beat: f64) -> DeckView<'_> {
        DeckView {
            pair: &self.pair,
            played: self.played,
            beat,
            units_per_beat,
        }
    }
}

/// Deck state frozen at the start of a tick.
#[derive(Debug, Clone, Copy)]
pub struct DeckView<'a> {
    pub pair: &'a Arc<SamplePair>,
    /// Samples played when the clock read `beat`.
    pub played: u64,
    pub beat: f64,
    pub units_per_beat: f64,
}

impl DeckView<'_> {
    /// Unwrapped play count at `beat`, extrapolated from the tick snapshot.
    #[must_use]
    pub fn played_at(&self, beat: f64) -> u64 {
        let offset = ((beat - self.beat) * self.units_per_beat).floor();
        if offset >= 0.0 {
            self.played.saturating_add(offset as u64)
        } else {
            self.played.saturating_sub((-offset) as u64)
        }
    }

    /// The `len` samples played strictly before `beat`. Only material played
    /// since the pair was loaded is addressable.
    #[must_use]
    pub fn window_before(&self, beat: f64, len: usize) -> Span {
        let end = self.played_at(beat);
        let first = end.saturating_sub(len as u64);
        Span {
            first,
            len: (end - first) as usize,
            requested: len,
        }
    }
}

/// Forward-take sample for an unwrapped play count.
#[must_use]
pub fn forward_sample(pair: &SamplePair, played: u64) -> f32 {
    wrap(played, pair.forward.len()).map_or(0.0, |index| pair.forward[index])
}

/// Index into the forward take for an unwrapped play count.
#[must_use]
pub fn wrap(played: u64, len: usize) -> Option<usize> {
    (len > 0).then(|| (played % len as u64) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_deck(len: usize) -> Deck {
        let forward = (0..len).map(|index| index as f32).collect();
        Deck::new(Arc::new(SamplePair::from_forward("ramp", 8, forward)))
    }

    #[test]
    fn deck_loops_the_forward_take() {
        let mut deck = ramp_deck(3);
        let mut heard = Vec::new();
        for _ in 0..5 {
            heard.push(deck.current());
            deck.step();
        }
        assert_eq!(heard, vec![0.0, 1.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn view_extrapolates_the_play_count() {
        let mut deck = ramp_deck(16);
        for _ in 0..10 {
            deck.step();
        }
        let view = deck.view(2.0, 4.0);
        assert_eq!(view.played_at(2.5), 12);
        assert_eq!(view.played_at(1.0), 6);
        assert_eq!(view.played_at(-10.0), 0);
    }

    #[test]
    fn deck_window_is_limited_to_played_material() {
        let mut deck = ramp_deck(16);
        for _ in 0..3 {
            deck.step();
        }
        let span = deck.view(0.0, 4.0).window_before(0.0, 8);
        assert_eq!(span.first, 0);
        assert_eq!(span.len, 3);
        assert!(span.is_clamped());
    }

    #[test]
    fn loading_restarts_the_playhead() {
        let mut deck = ramp_deck(4);
        deck.step();
        deck.load(Arc::new(SamplePair::silence(8)));
        assert_eq!(deck.played(), 0);
        assert_eq!(deck.current(), 0.0);
    }
}
