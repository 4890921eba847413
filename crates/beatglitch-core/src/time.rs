/// Guards against float noise when flooring beat products that should be exact.
const UNIT_EPSILON: f64 = 1e-9;

#[must_use]
pub fn beats_to_seconds(beats: f64, bpm: f64) -> f64 {
    if bpm <= 0.0 || beats <= 0.0 {
        return 0.0;
    }

    beats * (60.0 / bpm)
}

#[must_use]
pub fn seconds_to_beats(seconds: f64, bpm: f64) -> f64 {
    if seconds <= 0.0 || bpm <= 0.0 {
        return 0.0;
    }

    seconds * (bpm / 60.0)
}

#[must_use]
pub fn units_per_beat(bpm: f64, unit_rate: f64) -> f64 {
    if bpm <= 0.0 || unit_rate <= 0.0 {
        return 0.0;
    }

    unit_rate * 60.0 / bpm
}

#[must_use]
pub fn beats_per_unit(bpm: f64, unit_rate: f64) -> f64 {
    let per_beat = units_per_beat(bpm, unit_rate);
    if per_beat <= 0.0 { 0.0 } else { 1.0 / per_beat }
}

/// Rounds to the nearest whole unit; a positive window never collapses below one unit.
#[must_use]
pub fn beats_to_units(beats: f64, bpm: f64, unit_rate: f64) -> usize {
    if beats <= 0.0 {
        return 0;
    }

    let units = (beats * units_per_beat(bpm, unit_rate)).round();
    if units < 1.0 { 1 } else { units as usize }
}

#[must_use]
pub fn units_to_beats(units: usize, bpm: f64, unit_rate: f64) -> f64 {
    let per_beat = units_per_beat(bpm, unit_rate);
    if per_beat <= 0.0 {
        return 0.0;
    }

    units as f64 / per_beat
}

/// Whole units elapsed between `from` and `to` at a fixed unit density.
#[must_use]
pub fn elapsed_units(from: f64, to: f64, units_per_beat: f64) -> u64 {
    if to <= from || units_per_beat <= 0.0 {
        return 0;
    }

    ((to - from) * units_per_beat + UNIT_EPSILON).floor() as u64
}

/// The first integer beat strictly after `beat`.
#[must_use]
pub fn next_whole_beat(beat: f64) -> f64 {
    beat.max(0.0).floor() + 1.0
}

/// Ring capacity, in units, that holds `max_window_beats` at the slowest tempo.
#[must_use]
pub fn capacity_for(max_window_beats: f64, min_bpm: f64, unit_rate: f64) -> usize {
    let seconds = beats_to_seconds(max_window_beats, min_bpm);
    (seconds * unit_rate).ceil().max(1.0) as usize
}
