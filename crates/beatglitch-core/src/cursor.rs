use serde::{Deserialize, Serialize};

use crate::buffer::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Advanced,
    Wrapped,
    Exhausted,
}

/// Maps "units elapsed since the window started playing" onto a buffer index.
///
/// A forward cursor loops `start..start + len` forever, counting repeats. A
/// backward cursor walks from `start` (the newest unit of its window) down to
/// `start - len + 1` once and is then exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackCursor {
    direction: Direction,
    start: u64,
    len: usize,
    position: usize,
    repeats: u32,
    exhausted: bool,
}

impl PlaybackCursor {
    #[must_use]
    pub fn new(direction: Direction, start: u64, len: usize) -> Self {
        Self {
            direction,
            start,
            len,
            position: 0,
            repeats: 0,
            exhausted: len == 0,
        }
    }

    /// Loops the span oldest unit first.
    #[must_use]
    pub fn looping(span: Span) -> Self {
        Self::new(Direction::Forward, span.first, span.len)
    }

    /// Plays the span once, newest unit first.
    #[must_use]
    pub fn reversing(span: Span) -> Self {
        match span.last() {
            Some(last) => Self::new(Direction::Backward, last, span.len),
            None => Self::new(Direction::Backward, span.first, 0),
        }
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn repeats(&self) -> u32 {
        self.repeats
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Index under the cursor right now.
    #[must_use]
    pub fn index(&self) -> Option<u64> {
        if self.exhausted {
            return None;
        }
        self.index_at(self.position as u64)
    }

    /// Index after `elapsed` units of playback, without moving the cursor.
    #[must_use]
    pub fn index_at(&self, elapsed: u64) -> Option<u64> {
        if self.len == 0 {
            return None;
        }

        match self.direction {
            Direction::Forward => Some(self.start + elapsed % self.len as u64),
            Direction::Backward => (elapsed < self.len as u64).then(|| self.start - elapsed),
        }
    }

    pub fn step(&mut self) -> Step {
        if self.exhausted {
            return Step::Exhausted;
        }

        self.position += 1;
        if self.position < self.len {
            return Step::Advanced;
        }

        match self.direction {
            Direction::Forward => {
                self.position = 0;
                self.repeats = self.repeats.saturating_add(1);
                Step::Wrapped
            }
            Direction::Backward => {
                self.position = self.len - 1;
                self.exhausted = true;
                Step::Exhausted
            }
        }
    }

    /// Jumps to the state reached after `elapsed` units from the window start.
    pub fn seek(&mut self, elapsed: u64) {
        if self.len == 0 {
            self.exhausted = true;
            return;
        }

        let len = self.len as u64;
        match self.direction {
            Direction::Forward => {
                self.position = (elapsed % len) as usize;
                self.repeats = u32::try_from(elapsed / len).unwrap_or(u32::MAX);
            }
            Direction::Backward => {
                if elapsed >= len {
                    self.position = self.len - 1;
                    self.exhausted = true;
                } else {
                    self.position = elapsed as usize;
                }
            }
        }
    }

    /// Drops units older than `oldest` from the window. Returns `true` if the
    /// window shrank.
    pub fn clamp_to(&mut self, oldest: u64) -> bool {
        if self.len == 0 {
            return false;
        }

        let first = match self.direction {
            Direction::Forward => self.start,
            Direction::Backward => self.start + 1 - self.len as u64,
        };
        if first >= oldest {
            return false;
        }

        let cut = usize::try_from(oldest - first).unwrap_or(usize::MAX);
        if cut >= self.len {
            self.len = 0;
            self.position = 0;
            self.exhausted = true;
            return true;
        }

        self.len -= cut;
        match self.direction {
            Direction::Forward => {
                self.start = oldest;
                self.position %= self.len;
            }
            Direction::Backward => {
                if self.position >= self.len {
                    self.position = self.len - 1;
                    self.exhausted = true;
                }
            }
        }
        true
    }
}
