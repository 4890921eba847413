//! Rolling, beat-tagged recording of captured units.
//!
//! Indices handed out by [`RingBuffer`] are absolute write counts: the first unit
//! ever written is index 0 and indices keep growing after the oldest slots are
//! evicted. An index stays meaningful for as long as it is retained, which lets
//! effects hold on to a window across many ticks without re-resolving it.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum BufferError {
    #[error("ring buffer is empty")]
    Empty,
    #[error("unit {requested} is outside the retained window {oldest}..={newest}")]
    OutOfWindow {
        requested: i64,
        oldest: u64,
        newest: u64,
    },
}

/// A contiguous run of retained units, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub first: u64,
    pub len: usize,
    /// Units the caller asked for before clamping to what is retained.
    pub requested: usize,
}

impl Span {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_clamped(&self) -> bool {
        self.len < self.requested
    }

    #[must_use]
    pub fn last(&self) -> Option<u64> {
        (self.len > 0).then(|| self.first + self.len as u64 - 1)
    }
}

/// Type-erased view used by effects that only need to resolve windows.
pub trait RingIndex {
    /// The `len` units written strictly before `beat`, clamped to what is retained.
    fn window_before(&self, beat: f64, len: usize) -> Result<Span, BufferError>;
    fn oldest_index(&self) -> Option<u64>;
    fn newest_beat(&self) -> Option<f64>;
    fn retained(&self) -> usize;
}

#[derive(Debug, Clone)]
struct Slot<T> {
    unit: T,
    beat: f64,
}

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Slot<T>>,
    capacity: usize,
    written: u64,
}

impl<T> RingBuffer<T> {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            written: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total units ever written.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    #[must_use]
    pub fn oldest_index(&self) -> Option<u64> {
        (!self.is_empty()).then(|| self.written - self.slots.len() as u64)
    }

    /// Index of the live head, the most recent write.
    #[must_use]
    pub fn newest_index(&self) -> Option<u64> {
        self.written.checked_sub(1)
    }

    #[must_use]
    pub fn oldest_beat(&self) -> Option<f64> {
        self.oldest_index().map(|index| self.slot(index).beat)
    }

    #[must_use]
    pub fn newest_beat(&self) -> Option<f64> {
        self.newest_index().map(|index| self.slot(index).beat)
    }

    /// Appends one unit, evicting the oldest once full.
    ///
    /// Tags never run backwards: a beat earlier than the previous write (a tempo
    /// source resync, say) is recorded at the previous write's beat.
    pub fn write(&mut self, unit: T, at_beat: f64) {
        let beat = match self.newest_beat() {
            Some(previous) if !(at_beat >= previous) => previous,
            None if !at_beat.is_finite() => 0.0,
            _ => at_beat,
        };

        let slot = Slot { unit, beat };
        if self.slots.len() < self.capacity {
            self.slots.push(slot);
        } else {
            let position = self.position(self.written);
            self.slots[position] = slot;
        }
        self.written += 1;
    }

    pub fn get(&self, index: u64) -> Result<&T, BufferError> {
        self.check(i64::try_from(index).unwrap_or(i64::MAX))?;
        Ok(&self.slot(index).unit)
    }

    pub fn beat_of(&self, index: u64) -> Result<f64, BufferError> {
        self.check(i64::try_from(index).unwrap_or(i64::MAX))?;
        Ok(self.slot(index).beat)
    }

    /// Index of the newest unit written at or before `at_beat`. A NaN beat
    /// resolves to nothing and reports as before the window.
    pub fn locate(&self, at_beat: f64) -> Result<u64, BufferError> {
        let (oldest, newest) = self.bounds()?;
        if at_beat.is_nan() || at_beat < self.slot(oldest).beat {
            return Err(BufferError::OutOfWindow {
                requested: oldest as i64 - 1,
                oldest,
                newest,
            });
        }
        if at_beat > self.slot(newest).beat {
            return Err(BufferError::OutOfWindow {
                requested: newest as i64 + 1,
                oldest,
                newest,
            });
        }

        let after = self.partition(oldest, newest + 1, |beat| beat <= at_beat);
        Ok(after - 1)
    }

    /// The unit written `offset` units before the write that `at_beat` resolves to.
    pub fn read(&self, at_beat: f64, offset: usize) -> Result<&T, BufferError> {
        let located = self.locate(at_beat)?;
        let requested = located as i64 - offset as i64;
        self.check(requested)?;
        Ok(&self.slot(requested as u64).unit)
    }

    fn bounds(&self) -> Result<(u64, u64), BufferError> {
        match (self.oldest_index(), self.newest_index()) {
            (Some(oldest), Some(newest)) => Ok((oldest, newest)),
            _ => Err(BufferError::Empty),
        }
    }

    fn check(&self, requested: i64) -> Result<(), BufferError> {
        let (oldest, newest) = self.bounds()?;
        if requested < oldest as i64 || requested > newest as i64 {
            return Err(BufferError::OutOfWindow {
                requested,
                oldest,
                newest,
            });
        }
        Ok(())
    }

    /// First index in `[low, high)` whose tag fails `keep`; tags are non-decreasing.
    fn partition(&self, mut low: u64, mut high: u64, keep: impl Fn(f64) -> bool) -> u64 {
        while low < high {
            let mid = low + (high - low) / 2;
            if keep(self.slot(mid).beat) {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    fn position(&self, index: u64) -> usize {
        (index % self.capacity as u64) as usize
    }

    fn slot(&self, index: u64) -> &Slot<T> {
        &self.slots[self.position(index)]
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Re-writes the newest unit at `at_beat`; used when a capture tick is missed.
    /// Returns `false` when nothing has been captured yet.
    pub fn hold_last(&mut self, at_beat: f64) -> bool {
        let Some(newest) = self.newest_index() else {
            return false;
        };
        let unit = self.slot(newest).unit.clone();
        self.write(unit, at_beat);
        true
    }
}

impl<T> RingIndex for RingBuffer<T> {
    fn window_before(&self, beat: f64, len: usize) -> Result<Span, BufferError> {
        let (oldest, newest) = self.bounds()?;
        let end = self.partition(oldest, newest + 1, |tag| tag < beat);
        if end == oldest && len > 0 {
            return Err(BufferError::OutOfWindow {
                requested: oldest as i64 - 1,
                oldest,
                newest,
            });
        }

        let first = end.saturating_sub(len as u64).max(oldest);
        Ok(Span {
            first,
            len: (end - first) as usize,
            requested: len,
        })
    }

    fn oldest_index(&self) -> Option<u64> {
        RingBuffer::oldest_index(self)
    }

    fn newest_beat(&self) -> Option<f64> {
        RingBuffer::newest_beat(self)
    }

    fn retained(&self) -> usize {
        self.len()
    }
}

/// One writer, many readers. The write lock is held only while a unit is stored,
/// so readers always observe fully written slots.
#[derive(Debug)]
pub struct SharedRingBuffer<T> {
    inner: Arc<RwLock<RingBuffer<T>>>,
}

impl<T> Clone for SharedRingBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedRingBuffer<T> {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RingBuffer::with_capacity(capacity))),
        }
    }

    pub fn write(&self, unit: T, at_beat: f64) {
        self.inner.write().write(unit, at_beat);
    }

    /// Stores a whole block under one lock acquisition.
    pub fn write_block(&self, units: impl IntoIterator<Item = (T, f64)>) {
        let mut ring = self.inner.write();
        for (unit, beat) in units {
            ring.write(unit, beat);
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, RingBuffer<T>> {
        self.inner.read()
    }

    #[must_use]
    pub fn live_index(&self) -> Option<u64> {
        self.inner.read().newest_index()
    }
}

impl<T: Clone> SharedRingBuffer<T> {
    pub fn hold_last(&self, at_beat: f64) -> bool {
        self.inner.write().hold_last(at_beat)
    }
}
