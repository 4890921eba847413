use rand::RngCore;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::{
    action::{
        ActionEvent, ActionId, ActionKind, ActionState, BeatAction, ChannelSet, Media,
        OutputChannel, Progress, Retirement, SpawnRequest, TickContext,
    },
    clock::ClockSnapshot,
    config::Parameters,
};

#[derive(Debug, Clone, Copy, PartialEq, Error, Serialize)]
pub enum ScheduleError {
    #[error("action {0} is already scheduled")]
    Duplicate(ActionId),
    #[error("beat {0} is not a valid schedule position")]
    InvalidBeat(f64),
    #[error("cannot schedule at beat {at_beat}, the clock is already at {now}")]
    Retroactive { at_beat: f64, now: f64 },
}

/// Inputs for one scheduler tick.
pub struct Tick<'a> {
    pub snapshot: ClockSnapshot,
    pub parameters: &'a Parameters,
    pub media: Media<'a>,
    pub rng: &'a mut dyn RngCore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetiredAction {
    pub id: ActionId,
    pub kind: ActionKind,
    pub reason: Retirement,
}

/// What changed during one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub beat: f64,
    pub activated: Vec<ActionId>,
    pub retired: Vec<RetiredAction>,
    pub spawned: Vec<ActionId>,
    pub rejected: Vec<ScheduleError>,
    pub events: Vec<ActionEvent>,
}

impl TickReport {
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.activated.is_empty()
            && self.retired.is_empty()
            && self.spawned.is_empty()
            && self.rejected.is_empty()
            && self.events.is_empty()
    }

    /// Folds a later tick of the same block into this report.
    pub fn absorb(&mut self, later: TickReport) {
        self.beat = later.beat;
        self.activated.extend(later.activated);
        self.retired.extend(later.retired);
        self.spawned.extend(later.spawned);
        self.rejected.extend(later.rejected);
        self.events.extend(later.events);
    }
}

struct Entry {
    id: ActionId,
    at_beat: f64,
    state: ActionState,
    retirement: Option<Retirement>,
    finished: bool,
    action: Box<dyn BeatAction>,
}

impl Entry {
    fn retire(&mut self, reason: Retirement) -> bool {
        if self.state == ActionState::Done {
            return false;
        }
        self.state = ActionState::Done;
        self.retirement = Some(reason);
        true
    }
}

/// Beat-ordered action lifecycle driver.
///
/// Actions are kept in insertion order. Each [`Scheduler::advance`] promotes
/// due actions, updates active ones, then retires whatever finished, so an
/// action never observes a half-applied tick.
#[derive(Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
    last_beat: Option<f64>,
    live_scratch: Vec<ActionId>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `action` to start at `at_beat`.
    ///
    /// A beat that has already passed is accepted and the action starts on the
    /// next tick, anchored at that tick's beat.
    #[instrument(skip(self, action), fields(id = %action.id(), kind = %action.kind()))]
    pub fn schedule(
        &mut self,
        action: Box<dyn BeatAction>,
        at_beat: f64,
    ) -> Result<ActionId, ScheduleError> {
        if !at_beat.is_finite() || at_beat < 0.0 {
            return Err(ScheduleError::InvalidBeat(at_beat));
        }

        let id = action.id();
        if self.entries.iter().any(|entry| entry.id == id) {
            return Err(ScheduleError::Duplicate(id));
        }

        self.entries.push(Entry {
            id,
            at_beat,
            state: ActionState::Scheduled,
            retirement: None,
            finished: false,
            action,
        });
        debug!(at_beat, pending = self.entries.len(), "action scheduled");
        Ok(id)
    }

    /// Marks an action done. Its `finish` runs during the next advance.
    pub fn cancel(&mut self, id: ActionId) -> bool {
        let cancelled = self
            .entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .is_some_and(|entry| entry.retire(Retirement::Cancelled));
        if cancelled {
            debug!(%id, "action cancelled");
        }
        cancelled
    }

    #[must_use]
    pub fn state(&self, id: ActionId) -> Option<ActionState> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.state)
    }

    #[must_use]
    pub fn scheduled_beat(&self, id: ActionId) -> Option<f64> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.at_beat)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn count(&self, state: ActionState) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.state == state)
            .count()
    }

    /// Earliest start beat still waiting strictly after `beat`.
    #[must_use]
    pub fn next_due(&self, beat: f64) -> Option<f64> {
        self.entries
            .iter()
            .filter(|entry| entry.state == ActionState::Scheduled && entry.at_beat > beat)
            .map(|entry| entry.at_beat)
            .min_by(f64::total_cmp)
    }

    #[must_use]
    pub fn last_beat(&self) -> Option<f64> {
        self.last_beat
    }

    /// The action currently driving `channel`, if any.
    #[must_use]
    pub fn active_on(&self, channel: OutputChannel) -> Option<&dyn BeatAction> {
        self.entries
            .iter()
            .rev()
            .find(|entry| {
                entry.state == ActionState::Active && entry.action.channels().contains(channel)
            })
            .map(|entry| entry.action.as_ref())
    }

    pub fn active(&self) -> impl Iterator<Item = &dyn BeatAction> {
        self.entries
            .iter()
            .filter(|entry| entry.state == ActionState::Active)
            .map(|entry| entry.action.as_ref())
    }

    #[instrument(level = "trace", skip(self, tick), fields(beat = tick.snapshot.beat))]
    pub fn advance(&mut self, tick: Tick<'_>) -> TickReport {
        let Tick {
            mut snapshot,
            parameters,
            media,
            rng,
        } = tick;

        let previous = self.last_beat;
        if let Some(previous) = previous {
            if !(snapshot.beat >= previous) {
                trace!(previous, beat = snapshot.beat, "clock went backwards, holding beat");
                snapshot.beat = previous;
            }
        }

        let mut report = TickReport {
            beat: snapshot.beat,
            ..TickReport::default()
        };
        let live = std::mem::take(&mut self.live_scratch);
        let mut ctx = TickContext::new(snapshot, parameters, media, rng, live);
        ctx.set_live(self.live_ids());

        let promoted = self.promote(&mut ctx, previous, &mut report);
        self.preempt(&promoted);

        ctx.set_live(self.live_ids());
        for entry in &mut self.entries {
            if entry.state != ActionState::Active {
                continue;
            }
            if entry.action.update(&mut ctx) == Progress::Complete {
                entry.retire(Retirement::Completed);
            }
        }

        self.retire(&mut ctx, &mut report);

        let (live, spawned, events) = ctx.into_parts();
        self.live_scratch = live;
        report.events = events;
        for SpawnRequest { action, at_beat } in spawned {
            match self.schedule(action, at_beat) {
                Ok(id) => report.spawned.push(id),
                Err(error) => {
                    warn!(%error, "rejected spawned action");
                    report.rejected.push(error);
                }
            }
        }

        self.last_beat = Some(snapshot.beat);
        report
    }

    fn live_ids(&self) -> impl Iterator<Item = ActionId> + '_ {
        self.entries
            .iter()
            .filter(|entry| entry.state != ActionState::Done)
            .map(|entry| entry.id)
    }

    /// Activates every scheduled action whose beat has been reached. Returns the
    /// positions of the newly active entries in insertion order.
    fn promote(
        &mut self,
        ctx: &mut TickContext<'_>,
        previous: Option<f64>,
        report: &mut TickReport,
    ) -> Vec<usize> {
        let beat = ctx.beat();
        let mut promoted = Vec::new();
        for (position, entry) in self.entries.iter_mut().enumerate() {
            if entry.state != ActionState::Scheduled || entry.at_beat > beat {
                continue;
            }

            let anchor = match previous {
                Some(previous) if entry.at_beat > previous => entry.at_beat,
                _ => beat,
            };
            entry.state = ActionState::Active;
            entry.action.activate(anchor, ctx);
            debug!(id = %entry.id, kind = %entry.action.kind(), anchor, "action activated");
            report.activated.push(entry.id);
            promoted.push(position);
        }
        promoted
    }

    /// Last writer wins: a newly active action retires every other active action
    /// on an overlapping channel. Among actions promoted together, the later one
    /// in insertion order wins.
    fn preempt(&mut self, promoted: &[usize]) {
        for &winner in promoted {
            if self.entries[winner].state != ActionState::Active {
                continue;
            }
            let channels = self.entries[winner].action.channels();
            if channels.is_empty() {
                continue;
            }
            let winner_id = self.entries[winner].id;

            for position in 0..self.entries.len() {
                if position == winner || !self.overlaps_active(position, channels) {
                    continue;
                }
                if position > winner && promoted.contains(&position) {
                    continue;
                }

                let loser = &mut self.entries[position];
                loser.retire(Retirement::Preempted);
                debug!(id = %loser.id, by = %winner_id, "action preempted");
            }
        }
    }

    fn overlaps_active(&self, position: usize, channels: ChannelSet) -> bool {
        let entry = &self.entries[position];
        entry.state == ActionState::Active && entry.action.channels().overlaps(channels)
    }

    /// Runs `finish` on every retired action and drops it. Cancellations raised
    /// by `finish` retire further actions in the same pass.
    fn retire(&mut self, ctx: &mut TickContext<'_>, report: &mut TickReport) {
        loop {
            let mut progressed = false;
            for id in ctx.take_cancelled() {
                if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) {
                    progressed |= entry.retire(Retirement::Cancelled);
                } else if ctx.withdraw_spawn(id) {
                    debug!(%id, "spawn withdrawn before it was scheduled");
                }
            }

            for entry in &mut self.entries {
                if entry.state == ActionState::Done && !entry.finished {
                    entry.finished = true;
                    entry.action.finish(ctx);
                    progressed = true;
                }
            }

            if !progressed {
                break;
            }
        }

        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.state != ActionState::Done {
                kept.push(entry);
                continue;
            }
            let reason = entry.retirement.unwrap_or(Retirement::Completed);
            debug!(id = %entry.id, kind = %entry.action.kind(), ?reason, "action retired");
            report.retired.push(RetiredAction {
                id: entry.id,
                kind: entry.action.kind(),
                reason,
            });
        }
        self.entries = kept;
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("entries", &self.entries.len())
            .field("last_beat", &self.last_beat)
            .finish()
    }
}
