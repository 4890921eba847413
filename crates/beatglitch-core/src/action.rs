use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    buffer::RingIndex, clock::ClockSnapshot, config::Parameters, deck::DeckView,
    scheduler::ScheduleError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Stutter,
    Rewind,
    Generator,
    Custom,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stutter => "stutter",
            Self::Rewind => "rewind",
            Self::Generator => "generator",
            Self::Custom => "custom",
        };
        f.write_str(label)
    }
}

/// `Scheduled -> Active -> Done`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Scheduled,
    Active,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Running,
    Complete,
}

/// Why an action left the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retirement {
    Completed,
    Preempted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    Audio,
    Video,
}

/// Output channels an action takes over while active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelSet {
    audio: bool,
    video: bool,
}

impl ChannelSet {
    pub const NONE: Self = Self {
        audio: false,
        video: false,
    };
    pub const AUDIO: Self = Self {
        audio: true,
        video: false,
    };
    pub const VIDEO: Self = Self {
        audio: false,
        video: true,
    };
    pub const ALL: Self = Self {
        audio: true,
        video: true,
    };

    #[must_use]
    pub fn contains(&self, channel: OutputChannel) -> bool {
        match channel {
            OutputChannel::Audio => self.audio,
            OutputChannel::Video => self.video,
        }
    }

    #[must_use]
    pub fn overlaps(&self, other: ChannelSet) -> bool {
        (self.audio && other.audio) || (self.video && other.video)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.audio && !self.video
    }
}

/// Material an effect can read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Live input captured into the audio ring.
    Audio,
    /// Live frames captured into the video ring.
    Video,
    /// The sample pair on the deck.
    Deck,
}

impl Source {
    #[must_use]
    pub fn channel(self) -> OutputChannel {
        match self {
            Self::Audio | Self::Deck => OutputChannel::Audio,
            Self::Video => OutputChannel::Video,
        }
    }
}

/// Where to read a source for one output unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadPosition<'a> {
    /// Absolute index into the source's ring buffer.
    Ring(u64),
    /// Index into one take of the sample pair the effect captured.
    Sample { samples: &'a [f32], index: usize },
}

/// Read-only view of every source, frozen for one tick.
#[derive(Clone, Copy)]
pub struct Media<'a> {
    pub audio: &'a dyn RingIndex,
    pub video: &'a dyn RingIndex,
    /// Audio samples per second.
    pub audio_rate: f64,
    /// Video frames per second.
    pub video_rate: f64,
    pub deck: Option<DeckView<'a>>,
}

impl Media<'_> {
    #[must_use]
    pub fn ring(&self, source: Source) -> Option<&dyn RingIndex> {
        match source {
            Source::Audio => Some(self.audio),
            Source::Video => Some(self.video),
            Source::Deck => None,
        }
    }

    #[must_use]
    pub fn unit_rate(&self, source: Source) -> f64 {
        match source {
            Source::Audio | Source::Deck => self.audio_rate,
            Source::Video => self.video_rate,
        }
    }
}

impl fmt::Debug for Media<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Media")
            .field("audio_retained", &self.audio.retained())
            .field("video_retained", &self.video.retained())
            .field("audio_rate", &self.audio_rate)
            .field("video_rate", &self.video_rate)
            .field("deck", &self.deck.map(|deck| deck.played))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionEvent {
    /// A generator committed to another child effect.
    EffectScheduled {
        generator: ActionId,
        child: ActionId,
        kind: ActionKind,
        at_beat: f64,
        total: u32,
    },
    /// An effect got less material than it asked for.
    WindowClamped {
        action: ActionId,
        source: Source,
        requested: usize,
        retained: usize,
    },
}

pub struct SpawnRequest {
    pub action: Box<dyn BeatAction>,
    pub at_beat: f64,
}

impl fmt::Debug for SpawnRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnRequest")
            .field("id", &self.action.id())
            .field("kind", &self.action.kind())
            .field("at_beat", &self.at_beat)
            .finish()
    }
}

/// Everything an action may see or touch during one tick.
///
/// Scheduling and cancellation requests are queued here and applied by the
/// scheduler after the update pass, so no action mutates the schedule while it
/// is being walked.
pub struct TickContext<'a> {
    snapshot: ClockSnapshot,
    parameters: &'a Parameters,
    media: Media<'a>,
    rng: &'a mut dyn RngCore,
    live: Vec<ActionId>,
    spawned: Vec<SpawnRequest>,
    cancelled: Vec<ActionId>,
    events: Vec<ActionEvent>,
}

impl<'a> TickContext<'a> {
    #[must_use]
    pub fn new(
        snapshot: ClockSnapshot,
        parameters: &'a Parameters,
        media: Media<'a>,
        rng: &'a mut dyn RngCore,
        live: Vec<ActionId>,
    ) -> Self {
        Self {
            snapshot,
            parameters,
            media,
            rng,
            live,
            spawned: Vec::new(),
            cancelled: Vec::new(),
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn beat(&self) -> f64 {
        self.snapshot.beat
    }

    #[must_use]
    pub fn snapshot(&self) -> ClockSnapshot {
        self.snapshot
    }

    #[must_use]
    pub fn parameters(&self) -> &Parameters {
        self.parameters
    }

    #[must_use]
    pub fn media(&self) -> &Media<'a> {
        &self.media
    }

    pub fn rng(&mut self) -> &mut dyn RngCore {
        &mut *self.rng
    }

    /// Whether `id` is scheduled or active, including actions spawned this tick.
    #[must_use]
    pub fn is_live(&self, id: ActionId) -> bool {
        if self.cancelled.contains(&id) {
            return false;
        }
        self.live.contains(&id) || self.spawned.iter().any(|request| request.action.id() == id)
    }

    /// Queues a child action. Scheduling into the past is refused.
    pub fn spawn(
        &mut self,
        action: Box<dyn BeatAction>,
        at_beat: f64,
    ) -> Result<ActionId, ScheduleError> {
        if !at_beat.is_finite() || at_beat < 0.0 {
            return Err(ScheduleError::InvalidBeat(at_beat));
        }
        if at_beat < self.snapshot.beat {
            return Err(ScheduleError::Retroactive {
                at_beat,
                now: self.snapshot.beat,
            });
        }

        let id = action.id();
        self.spawned.push(SpawnRequest { action, at_beat });
        Ok(id)
    }

    pub fn cancel(&mut self, id: ActionId) {
        if !self.cancelled.contains(&id) {
            self.cancelled.push(id);
        }
    }

    pub fn emit(&mut self, event: ActionEvent) {
        self.events.push(event);
    }

    pub(crate) fn set_live(&mut self, live: impl IntoIterator<Item = ActionId>) {
        self.live.clear();
        self.live.extend(live);
    }

    pub(crate) fn take_cancelled(&mut self) -> Vec<ActionId> {
        std::mem::take(&mut self.cancelled)
    }

    /// Drops a queued spawn; returns `true` if one matched.
    pub(crate) fn withdraw_spawn(&mut self, id: ActionId) -> bool {
        let before = self.spawned.len();
        self.spawned.retain(|request| request.action.id() != id);
        self.spawned.len() != before
    }

    pub(crate) fn into_parts(self) -> (Vec<ActionId>, Vec<SpawnRequest>, Vec<ActionEvent>) {
        (self.live, self.spawned, self.events)
    }
}

/// A beat-scheduled action.
///
/// `activate` runs once at the first tick whose beat reaches the scheduled beat.
/// `update` runs once per tick while active. `finish` runs exactly once when the
/// action retires, whether it completed, was preempted or was cancelled.
pub trait BeatAction: Send {
    fn id(&self) -> ActionId;

    fn kind(&self) -> ActionKind {
        ActionKind::Custom
    }

    /// Output channels this action takes over; empty for controllers.
    fn channels(&self) -> ChannelSet {
        ChannelSet::NONE
    }

    fn activate(&mut self, anchor_beat: f64, ctx: &mut TickContext<'_>);

    fn update(&mut self, ctx: &mut TickContext<'_>) -> Progress;

    fn finish(&mut self, _ctx: &mut TickContext<'_>) {}

    /// Where `source` should be read for the output unit at `beat`, or `None`
    /// to pass the live signal through.
    fn read_position(&self, _source: Source, _beat: f64) -> Option<ReadPosition<'_>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sets_overlap_per_channel() {
        assert!(ChannelSet::ALL.overlaps(ChannelSet::AUDIO));
        assert!(!ChannelSet::AUDIO.overlaps(ChannelSet::VIDEO));
        assert!(!ChannelSet::NONE.overlaps(ChannelSet::ALL));
        assert!(ChannelSet::NONE.is_empty());
        assert!(ChannelSet::VIDEO.contains(OutputChannel::Video));
    }

    #[test]
    fn deck_reads_land_on_the_audio_channel() {
        assert_eq!(Source::Deck.channel(), OutputChannel::Audio);
        assert_eq!(Source::Video.channel(), OutputChannel::Video);
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let event = ActionEvent::WindowClamped {
            action: ActionId::new(),
            source: Source::Audio,
            requested: 80,
            retained: 40,
        };
        let json = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(json["type"], "window_clamped");
        assert_eq!(json["source"], "audio");
    }
}
