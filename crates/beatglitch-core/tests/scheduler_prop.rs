use std::sync::Arc;

use beatglitch_core::{
    ActionId, BeatAction, BufferError, ChannelSet, OutputChannel, Progress, RingBuffer, RingIndex,
    Scheduler, TickContext, fixtures::SchedulerHarness,
};
use parking_lot::Mutex;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Activate,
    Update,
    Finish,
}

type Log = Arc<Mutex<Vec<(usize, Call)>>>;

struct Probe {
    id: ActionId,
    index: usize,
    channels: ChannelSet,
    length: f64,
    anchor: f64,
    log: Log,
}

impl BeatAction for Probe {
    fn id(&self) -> ActionId {
        self.id
    }

    fn channels(&self) -> ChannelSet {
        self.channels
    }

    fn activate(&mut self, anchor_beat: f64, _ctx: &mut TickContext<'_>) {
        self.anchor = anchor_beat;
        self.log.lock().push((self.index, Call::Activate));
    }

    fn update(&mut self, ctx: &mut TickContext<'_>) -> Progress {
        self.log.lock().push((self.index, Call::Update));
        if ctx.beat() >= self.anchor + self.length {
            Progress::Complete
        } else {
            Progress::Running
        }
    }

    fn finish(&mut self, _ctx: &mut TickContext<'_>) {
        self.log.lock().push((self.index, Call::Finish));
    }
}

fn channels(code: u8) -> ChannelSet {
    match code % 4 {
        0 => ChannelSet::NONE,
        1 => ChannelSet::AUDIO,
        2 => ChannelSet::VIDEO,
        _ => ChannelSet::ALL,
    }
}

/// `(start tick, length in ticks, channel code, cancel tick)`, one tick per quarter beat.
fn plans() -> impl Strategy<Value = Vec<(u32, u32, u8, Option<u32>)>> {
    prop::collection::vec(
        (0u32..32, 1u32..8, any::<u8>(), prop::option::of(0u32..48)),
        1..12,
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn every_action_follows_activate_update_finish(plan in plans()) {
        let log = Log::default();
        let mut harness = SchedulerHarness::new(17);
        let mut scheduler = Scheduler::new();
        let mut ids = Vec::new();

        for (index, (start, length, code, _)) in plan.iter().enumerate() {
            let probe = Probe {
                id: ActionId::new(),
                index,
                channels: channels(*code),
                length: f64::from(*length) / 4.0,
                anchor: 0.0,
                log: Arc::clone(&log),
            };
            let id = scheduler
                .schedule(Box::new(probe), f64::from(*start) / 4.0)
                .expect("valid beats should schedule");
            ids.push(id);
        }

        for tick in 0u32..64 {
            for (index, (_, _, _, cancel_at)) in plan.iter().enumerate() {
                if *cancel_at == Some(tick) {
                    scheduler.cancel(ids[index]);
                }
            }
            harness.advance(&mut scheduler, f64::from(tick) / 4.0);

            for channel in [OutputChannel::Audio, OutputChannel::Video] {
                let holders = scheduler
                    .active()
                    .filter(|action| action.channels().contains(channel))
                    .count();
                prop_assert!(holders <= 1, "{channel:?} has {holders} active actions");
            }
        }

        prop_assert!(scheduler.is_empty());
        let log = log.lock();
        for index in 0..plan.len() {
            let calls: Vec<Call> = log
                .iter()
                .filter(|(probe, _)| *probe == index)
                .map(|(_, call)| *call)
                .collect();
            prop_assert_eq!(calls.iter().filter(|call| **call == Call::Finish).count(), 1);
            prop_assert_eq!(calls.last(), Some(&Call::Finish));
            prop_assert!(calls.iter().filter(|call| **call == Call::Activate).count() <= 1);
            if calls.contains(&Call::Update) {
                prop_assert_eq!(calls.first(), Some(&Call::Activate));
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn windows_hold_only_retained_units_before_the_beat(
        capacity in 1usize..64,
        count in 0u64..200,
        beat in 0.0f64..25.0,
        len in 0usize..80,
    ) {
        let mut ring = RingBuffer::with_capacity(capacity);
        for index in 0..count {
            ring.write(index, index as f64 / 10.0);
        }

        match ring.window_before(beat, len) {
            Ok(span) => {
                let oldest = ring.oldest_index().expect("non-empty ring has an oldest unit");
                prop_assert_eq!(span.requested, len);
                prop_assert!(span.len <= len);
                prop_assert!(span.first >= oldest);
                for index in span.first..span.first + span.len as u64 {
                    let tag = ring.beat_of(index).expect("span units are retained");
                    prop_assert!(tag < beat);
                }
                let next = span.first + span.len as u64;
                if let Ok(tag) = ring.beat_of(next) {
                    prop_assert!(tag >= beat || span.len == len);
                }
            }
            Err(BufferError::Empty) => prop_assert_eq!(count, 0),
            Err(BufferError::OutOfWindow { oldest, .. }) => {
                prop_assert!(len > 0);
                let tag = ring.beat_of(oldest).expect("oldest unit is retained");
                prop_assert!(tag >= beat);
            }
        }
    }
}
