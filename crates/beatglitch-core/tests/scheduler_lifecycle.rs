use std::sync::Arc;

use beatglitch_core::{
    ActionId, ActionKind, ActionState, BeatAction, ChannelSet, OutputChannel, Progress,
    ReadPosition, Retirement, ScheduleError, Scheduler, Source, StutterEffect, StutterSettings,
    Targets, TickContext, fixtures::SchedulerHarness,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Activate { anchor: f64, beat: f64 },
    Update { beat: f64 },
    Finish { beat: f64 },
}

type Log = Arc<Mutex<Vec<Call>>>;

/// Runs until `length` beats after its anchor and records every callback.
struct Probe {
    id: ActionId,
    channels: ChannelSet,
    length: f64,
    anchor: f64,
    log: Log,
}

impl Probe {
    fn new(channels: ChannelSet, length: f64) -> (Self, Log) {
        let log = Log::default();
        let probe = Self {
            id: ActionId::new(),
            channels,
            length,
            anchor: 0.0,
            log: Arc::clone(&log),
        };
        (probe, log)
    }
}

impl BeatAction for Probe {
    fn id(&self) -> ActionId {
        self.id
    }

    fn channels(&self) -> ChannelSet {
        self.channels
    }

    fn activate(&mut self, anchor_beat: f64, ctx: &mut TickContext<'_>) {
        self.anchor = anchor_beat;
        self.log.lock().push(Call::Activate {
            anchor: anchor_beat,
            beat: ctx.beat(),
        });
    }

    fn update(&mut self, ctx: &mut TickContext<'_>) -> Progress {
        self.log.lock().push(Call::Update { beat: ctx.beat() });
        if ctx.beat() >= self.anchor + self.length {
            Progress::Complete
        } else {
            Progress::Running
        }
    }

    fn finish(&mut self, ctx: &mut TickContext<'_>) {
        self.log.lock().push(Call::Finish { beat: ctx.beat() });
    }
}

/// Spawns one child at a fixed beat on its first update and records the result.
struct Spawner {
    id: ActionId,
    child_at: f64,
    result: Arc<Mutex<Option<Result<ActionId, ScheduleError>>>>,
}

impl BeatAction for Spawner {
    fn id(&self) -> ActionId {
        self.id
    }

    fn activate(&mut self, _anchor_beat: f64, _ctx: &mut TickContext<'_>) {}

    fn update(&mut self, ctx: &mut TickContext<'_>) -> Progress {
        let (child, _) = Probe::new(ChannelSet::NONE, 1.0);
        let spawned = ctx.spawn(Box::new(child), self.child_at);
        *self.result.lock() = Some(spawned);
        Progress::Complete
    }
}

#[test]
fn action_runs_activate_update_finish_exactly_once_each() {
    let mut harness = SchedulerHarness::new(1);
    let mut scheduler = Scheduler::new();
    let (probe, log) = Probe::new(ChannelSet::AUDIO, 1.0);
    let id = scheduler
        .schedule(Box::new(probe), 2.0)
        .expect("scheduling should succeed");

    for step in 0..16 {
        let beat = f64::from(step) * 0.25;
        harness.advance(&mut scheduler, beat);
        if beat < 2.0 {
            assert_eq!(scheduler.state(id), Some(ActionState::Scheduled));
        }
    }

    let log = log.lock();
    assert_eq!(
        log.first(),
        Some(&Call::Activate {
            anchor: 2.0,
            beat: 2.0
        })
    );
    assert_eq!(
        log.iter()
            .filter(|call| matches!(call, Call::Activate { .. }))
            .count(),
        1
    );
    assert_eq!(
        log.iter()
            .filter(|call| matches!(call, Call::Finish { .. }))
            .count(),
        1
    );
    assert_eq!(log.last(), Some(&Call::Finish { beat: 3.0 }));

    let updates: Vec<f64> = log
        .iter()
        .filter_map(|call| match call {
            Call::Update { beat } => Some(*beat),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![2.0, 2.25, 2.5, 2.75, 3.0]);
    assert_eq!(scheduler.state(id), None);
    assert!(scheduler.is_empty());
}

#[test]
fn duplicate_and_invalid_schedules_are_rejected() {
    let mut scheduler = Scheduler::new();
    let (probe, _) = Probe::new(ChannelSet::NONE, 1.0);
    let id = probe.id;
    let twin = Probe {
        id,
        channels: ChannelSet::NONE,
        length: 1.0,
        anchor: 0.0,
        log: Log::default(),
    };

    scheduler
        .schedule(Box::new(probe), 1.0)
        .expect("first schedule should succeed");
    assert_eq!(
        scheduler.schedule(Box::new(twin), 2.0),
        Err(ScheduleError::Duplicate(id))
    );

    let (nan, _) = Probe::new(ChannelSet::NONE, 1.0);
    assert!(matches!(
        scheduler.schedule(Box::new(nan), f64::NAN),
        Err(ScheduleError::InvalidBeat(_))
    ));
    let (negative, _) = Probe::new(ChannelSet::NONE, 1.0);
    assert_eq!(
        scheduler.schedule(Box::new(negative), -1.0),
        Err(ScheduleError::InvalidBeat(-1.0))
    );
    assert_eq!(scheduler.len(), 1);
}

#[test]
fn past_schedules_activate_on_the_next_tick_at_that_tick() {
    let mut harness = SchedulerHarness::new(2);
    let mut scheduler = Scheduler::new();
    harness.advance(&mut scheduler, 5.0);

    let (probe, log) = Probe::new(ChannelSet::NONE, 0.5);
    scheduler
        .schedule(Box::new(probe), 2.0)
        .expect("past beats are accepted");
    let report = harness.advance(&mut scheduler, 5.25);

    assert_eq!(report.activated.len(), 1);
    assert_eq!(
        log.lock().first(),
        Some(&Call::Activate {
            anchor: 5.25,
            beat: 5.25
        })
    );
}

#[test]
fn start_between_ticks_anchors_at_the_scheduled_beat() {
    let mut harness = SchedulerHarness::new(3);
    let mut scheduler = Scheduler::new();
    let (probe, log) = Probe::new(ChannelSet::NONE, 1.0);
    scheduler
        .schedule(Box::new(probe), 1.1)
        .expect("scheduling should succeed");

    harness.advance(&mut scheduler, 1.0);
    harness.advance(&mut scheduler, 1.25);
    assert_eq!(
        log.lock().first(),
        Some(&Call::Activate {
            anchor: 1.1,
            beat: 1.25
        })
    );
}

#[test]
fn newer_effect_preempts_older_on_a_shared_channel() {
    let mut harness = SchedulerHarness::new(4);
    let mut scheduler = Scheduler::new();
    let (first, first_log) = Probe::new(ChannelSet::ALL, 8.0);
    let (second, _) = Probe::new(ChannelSet::AUDIO, 8.0);
    let (visual, _) = Probe::new(ChannelSet::VIDEO, 8.0);
    let first = scheduler
        .schedule(Box::new(first), 1.0)
        .expect("first should schedule");
    let second = scheduler
        .schedule(Box::new(second), 2.0)
        .expect("second should schedule");

    harness.advance(&mut scheduler, 1.0);
    assert_eq!(
        scheduler.active_on(OutputChannel::Video).map(|action| action.id()),
        Some(first)
    );

    let report = harness.advance(&mut scheduler, 2.0);
    assert_eq!(report.retired.len(), 1);
    assert_eq!(report.retired[0].id, first);
    assert_eq!(report.retired[0].reason, Retirement::Preempted);
    assert!(
        first_log
            .lock()
            .iter()
            .any(|call| matches!(call, Call::Finish { beat } if *beat == 2.0))
    );
    assert_eq!(
        scheduler.active_on(OutputChannel::Audio).map(|action| action.id()),
        Some(second)
    );
    assert!(scheduler.active_on(OutputChannel::Video).is_none());

    let visual = scheduler
        .schedule(Box::new(visual), 3.0)
        .expect("visual should schedule");
    let report = harness.advance(&mut scheduler, 3.0);
    assert!(report.retired.is_empty());
    assert_eq!(
        scheduler.active_on(OutputChannel::Audio).map(|action| action.id()),
        Some(second)
    );
    assert_eq!(
        scheduler.active_on(OutputChannel::Video).map(|action| action.id()),
        Some(visual)
    );
}

#[test]
fn simultaneous_starts_keep_the_later_insertion() {
    let mut harness = SchedulerHarness::new(5);
    let mut scheduler = Scheduler::new();
    let (early, _) = Probe::new(ChannelSet::AUDIO, 4.0);
    let (late, _) = Probe::new(ChannelSet::AUDIO, 4.0);
    let early = scheduler
        .schedule(Box::new(early), 1.0)
        .expect("early should schedule");
    let late = scheduler
        .schedule(Box::new(late), 1.0)
        .expect("late should schedule");

    let report = harness.advance(&mut scheduler, 1.0);
    assert_eq!(report.activated, vec![early, late]);
    assert_eq!(report.retired.len(), 1);
    assert_eq!(report.retired[0].id, early);
    assert_eq!(
        scheduler.active_on(OutputChannel::Audio).map(|action| action.id()),
        Some(late)
    );
}

#[test]
fn cancelled_actions_finish_on_the_next_advance() {
    let mut harness = SchedulerHarness::new(6);
    let mut scheduler = Scheduler::new();
    let (probe, log) = Probe::new(ChannelSet::AUDIO, 8.0);
    let id = scheduler
        .schedule(Box::new(probe), 0.0)
        .expect("scheduling should succeed");
    harness.advance(&mut scheduler, 0.0);

    assert!(scheduler.cancel(id));
    assert!(!scheduler.cancel(id));
    assert_eq!(scheduler.state(id), Some(ActionState::Done));
    assert!(scheduler.active_on(OutputChannel::Audio).is_none());

    let report = harness.advance(&mut scheduler, 0.25);
    assert_eq!(report.retired[0].reason, Retirement::Cancelled);
    assert_eq!(log.lock().last(), Some(&Call::Finish { beat: 0.25 }));
    assert!(scheduler.is_empty());
}

#[test]
fn clock_running_backwards_holds_the_last_beat() {
    let mut harness = SchedulerHarness::new(7);
    let mut scheduler = Scheduler::new();
    harness.advance(&mut scheduler, 4.0);
    let report = harness.advance(&mut scheduler, 3.5);
    assert_eq!(report.beat, 4.0);
    assert_eq!(scheduler.last_beat(), Some(4.0));
}

#[test]
fn spawns_into_the_past_are_refused() {
    let mut harness = SchedulerHarness::new(8);
    let mut scheduler = Scheduler::new();
    let result = Arc::new(Mutex::new(None));
    scheduler
        .schedule(
            Box::new(Spawner {
                id: ActionId::new(),
                child_at: 1.5,
                result: Arc::clone(&result),
            }),
            2.0,
        )
        .expect("spawner should schedule");

    let report = harness.advance(&mut scheduler, 2.0);
    assert_eq!(
        *result.lock(),
        Some(Err(ScheduleError::Retroactive {
            at_beat: 1.5,
            now: 2.0
        }))
    );
    assert!(report.spawned.is_empty());
    assert!(scheduler.is_empty());
}

#[test]
fn spawned_children_join_the_schedule_after_the_tick() {
    let mut harness = SchedulerHarness::new(9);
    let mut scheduler = Scheduler::new();
    let result = Arc::new(Mutex::new(None));
    scheduler
        .schedule(
            Box::new(Spawner {
                id: ActionId::new(),
                child_at: 3.0,
                result: Arc::clone(&result),
            }),
            2.0,
        )
        .expect("spawner should schedule");

    let report = harness.advance(&mut scheduler, 2.0);
    let child = result
        .lock()
        .clone()
        .expect("spawner should have run")
        .expect("future spawn should be accepted");
    assert_eq!(report.spawned, vec![child]);
    assert_eq!(scheduler.state(child), Some(ActionState::Scheduled));
    assert_eq!(scheduler.scheduled_beat(child), Some(3.0));
    assert!(report.retired.iter().all(|retired| retired.kind == ActionKind::Custom));
}

#[test]
fn delayed_stutter_resolves_once_its_material_is_captured() {
    let mut harness = SchedulerHarness::new(10);
    let mut scheduler = Scheduler::new();
    let stutter = StutterEffect::new(StutterSettings {
        record_length_beats: 0.25,
        stutter_length_beats: 0.25,
        delay_beats: 0.5,
        times: 2,
        targets: Targets {
            channels: ChannelSet::AUDIO,
            deck: false,
        },
    });
    scheduler
        .schedule(Box::new(stutter), 2.0)
        .expect("stutter should schedule");

    harness.capture_until(2.0);
    harness.advance(&mut scheduler, 2.0);
    let active = scheduler
        .active_on(OutputChannel::Audio)
        .expect("stutter is active");
    assert_eq!(active.read_position(Source::Audio, 2.5), None);

    harness.capture_until(2.5);
    harness.advance(&mut scheduler, 2.25);
    let active = scheduler
        .active_on(OutputChannel::Audio)
        .expect("stutter is active");
    assert_eq!(active.read_position(Source::Audio, 2.25), None);
    assert_eq!(
        active.read_position(Source::Audio, 2.5),
        Some(ReadPosition::Ring(72))
    );
    assert_eq!(
        active.read_position(Source::Audio, 2.75),
        Some(ReadPosition::Ring(72))
    );
}
