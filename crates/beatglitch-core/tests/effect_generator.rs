use beatglitch_core::{
    ActionEvent, ActionId, ActionKind, ClockSnapshot, CountBounds, EffectGenerator, Engine,
    EngineEvent, GeneratorSettings, PerformanceConfig, Retirement, SampleBank, SamplePair,
    fixtures::{RampSource, ramp_config},
};
use crossbeam_channel::Receiver;

const BPM: f64 = 120.0;

fn generator_config(rest_probability: f64) -> PerformanceConfig {
    let mut config = ramp_config();
    config.generator.span_beats = 16.0;
    config.generator.target_effects = 4;
    config.generator.rest_probability = rest_probability;
    config.generator.rewind_probability = 0.5;
    config
}

fn two_pair_bank() -> SampleBank {
    let mut bank = SampleBank::new(64);
    bank.push(SamplePair::from_forward("ramp", 64, vec![0.5; 64]));
    bank
}

fn render(engine: &mut Engine, ramp: &mut RampSource, from: u32, to: u32) {
    let mut input = [0.0_f32; 8];
    let mut output = [0.0_f32; 8];
    for block in from..to {
        ramp.fill(&mut input);
        engine.process_audio_block(
            ClockSnapshot::new(f64::from(block) * 0.25, BPM),
            Some(&input),
            &mut output,
        );
    }
}

/// `(child, kind, at_beat)` for every child the generator committed to.
fn scheduled_children(receiver: &Receiver<EngineEvent>) -> Vec<(ActionId, ActionKind, f64)> {
    receiver
        .try_iter()
        .filter_map(|event| match event {
            EngineEvent::Action(ActionEvent::EffectScheduled {
                child,
                kind,
                at_beat,
                ..
            }) => Some((child, kind, at_beat)),
            _ => None,
        })
        .collect()
}

#[test]
fn generator_schedules_its_target_count_one_at_a_time() {
    let mut engine = Engine::with_bank(&generator_config(0.0), two_pair_bank());
    let mut ramp = RampSource::default();
    let receiver = engine.subscribe();
    let generator = engine
        .schedule_generator(1.0)
        .expect("generator should schedule");

    render(&mut engine, &mut ramp, 0, 80);

    let children = scheduled_children(&receiver);
    assert_eq!(children.len(), 4);
    assert_eq!(children[0].2, 2.0);
    for (index, (_, kind, at_beat)) in children.iter().enumerate() {
        assert!(matches!(kind, ActionKind::Stutter | ActionKind::Rewind));
        assert_eq!(at_beat.fract(), 0.0, "children start on whole beats");
        assert!(*at_beat <= 2.0 + 3.0 * index as f64);
    }
    for pair in children.windows(2) {
        assert!(pair[1].2 > pair[0].2);
    }

    assert!(engine.scheduler().is_empty());
    assert!(engine.scheduler().state(generator).is_none());
    assert_eq!(engine.stats().generator_effects, 4);
    assert_eq!(engine.stats().completed, 5);
    assert_eq!(engine.selected_sample(), 0, "four rotations over two pairs");
}

#[test]
fn children_never_overlap() {
    let mut engine = Engine::with_bank(&generator_config(0.0), two_pair_bank());
    let mut ramp = RampSource::default();
    let receiver = engine.subscribe();
    engine
        .schedule_generator(1.0)
        .expect("generator should schedule");
    render(&mut engine, &mut ramp, 0, 80);

    let mut live = 0_i32;
    let mut peak = 0_i32;
    for event in receiver.try_iter() {
        match event {
            EngineEvent::Activated { .. } => {
                live += 1;
                peak = peak.max(live);
            }
            EngineEvent::Retired { .. } => live -= 1,
            _ => {}
        }
    }
    assert_eq!(live, 0);
    assert_eq!(peak, 2, "the generator plus one child");
    assert_eq!(engine.stats().preempted, 0);
}

#[test]
fn resting_generator_schedules_nothing_and_ends_with_its_span() {
    let mut engine = Engine::new(&generator_config(1.0));
    let mut ramp = RampSource::default();
    let receiver = engine.subscribe();
    let generator = engine
        .schedule_generator(1.0)
        .expect("generator should schedule");
    render(&mut engine, &mut ramp, 0, 72);

    let events: Vec<EngineEvent> = receiver.try_iter().collect();
    assert!(events.iter().all(|event| !matches!(
        event,
        EngineEvent::Action(ActionEvent::EffectScheduled { .. })
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        EngineEvent::Retired { id, beat, reason: Retirement::Completed, .. }
            if *id == generator && *beat == 17.0
    )));
}

#[test]
fn cancelling_the_generator_cancels_its_live_child() {
    let mut config = generator_config(0.0);
    config.generator.rewind_probability = 0.0;
    config.random.stutter_times = CountBounds::new(64, 64);
    let mut engine = Engine::with_bank(&config, two_pair_bank());
    let mut ramp = RampSource::default();
    let receiver = engine.subscribe();
    let generator = engine
        .schedule_generator(1.0)
        .expect("generator should schedule");

    render(&mut engine, &mut ramp, 0, 9);
    let children = scheduled_children(&receiver);
    assert_eq!(children.len(), 1);
    let child = children[0].0;
    assert!(engine.scheduler().state(child).is_some());

    assert!(engine.cancel(generator));
    render(&mut engine, &mut ramp, 9, 10);

    assert!(engine.scheduler().is_empty());
    assert_eq!(engine.stats().cancelled, 2);
}

#[test]
fn same_seed_makes_the_same_choices() {
    let run = || {
        let mut engine = Engine::with_bank(&generator_config(0.25), two_pair_bank());
        let mut ramp = RampSource::default();
        let receiver = engine.subscribe();
        engine
            .schedule_generator(1.0)
            .expect("generator should schedule");
        render(&mut engine, &mut ramp, 0, 80);
        scheduled_children(&receiver)
            .into_iter()
            .map(|(_, kind, at_beat)| (kind, at_beat))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn out_of_range_chances_never_reach_the_rng() {
    let generator = EffectGenerator::new(GeneratorSettings {
        span_beats: 16.0,
        target_effects: 4,
        rest_probability: 1.5,
        rewind_probability: f64::NAN,
        ..GeneratorSettings::default()
    });
    assert_eq!(generator.settings().rest_probability, 1.0);
    assert_eq!(generator.settings().rewind_probability, 0.0);

    let mut engine = Engine::new(&generator_config(0.0));
    let mut ramp = RampSource::default();
    let id = engine
        .schedule(Box::new(generator), 1.0)
        .expect("generator should schedule");
    render(&mut engine, &mut ramp, 0, 72);

    assert!(engine.scheduler().state(id).is_none());
    assert_eq!(engine.stats().generator_effects, 0);
}

#[test]
fn nan_rest_chance_from_config_schedules_children() {
    let parsed = PerformanceConfig::from_toml_str("[generator]\nrest_probability = nan\n")
        .expect("config should load");
    let mut config = generator_config(1.0);
    config.generator.rest_probability = parsed.generator.rest_probability;
    let mut engine = Engine::with_bank(&config, two_pair_bank());
    let mut ramp = RampSource::default();
    let receiver = engine.subscribe();
    engine
        .schedule_generator(1.0)
        .expect("generator should schedule");

    render(&mut engine, &mut ramp, 0, 80);
    assert_eq!(scheduled_children(&receiver).len(), 4);
}
