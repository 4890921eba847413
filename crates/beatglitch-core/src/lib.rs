pub mod action;
pub mod assets;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod deck;
pub mod diagnostics;
pub mod effects;
pub mod engine;
pub mod fixtures;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod time;

pub use action::{
    ActionEvent, ActionId, ActionKind, ActionState, BeatAction, ChannelSet, Media, OutputChannel,
    Progress, ReadPosition, Retirement, Source, TickContext,
};
pub use assets::{
    DecodedAudio, SampleBank, SamplePair, SamplePairEntry, decode_audio_file_mono,
    load_sample_pair, scan_sample_pairs,
};
pub use buffer::{BufferError, RingBuffer, RingIndex, SharedRingBuffer, Span};
pub use clock::{ClockSnapshot, ManualClock, SimulatedClock, TempoClock};
pub use config::{Bounds, CountBounds, Parameters, PerformanceConfig};
pub use cursor::{Direction, PlaybackCursor, Step};
pub use deck::{Deck, DeckView};
pub use diagnostics::{
    TelemetryGuard, TelemetryOptions, init_tracing, init_tracing_from_config,
    init_tracing_with_options,
};
pub use effects::{
    EffectGenerator, GeneratorSettings, RewindEffect, RewindSettings, StutterEffect,
    StutterSettings, Targets,
};
pub use engine::{Engine, EngineError, EngineEvent, EngineStats, Frame, Trigger};
pub use report::{SessionReport, audio_hash, read_session_report, write_session_report};
pub use scheduler::{RetiredAction, ScheduleError, Scheduler, Tick, TickReport};
pub use session::{ScriptedTrigger, SessionPlan, SessionOutput, TempoChange, run_session};
