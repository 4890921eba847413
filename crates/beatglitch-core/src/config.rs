use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "beatglitch.config.toml";
pub const CONFIG_PATH_ENV: &str = "BEATGLITCH_CONFIG_PATH";

/// Inclusive `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    /// Range for chances fed to the RNG. NaN clamps to never.
    pub const PROBABILITY: Bounds = Bounds::new(0.0, 1.0);

    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        let bounds = self.normalized();
        if value.is_nan() {
            return bounds.min;
        }
        value.clamp(bounds.min, bounds.max)
    }

    /// Swaps inverted ends so sampling never sees an empty range.
    #[must_use]
    pub fn normalized(&self) -> Self {
        if self.min <= self.max {
            *self
        } else {
            Self::new(self.max, self.min)
        }
    }

    /// Narrows to `within`, keeping at least the single point `within.min`.
    #[must_use]
    pub fn intersect(&self, within: Bounds) -> Self {
        let within = within.normalized();
        let own = self.normalized();
        let min = within.clamp(own.min);
        let max = within.clamp(own.max).max(min);
        Self::new(min, max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountBounds {
    pub min: u32,
    pub max: u32,
}

impl CountBounds {
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn clamp(&self, value: u32) -> u32 {
        let (min, max) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        value.clamp(min, max)
    }
}

/// Live-tunable performance parameters. Values outside their documented range
/// are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub beats_per_minute: f64,
    pub stutter_times: u32,
    pub record_length_beats: f64,
    pub stutter_length_beats: f64,
    pub stutter_delay_beats: f64,
    pub rewind_length_beats: f64,
}

impl Parameters {
    pub const BEATS_PER_MINUTE: Bounds = Bounds::new(20.0, 480.0);
    pub const STUTTER_TIMES: CountBounds = CountBounds::new(1, 64);
    pub const RECORD_LENGTH_BEATS: Bounds = Bounds::new(0.025, 4.0);
    pub const STUTTER_LENGTH_BEATS: Bounds = Bounds::new(0.025, 4.0);
    pub const STUTTER_DELAY_BEATS: Bounds = Bounds::new(0.0, 8.0);
    pub const REWIND_LENGTH_BEATS: Bounds = Bounds::new(0.025, 8.0);

    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            beats_per_minute: Self::BEATS_PER_MINUTE.clamp(self.beats_per_minute),
            stutter_times: Self::STUTTER_TIMES.clamp(self.stutter_times),
            record_length_beats: Self::RECORD_LENGTH_BEATS.clamp(self.record_length_beats),
            stutter_length_beats: Self::STUTTER_LENGTH_BEATS.clamp(self.stutter_length_beats),
            stutter_delay_beats: Self::STUTTER_DELAY_BEATS.clamp(self.stutter_delay_beats),
            rewind_length_beats: Self::REWIND_LENGTH_BEATS.clamp(self.rewind_length_beats),
        }
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            beats_per_minute: 60.0,
            stutter_times: 4,
            record_length_beats: 0.25,
            stutter_length_beats: 0.25,
            stutter_delay_beats: 0.0,
            rewind_length_beats: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Fixed seed for effect randomness; `None` seeds from the OS.
    pub seed: Option<u64>,
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub buffer: BufferConfig,
    pub parameters: Parameters,
    pub random: RandomConfig,
    pub generator: GeneratorConfig,
    pub samples: SamplesConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub live_gain: f32,
    pub deck_gain: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,
    pub frame_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub max_window_beats: f64,
    pub min_supported_bpm: f64,
}

/// Ranges used by the `make_random` constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomConfig {
    pub stutter_length_beats: Bounds,
    pub stutter_times: CountBounds,
    pub rewind_length_beats: Bounds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub span_beats: f64,
    pub target_effects: u32,
    pub rest_probability: f64,
    pub rewind_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplesConfig {
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub log_dir: PathBuf,
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
    pub event_capacity: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            seed: None,
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
            buffer: BufferConfig::default(),
            parameters: Parameters::default(),
            random: RandomConfig::default(),
            generator: GeneratorConfig::default(),
            samples: SamplesConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 512,
            live_gain: 1.0,
            deck_gain: 1.0,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_rate: 60.0,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_window_beats: 8.0,
            min_supported_bpm: 60.0,
        }
    }
}

impl Default for RandomConfig {
    fn default() -> Self {
        Self {
            stutter_length_beats: Bounds::new(0.125, 0.5),
            stutter_times: CountBounds::new(2, 8),
            rewind_length_beats: Bounds::new(0.5, 2.0),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            span_beats: 32.0,
            target_effects: 16,
            rest_probability: 0.25,
            rewind_probability: 0.5,
        }
    }
}

impl Default for SamplesConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data/samples"),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            rust_log_filter: "info,beatglitch_core=debug".to_string(),
            trace_file_prefix: "beatglitch".to_string(),
            event_capacity: 256,
        }
    }
}

impl PerformanceConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::from_path(&config_path)
    }

    /// Like [`PerformanceConfig::load`], but a missing file yields defaults.
    /// A file that exists and fails to parse is still an error.
    pub fn load_or_default() -> Result<Self> {
        match discover_config_path() {
            Ok(path) => Self::from_path(&path),
            Err(_) => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: PerformanceConfig = toml::from_str(content)?;
        config.parameters = config.parameters.clamped();
        config.audio.sample_rate = config.audio.sample_rate.max(1);
        config.audio.block_size = config.audio.block_size.max(1);
        config.video.frame_rate = config.video.frame_rate.max(1.0);
        config.buffer.min_supported_bpm =
            Parameters::BEATS_PER_MINUTE.clamp(config.buffer.min_supported_bpm);
        config.generator.rest_probability =
            Bounds::PROBABILITY.clamp(config.generator.rest_probability);
        config.generator.rewind_probability =
            Bounds::PROBABILITY.clamp(config.generator.rewind_probability);
        Ok(config)
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}
