use std::path::PathBuf;

use anyhow::Context;
use beatglitch_core::{
    PerformanceConfig, SampleBank, ScriptedTrigger, SessionPlan, TempoChange,
    diagnostics::{TelemetryOptions, init_tracing_with_options},
    report::{write_session_report, write_wav},
    run_session, scan_sample_pairs,
};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "beatglitch-cli")]
#[command(about = "Headless tools for beatglitch performances and sample banks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file; defaults to discovery via BEATGLITCH_CONFIG_PATH or the cwd.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log to the trace file only.
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Runs a seeded performance against a synthetic tone and renders it to WAV.
    Simulate {
        #[arg(long, default_value_t = 16.0)]
        beats: f64,

        /// Effects to fire, e.g. `stutter@4`, `rewind@8`, `generator@12`.
        #[arg(long = "trigger")]
        triggers: Vec<ScriptedTrigger>,

        /// Tempo changes as `<beat>:<bpm>`.
        #[arg(long = "tempo", value_parser = parse_tempo_change)]
        tempo_changes: Vec<TempoChange>,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long, default_value_t = 220.0)]
        tone_hz: f64,

        /// Load sample pairs from the configured sample directory.
        #[arg(long)]
        with_samples: bool,

        #[arg(long, default_value = "data/renders/session.wav")]
        output: PathBuf,

        #[arg(long, default_value = "data/renders/session.report.json")]
        report: PathBuf,
    },
    /// Lists the sample pairs found in a directory.
    ScanSamples {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn parse_tempo_change(value: &str) -> Result<TempoChange, String> {
    let (beat, bpm) = value
        .split_once(':')
        .ok_or_else(|| format!("expected <beat>:<bpm>, got {value:?}"))?;
    let at_beat = beat
        .trim()
        .parse::<f64>()
        .map_err(|error| format!("invalid beat {beat:?}: {error}"))?;
    let bpm = bpm
        .trim()
        .parse::<f64>()
        .map_err(|error| format!("invalid bpm {bpm:?}: {error}"))?;
    Ok(TempoChange { at_beat, bpm })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => PerformanceConfig::from_path(path)?,
        None => PerformanceConfig::load_or_default()?,
    };
    let mut telemetry = TelemetryOptions::from_config(&config.diagnostics);
    if let Some(log_dir) = &cli.log_dir {
        telemetry.log_dir = log_dir.clone();
    }
    telemetry.stdout = !cli.quiet;
    let _telemetry = init_tracing_with_options(&telemetry)?;

    match cli.command {
        Commands::Simulate {
            beats,
            triggers,
            tempo_changes,
            seed,
            tone_hz,
            with_samples,
            output,
            report,
        } => {
            if seed.is_some() {
                config.seed = seed;
            }
            let bank = if with_samples {
                SampleBank::load_directory(&config.samples.directory, config.audio.sample_rate)?
            } else {
                SampleBank::new(config.audio.sample_rate)
            };
            let plan = SessionPlan {
                beats,
                tone_hz,
                triggers,
                tempo_changes,
                ..SessionPlan::default()
            };

            let session =
                run_session(&config, bank, &plan).context("headless session failed")?;
            write_wav(&output, &session.audio, config.audio.sample_rate)?;
            write_session_report(&report, &session.report)?;
            tracing::info!(
                wav = %output.display(),
                report = %report.display(),
                audio_hash = %session.report.audio_hash,
                "simulation rendered"
            );
        }
        Commands::ScanSamples { dir } => {
            let dir = dir.unwrap_or_else(|| config.samples.directory.clone());
            let pairs = scan_sample_pairs(&dir)?;
            for pair in &pairs {
                let backward = pair.backward_path.as_deref().unwrap_or("<reversed forward>");
                println!("{}\t{}\t{}", pair.name, pair.forward_path, backward);
            }
            tracing::info!(count = pairs.len(), dir = %dir.display(), "sample scan complete");
        }
    }

    Ok(())
}
