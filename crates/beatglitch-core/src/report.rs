use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::engine::EngineStats;

const SESSION_SCHEMA_VERSION: u32 = 1;

/// Summary of a headless performance, stable enough to diff between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionReport {
    pub schema_version: u32,
    pub seed: Option<u64>,
    pub sample_rate: u32,
    pub beats_per_minute: f64,
    pub beats: f64,
    pub audio_frames: usize,
    pub stats: EngineStats,
    pub audio_hash: String,
}

impl SessionReport {
    #[must_use]
    pub fn new(
        seed: Option<u64>,
        sample_rate: u32,
        beats_per_minute: f64,
        beats: f64,
        stats: EngineStats,
        audio: &[f32],
    ) -> Self {
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            seed,
            sample_rate,
            beats_per_minute,
            beats,
            audio_frames: audio.len(),
            stats,
            audio_hash: audio_hash(audio),
        }
    }
}

/// SHA-256 over the output quantised to 16-bit little-endian PCM.
#[must_use]
pub fn audio_hash(samples: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for sample in samples {
        hasher.update(quantize(*sample).to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Writes through a temp file in the target directory, then renames over `path`.
#[instrument(skip(report), fields(path = %path.display()))]
pub fn write_session_report(path: &Path, report: &SessionReport) -> Result<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create report directory: {}", parent.display()))?;

    let json =
        serde_json::to_vec_pretty(report).context("failed to encode session report json")?;
    let mut temp_file = tempfile::NamedTempFile::new_in(&parent)
        .context("failed to create temp session report file")?;
    temp_file
        .write_all(&json)
        .context("failed to write temp session report file")?;
    temp_file
        .persist(path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist session report: {}", path.display()))?;

    info!(audio_hash = %report.audio_hash, "session report written");
    Ok(())
}

pub fn read_session_report(path: &Path) -> Result<SessionReport> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read session report: {}", path.display()))?;
    let report: SessionReport =
        serde_json::from_slice(&bytes).context("failed to parse session report json")?;
    Ok(report)
}

/// Mono 16-bit PCM.
#[instrument(skip(samples), fields(path = %path.display(), frames = samples.len()))]
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(&parent).with_context(|| {
        format!(
            "failed to create wav output directory: {}",
            parent.display()
        )
    })?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create wav file: {}", path.display()))?;
    for sample in samples {
        writer
            .write_sample(quantize(*sample))
            .context("failed to write wav sample")?;
    }
    writer.finalize().context("failed to finalize wav file")?;

    info!("wav written");
    Ok(())
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_differences_below_quantisation() {
        assert_eq!(audio_hash(&[0.5, -0.25]), audio_hash(&[0.500_001, -0.25]));
        assert_ne!(audio_hash(&[0.5, -0.25]), audio_hash(&[-0.25, 0.5]));
    }

    #[test]
    fn out_of_range_samples_are_clipped() {
        assert_eq!(quantize(4.0), i16::MAX);
        assert_eq!(quantize(-4.0), -i16::MAX);
    }
}
