use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use symphonia::core::{
    audio::{AudioBufferRef, SampleBuffer},
    codecs::{CodecParameters, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

const FORWARD_SUFFIX: &str = "-forwards";
const BACKWARD_SUFFIX: &str = "-backwards";
const AUDIO_EXTENSIONS: [&str; 8] = ["wav", "flac", "mp3", "ogg", "m4a", "aiff", "aif", "caf"];
pub const SILENCE_NAME: &str = "silence";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

/// A pre-recorded sample and its reversed rendition.
///
/// The two takes are usually rendered separately, so their lengths may differ
/// by a few samples; index math mirrors against the backward take's own length.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePair {
    pub name: String,
    pub sample_rate: u32,
    pub forward: Vec<f32>,
    pub backward: Vec<f32>,
}

impl SamplePair {
    #[must_use]
    pub fn silence(sample_rate: u32) -> Self {
        Self {
            name: SILENCE_NAME.to_string(),
            sample_rate,
            forward: Vec::new(),
            backward: Vec::new(),
        }
    }

    /// Builds the backward take by reversing `forward`.
    #[must_use]
    pub fn from_forward(name: impl Into<String>, sample_rate: u32, forward: Vec<f32>) -> Self {
        let backward = forward.iter().rev().copied().collect();
        Self {
            name: name.into(),
            sample_rate,
            forward,
            backward,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Index into `backward` that plays the same material as `forward_index`.
    #[must_use]
    pub fn mirror_index(&self, forward_index: usize) -> Option<usize> {
        let len = self.backward.len();
        if len == 0 {
            return None;
        }
        Some(len - 1 - forward_index % len)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SamplePairEntry {
    pub name: String,
    pub forward_path: String,
    pub backward_path: Option<String>,
}

/// Loaded sample pairs. Index 0 is always silence.
#[derive(Debug, Clone)]
pub struct SampleBank {
    pairs: Vec<Arc<SamplePair>>,
}

impl SampleBank {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            pairs: vec![Arc::new(SamplePair::silence(sample_rate))],
        }
    }

    #[instrument(fields(directory = %directory.display(), sample_rate))]
    pub fn load_directory(directory: &Path, sample_rate: u32) -> Result<Self> {
        let mut bank = Self::new(sample_rate);
        for entry in scan_sample_pairs(directory)? {
            match load_sample_pair(&entry) {
                Ok(pair) => {
                    if pair.sample_rate != sample_rate {
                        warn!(
                            name = %pair.name,
                            pair_rate = pair.sample_rate,
                            sample_rate,
                            "sample pair rate differs from output rate, playing unresampled"
                        );
                    }
                    bank.push(pair);
                }
                Err(error) => {
                    warn!(name = %entry.name, ?error, "skipping unreadable sample pair");
                }
            }
        }

        info!(pairs = bank.len(), "sample bank loaded");
        Ok(bank)
    }

    pub fn push(&mut self, pair: SamplePair) {
        self.pairs.push(Arc::new(pair));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Arc<SamplePair>> {
        self.pairs.get(index).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|pair| pair.name.as_str())
    }
}

/// Decodes any symphonia-supported file and downmixes it to one channel.
#[instrument(fields(path = %path.display()))]
pub fn decode_audio_file_mono(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|value| value.to_str()) {
        hint.with_extension(extension);
    }

    let mut format = symphonia::default::get_probe()
        .format(
            &hint,
            MediaSourceStream::new(Box::new(file), Default::default()),
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("unrecognised audio container: {}", path.display()))?
        .format;
    let track = format
        .default_track()
        .with_context(|| format!("no default audio track in {}", path.display()))?;
    let track_id = track.id;
    let mut downmix = Downmix::for_track(&track.codec_params);
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed reading packets from {}", path.display()));
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(buffer) => downmix.push(buffer),
            // A corrupt packet costs its frames, not the whole take.
            Err(SymphoniaError::DecodeError(reason)) => {
                downmix.skipped_packets += 1;
                debug!(reason, "skipping undecodable packet");
            }
            Err(error) => return Err(error.into()),
        }
    }

    downmix.finish(path)
}

/// Running mono mix of a decoded track.
struct Downmix {
    sample_rate: u32,
    channels: u16,
    samples: Vec<f32>,
    skipped_packets: usize,
}

impl Downmix {
    fn for_track(params: &CodecParameters) -> Self {
        let frames = params
            .n_frames
            .and_then(|frames| usize::try_from(frames).ok())
            .unwrap_or_default();
        Self {
            sample_rate: params.sample_rate.unwrap_or(44_100),
            channels: params
                .channels
                .map_or(1, |channels| channels.count() as u16),
            samples: Vec::with_capacity(frames),
            skipped_packets: 0,
        }
    }

    fn push(&mut self, buffer: AudioBufferRef<'_>) {
        let spec = *buffer.spec();
        self.sample_rate = spec.rate;
        self.channels = spec.channels.count() as u16;

        let width = spec.channels.count().max(1);
        let mut interleaved = SampleBuffer::<f32>::new(buffer.capacity() as u64, spec);
        interleaved.copy_interleaved_ref(buffer);
        self.samples.extend(
            interleaved
                .samples()
                .chunks(width)
                .map(|frame| frame.iter().sum::<f32>() / width as f32),
        );
    }

    fn finish(self, path: &Path) -> Result<DecodedAudio> {
        if self.samples.is_empty() {
            anyhow::bail!("decoded zero samples from {}", path.display());
        }
        debug!(
            sample_rate = self.sample_rate,
            channels = self.channels,
            frames = self.samples.len(),
            skipped_packets = self.skipped_packets,
            "take decoded"
        );
        Ok(DecodedAudio {
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples: self.samples,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Take {
    Forward,
    Backward,
}

/// `kick-forwards.wav` is `("kick", Forward)`; anything else is not a take.
fn classify_take(path: &Path) -> Option<(&str, Take)> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    if !AUDIO_EXTENSIONS.contains(&extension.as_str()) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.strip_suffix(FORWARD_SUFFIX)
        .map(|name| (name, Take::Forward))
        .or_else(|| {
            stem.strip_suffix(BACKWARD_SUFFIX)
                .map(|name| (name, Take::Backward))
        })
        .filter(|(name, _)| !name.is_empty())
}

/// Finds `<name>-forwards.<ext>` files and their `<name>-backwards.<ext>` partners.
///
/// A missing directory is created and scans as empty. Backward takes without a
/// forward partner are ignored.
#[instrument(fields(directory = %directory.display()))]
pub fn scan_sample_pairs(directory: &Path) -> Result<Vec<SamplePairEntry>> {
    if !directory.exists() {
        fs::create_dir_all(directory).with_context(|| {
            format!("failed to create sample directory: {}", directory.display())
        })?;
        info!("created empty sample directory");
        return Ok(Vec::new());
    }
    if !directory.is_dir() {
        anyhow::bail!("sample path is not a directory: {}", directory.display());
    }

    let mut forwards: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut backwards: BTreeMap<String, PathBuf> = BTreeMap::new();
    let files = WalkDir::new(directory)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| {
            entry
                .map_err(|error| warn!(?error, "ignoring unreadable entry in sample directory"))
                .ok()
        })
        .filter(|entry| entry.file_type().is_file());

    for file in files {
        let Some((name, take)) = classify_take(file.path()) else {
            continue;
        };
        let takes = match take {
            Take::Forward => &mut forwards,
            Take::Backward => &mut backwards,
        };
        if let Some(previous) = takes.insert(name.to_string(), file.path().to_path_buf()) {
            warn!(name, previous = %previous.display(), "duplicate take, keeping the later file");
        }
    }

    let pairs: Vec<SamplePairEntry> = forwards
        .into_iter()
        .map(|(name, forward_path)| SamplePairEntry {
            backward_path: backwards
                .remove(&name)
                .map(|path| path.display().to_string()),
            forward_path: forward_path.display().to_string(),
            name,
        })
        .collect();

    debug!(
        pairs = pairs.len(),
        orphaned_backward_takes = backwards.len(),
        "sample directory scanned"
    );
    Ok(pairs)
}

#[instrument(skip(entry), fields(name = %entry.name))]
pub fn load_sample_pair(entry: &SamplePairEntry) -> Result<SamplePair> {
    let forward = decode_audio_file_mono(Path::new(&entry.forward_path))?;
    let Some(backward_path) = &entry.backward_path else {
        debug!("no backwards take, reversing forward samples");
        return Ok(SamplePair::from_forward(
            entry.name.clone(),
            forward.sample_rate,
            forward.samples,
        ));
    };

    let backward = decode_audio_file_mono(Path::new(backward_path))?;
    if backward.sample_rate != forward.sample_rate {
        warn!(
            forward_rate = forward.sample_rate,
            backward_rate = backward.sample_rate,
            "forward and backward takes disagree on sample rate"
        );
    }

    Ok(SamplePair {
        name: entry.name.clone(),
        sample_rate: forward.sample_rate,
        forward: forward.samples,
        backward: backward.samples,
    })
}
