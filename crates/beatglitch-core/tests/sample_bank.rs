use std::path::Path;

use beatglitch_core::{
    Engine, SampleBank, decode_audio_file_mono, fixtures::ramp_config, load_sample_pair,
    scan_sample_pairs,
};
use tempfile::tempdir;

/// Mono 16-bit WAV whose samples step up by `step` from zero.
fn write_ramp_wav(path: &Path, frames: usize, step: i16) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("test wav should be creatable");
    for frame in 0..frames {
        let sample = i16::try_from(frame).expect("test ramps are short") * step;
        writer
            .write_sample(sample)
            .expect("test wav sample write should succeed");
    }
    writer.finalize().expect("test wav finalize should succeed");
}

#[test]
fn scan_pairs_forward_takes_with_their_backward_partners() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_ramp_wav(&temp.path().join("kick-forwards.wav"), 32, 100);
    write_ramp_wav(&temp.path().join("kick-backwards.wav"), 32, -100);
    write_ramp_wav(&temp.path().join("snare-forwards.wav"), 16, 200);
    write_ramp_wav(&temp.path().join("hat-backwards.wav"), 16, 50);
    std::fs::write(temp.path().join("notes.txt"), "not audio").expect("note should be writable");

    let entries = scan_sample_pairs(temp.path()).expect("scan should succeed");
    let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["kick", "snare"]);
    assert!(entries[0].backward_path.is_some());
    assert!(entries[1].backward_path.is_none());
}

#[test]
fn missing_backward_take_is_built_by_reversal() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_ramp_wav(&temp.path().join("snare-forwards.wav"), 16, 200);

    let entries = scan_sample_pairs(temp.path()).expect("scan should succeed");
    let pair = load_sample_pair(&entries[0]).expect("pair should load");

    assert_eq!(pair.sample_rate, 8_000);
    assert_eq!(pair.forward.len(), 16);
    let reversed: Vec<f32> = pair.forward.iter().rev().copied().collect();
    assert_eq!(pair.backward, reversed);
    assert!(pair.forward[15] > pair.forward[1]);
}

#[test]
fn recorded_backward_take_is_used_as_is() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_ramp_wav(&temp.path().join("kick-forwards.wav"), 32, 100);
    write_ramp_wav(&temp.path().join("kick-backwards.wav"), 32, -100);

    let entries = scan_sample_pairs(temp.path()).expect("scan should succeed");
    let pair = load_sample_pair(&entries[0]).expect("pair should load");
    let decoded = decode_audio_file_mono(Path::new(&entries[0].forward_path))
        .expect("forward take should decode");

    assert_eq!(pair.forward, decoded.samples);
    assert!(pair.backward[31] < 0.0, "backward take is the recorded file");
}

#[test]
fn missing_sample_directory_is_created_empty() {
    let temp = tempdir().expect("tempdir should be creatable");
    let directory = temp.path().join("samples");

    let bank = SampleBank::load_directory(&directory, 8_000).expect("missing dir is not an error");
    assert!(directory.is_dir());
    assert_eq!(bank.len(), 1, "only silence");
}

#[test]
fn sample_path_that_is_a_file_is_rejected() {
    let temp = tempdir().expect("tempdir should be creatable");
    let file = temp.path().join("samples");
    std::fs::write(&file, "oops").expect("file should be writable");
    assert!(scan_sample_pairs(&file).is_err());
}

#[test]
fn unreadable_pairs_are_skipped_when_loading_a_bank() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_ramp_wav(&temp.path().join("kick-forwards.wav"), 32, 100);
    std::fs::write(temp.path().join("broken-forwards.wav"), b"RIFF????")
        .expect("broken file should be writable");

    let bank = SampleBank::load_directory(temp.path(), 8_000).expect("bank should load");
    assert_eq!(bank.names().collect::<Vec<_>>(), vec!["silence", "kick"]);
}

#[test]
fn engine_loads_a_sample_directory_and_selects_silence() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_ramp_wav(&temp.path().join("kick-forwards.wav"), 32, 100);
    write_ramp_wav(&temp.path().join("snare-forwards.wav"), 16, 200);

    let mut engine = Engine::new(&ramp_config());
    let loaded = engine
        .load_samples(temp.path())
        .expect("samples should load");

    assert_eq!(loaded, 3);
    assert_eq!(engine.selected_sample(), 0);
    engine.select_sample(2).expect("snare is loaded");
    assert_eq!(engine.deck().pair().name, "snare");
}
