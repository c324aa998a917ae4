//! Integration Tests
//!
//! End-to-end runs of the train, talk and echo commands on small fixtures.

use std::fs;
use std::path::Path;

use rnn_talk::cli::commands;
use rnn_talk::config::{Config, ModelConfig, SampleConfig, TrainingConfig};
use rnn_talk::{load_talker, read_sound_file, write_sound_file, AudioBuffer, TalkError};
use tempfile::tempdir;

const RATE: u32 = 8000;

/// Small network and short windows so every test runs in well under a second
fn small_config() -> Config {
    Config {
        samples: SampleConfig {
            chunk_seconds: 0.1,
            discrete_chunk_seconds: 0.02,
            pca_chunk_size: 16,
            pca_components: 4,
            pca_fit_chunks: 200,
            one_hot_bins: 16,
            ..SampleConfig::default()
        },
        model: ModelConfig {
            hidden_sizes: vec![8],
            keep_probabilities: vec![0.9],
            ..ModelConfig::default()
        },
        training: TrainingConfig {
            batch_size: 2,
            validation_batch_size: 1,
            max_lanes: 2,
            save_interval: 1,
            seed: Some(1),
            ..TrainingConfig::default()
        },
        ..Config::default()
    }
}

fn write_tone(dir: &Path, name: &str, frequency: f32, seconds: f32) {
    let tone = AudioBuffer::sine_wave(frequency, seconds, RATE);
    let quiet: Vec<f32> = tone.samples().iter().map(|s| s * 0.5).collect();
    let buffer = AudioBuffer::new(quiet, 1, RATE).unwrap();
    write_sound_file(&buffer, dir.join(name), 16).unwrap();
}

fn sample_dir(root: &Path) -> std::path::PathBuf {
    let dir = root.join("samples");
    fs::create_dir(&dir).unwrap();
    write_tone(&dir, "a.wav", 220.0, 0.25);
    write_tone(&dir, "b.wav", 330.0, 0.2);
    dir
}

// === Sample directory errors ===

#[test]
fn test_empty_directory_writes_no_model() {
    let root = tempdir().unwrap();
    let dir = root.path().join("empty");
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("readme.txt"), "not audio").unwrap();
    let model = root.path().join("model.json");

    let result = commands::train(&small_config(), &model, None, &dir, 0.01, Some(1));
    assert!(matches!(result, Err(TalkError::NoAudioFiles { .. })));
    assert!(!model.exists());
}

#[test]
fn test_channel_mismatch_fails_before_training() {
    let root = tempdir().unwrap();
    let dir = sample_dir(root.path());
    let stereo = AudioBuffer::new(vec![0.1; 800], 2, RATE).unwrap();
    write_sound_file(&stereo, dir.join("c.wav"), 16).unwrap();
    let model = root.path().join("model.json");

    let result = commands::train(&small_config(), &model, None, &dir, 0.01, Some(1));
    assert!(matches!(result, Err(TalkError::FormatMismatch { .. })));
    assert!(!model.exists());
}

// === Discrete models ===

#[test]
fn test_fresh_discrete_model_talks_for_requested_duration() {
    let root = tempdir().unwrap();
    let dir = sample_dir(root.path());
    let model = root.path().join("model.json");
    let output = root.path().join("out.wav");
    let config = small_config();

    commands::train(&config, &model, None, &dir, 0.01, Some(0)).unwrap();
    let talker = load_talker(&model).unwrap();
    assert_eq!(talker.codec.codec_type(), "one_hot");
    assert_eq!(talker.sample_rate, RATE);

    commands::talk(&config, &model, &output, 2.0, None).unwrap();
    let audio = read_sound_file(&output).unwrap();
    assert_eq!(audio.samples().len(), 2 * RATE as usize);
    assert_eq!(audio.channels(), 1);
}

#[test]
fn test_discrete_training_and_priming() {
    let root = tempdir().unwrap();
    let dir = sample_dir(root.path());
    let model = root.path().join("model.json");
    let output = root.path().join("primed.wav");
    let config = small_config();

    commands::train(&config, &model, None, &dir, 0.01, Some(2)).unwrap();
    // A second run continues from the saved model.
    commands::train(&config, &model, None, &dir, 0.01, Some(1)).unwrap();

    commands::talk(&config, &model, &output, 0.1, Some(&dir.join("a.wav"))).unwrap();
    let audio = read_sound_file(&output).unwrap();
    assert_eq!(audio.samples().len(), 800);
}

// === Continuous models ===

#[test]
fn test_continuous_codec_is_fitted_and_saved() {
    let root = tempdir().unwrap();
    let dir = sample_dir(root.path());
    let model = root.path().join("model.json");
    let codec = root.path().join("codec.json");
    let output = root.path().join("out.wav");
    let config = small_config();

    commands::train(&config, &model, Some(&codec), &dir, 0.01, Some(2)).unwrap();
    assert!(codec.exists());
    let talker = load_talker(&model).unwrap();
    assert_eq!(talker.codec.codec_type(), "pca");
    assert_eq!(talker.block.input_width(), 4);

    commands::talk(&config, &model, &output, 0.25, None).unwrap();
    assert_eq!(read_sound_file(&output).unwrap().samples().len(), 2000);

    let echoed = root.path().join("echo.wav");
    commands::echo(&config, &model, &dir.join("b.wav"), &echoed).unwrap();
    assert_eq!(read_sound_file(&echoed).unwrap().samples().len(), 1600);
}

#[test]
fn test_continuous_priming_writes_nothing() {
    let root = tempdir().unwrap();
    let dir = sample_dir(root.path());
    let model = root.path().join("model.json");
    let codec = root.path().join("codec.json");
    let output = root.path().join("out.wav");
    let config = small_config();

    commands::train(&config, &model, Some(&codec), &dir, 0.01, Some(0)).unwrap();
    let result = commands::talk(&config, &model, &output, 1.0, Some(&dir.join("a.wav")));
    assert!(matches!(result, Err(TalkError::UnsupportedFeature { .. })));
    assert!(!output.exists());

    // The codec kind is checked before the priming file is opened.
    let missing = root.path().join("missing.wav");
    let result = commands::talk(&config, &model, &output, 1.0, Some(&missing));
    assert!(matches!(result, Err(TalkError::UnsupportedFeature { .. })));
}

#[test]
fn test_infinite_duration_is_rejected() {
    let root = tempdir().unwrap();
    let dir = sample_dir(root.path());
    let model = root.path().join("model.json");
    let output = root.path().join("out.wav");
    let config = small_config();

    commands::train(&config, &model, None, &dir, 0.01, Some(0)).unwrap();
    let result = commands::talk(&config, &model, &output, f64::INFINITY, None);
    assert!(matches!(result, Err(TalkError::InvalidDuration { .. })));
    assert!(!output.exists());
}

// === Model files ===

#[test]
fn test_corrupt_model_is_rejected() {
    let root = tempdir().unwrap();
    let model = root.path().join("model.json");
    let output = root.path().join("out.wav");
    fs::write(&model, r#"{"type_tag": "rnn-talk.Talker", "fields": []}"#).unwrap();

    let result = commands::talk(&small_config(), &model, &output, 1.0, None);
    assert!(matches!(result, Err(TalkError::InvalidModelData)));
    assert!(!output.exists());
}
