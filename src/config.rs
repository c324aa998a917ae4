//! Configuration
//!
//! Every tunable knob lives here with a default, so a missing config file or a
//! partial one is always valid. Files are JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TalkError};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub samples: SampleConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub generation: GenerationConfig,
}

/// How audio directories are turned into training sequences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    /// Window length in seconds for the compressive codec
    pub chunk_seconds: f64,
    /// Window length in seconds for the one-hot codec
    pub discrete_chunk_seconds: f64,
    /// Address windows lazily through the cache instead of materializing them
    pub lazy: bool,
    /// Maximum number of decoded files held by the sample cache
    pub cache_capacity: usize,
    /// Raw samples per compressed vector
    pub pca_chunk_size: usize,
    /// Compressed vector width
    pub pca_components: usize,
    /// Upper bound on windows used to fit a new compressive codec
    pub pca_fit_chunks: usize,
    /// Quantization levels for the one-hot codec
    pub one_hot_bins: usize,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            chunk_seconds: 60.0,
            discrete_chunk_seconds: 1.0,
            lazy: false,
            cache_capacity: 64,
            pca_chunk_size: 256,
            pca_components: 32,
            pca_fit_chunks: 2048,
            one_hot_bins: 256,
        }
    }
}

/// Network shape and initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of each LSTM layer, input side first
    pub hidden_sizes: Vec<usize>,
    /// Dropout keep probability after each LSTM layer
    pub keep_probabilities: Vec<f64>,
    pub input_gate_bias: f32,
    pub output_gate_bias: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_sizes: vec![300],
            keep_probabilities: vec![0.5],
            input_gate_bias: -1.0,
            output_gate_bias: -2.0,
        }
    }
}

/// Adaptive step rule applied to each gradient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    AdaGrad,
    RmsProp,
    Sgd,
}

/// Training loop parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub validation_batch_size: usize,
    /// Sequences unrolled together in one BPTT pass
    pub max_lanes: usize,
    pub optimizer: OptimizerKind,
    pub damping: f64,
    pub rms_memory: f64,
    /// Force dropout on or off while training; `None` picks per codec
    pub dropout: Option<bool>,
    /// Train against raw projection outputs instead of saturated ones
    pub bypass_saturation: bool,
    /// Checkpoint the model every this many iterations (0 disables)
    pub save_interval: usize,
    pub max_iterations: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            validation_batch_size: 10,
            max_lanes: 25,
            optimizer: OptimizerKind::AdaGrad,
            damping: 1e-4,
            rms_memory: 0.9,
            dropout: None,
            bypass_saturation: false,
            save_interval: 10,
            max_iterations: None,
            seed: None,
        }
    }
}

/// Output parameters for `talk` and `echo`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub seed: Option<u64>,
    pub bits_per_sample: u16,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            bits_per_sample: 16,
        }
    }
}

impl Config {
    /// Load and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working model
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(TalkError::InvalidConfig { reason });

        let model = &self.model;
        if model.hidden_sizes.is_empty() {
            return invalid("at least one hidden layer is required".to_string());
        }
        if model.hidden_sizes.len() != model.keep_probabilities.len() {
            return invalid(format!(
                "{} hidden layers but {} keep probabilities",
                model.hidden_sizes.len(),
                model.keep_probabilities.len()
            ));
        }
        if model.hidden_sizes.iter().any(|&size| size == 0) {
            return invalid("hidden layer sizes must be positive".to_string());
        }
        if let Some(p) = model
            .keep_probabilities
            .iter()
            .find(|p| !(**p > 0.0 && **p <= 1.0))
        {
            return invalid(format!("keep probability {} outside (0, 1]", p));
        }

        let samples = &self.samples;
        if !(samples.chunk_seconds > 0.0 && samples.discrete_chunk_seconds > 0.0) {
            return invalid("chunk durations must be positive".to_string());
        }
        if samples.pca_components == 0 || samples.pca_components > samples.pca_chunk_size {
            return invalid(format!(
                "pca_components must be in 1..={}",
                samples.pca_chunk_size
            ));
        }
        if samples.one_hot_bins < 2 {
            return invalid("one_hot_bins must be at least 2".to_string());
        }
        if samples.cache_capacity == 0 {
            return invalid("cache_capacity must be positive".to_string());
        }

        let training = &self.training;
        if training.batch_size == 0 || training.max_lanes == 0 {
            return invalid("batch_size and max_lanes must be positive".to_string());
        }
        if !(0.0..1.0).contains(&training.rms_memory) {
            return invalid(format!("rms_memory {} outside [0, 1)", training.rms_memory));
        }
        Ok(())
    }
}
