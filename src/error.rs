//! Error types for rnn-talk
//!
//! Every fallible operation returns `TalkError`. Errors travel up to the CLI,
//! which is the only place that turns them into a message and exit code.

use thiserror::Error;

/// Result type alias using TalkError
pub type Result<T> = std::result::Result<T, TalkError>;

/// All possible errors in rnn-talk
#[derive(Error, Debug)]
pub enum TalkError {
    // Sample directory errors
    #[error("no audio files in {dir}")]
    NoAudioFiles { dir: String },

    #[error("files must share a format: {reason}")]
    FormatMismatch { reason: String },

    // Model errors
    #[error("invalid deserialized data")]
    InvalidModelData,

    #[error("{feature} not yet implemented")]
    UnsupportedFeature { feature: String },

    #[error("vector width mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Audio I/O errors
    #[error("failed to read audio file {path}: {source}")]
    AudioReadError {
        path: String,
        #[source]
        source: hound::Error,
    },

    #[error("failed to write audio file {path}: {source}")]
    AudioWriteError {
        path: String,
        #[source]
        source: hound::Error,
    },

    #[error("unsupported audio format: {details}")]
    UnsupportedFormat { details: String },

    #[error("audio buffer is empty")]
    EmptyBuffer,

    #[error("cannot generate {seconds} seconds of audio")]
    InvalidDuration { seconds: f64 },

    // Tensor backend
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    // Generic I/O
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl TalkError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoAudioFiles { .. } => "NO_AUDIO_FILES",
            Self::FormatMismatch { .. } => "FORMAT_MISMATCH",
            Self::InvalidModelData => "INVALID_MODEL_DATA",
            Self::UnsupportedFeature { .. } => "UNSUPPORTED_FEATURE",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::AudioReadError { .. } => "AUDIO_READ_ERROR",
            Self::AudioWriteError { .. } => "AUDIO_WRITE_ERROR",
            Self::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            Self::EmptyBuffer => "EMPTY_BUFFER",
            Self::InvalidDuration { .. } => "INVALID_DURATION",
            Self::Tensor(_) => "TENSOR_ERROR",
            Self::IoError(_) => "IO_ERROR",
            Self::SerializationError(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Returns a suggested recovery action for this error
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::NoAudioFiles { .. } => "Put at least one .wav file in the sample directory",
            Self::FormatMismatch { .. } => {
                "Convert every sample to the same channel count and sample rate"
            }
            Self::InvalidModelData => "The model file is corrupt or was written by another tool",
            Self::UnsupportedFeature { .. } => "Retry without the unsupported option",
            Self::InvalidConfig { .. } => "Fix the configuration file and try again",
            Self::AudioReadError { .. } => "Check that the file exists and is a valid WAV file",
            Self::UnsupportedFormat { .. } => "Convert to 16/24-bit PCM or 32-bit float WAV",
            Self::EmptyBuffer => "Request a longer duration or provide a longer clip",
            Self::InvalidDuration { .. } => "Pass a finite, non-negative number of seconds",
            _ => "Check the error details and try again",
        }
    }
}
