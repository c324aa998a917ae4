//! rnn-talk - Recurrent audio modelling
//!
//! Trains a stacked LSTM on chopped, encoded audio clips and generates new
//! audio by running the network autoregressively.
//!
//! # Pipeline
//!
//! - `samples`: WAV directory → codec-encoded, normalized sequences
//! - `model`: stacked block of stages, the trained `Talker` and its file format
//! - `train`: batched BPTT with adaptive optimizers and periodic validation
//! - `generate`: deterministic reconstruction or categorical sampling

pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod generate;
pub mod model;
pub mod samples;
pub mod train;

pub use audio::{read_sound_file, write_sound_file, AudioBuffer};
pub use config::Config;
pub use error::{Result, TalkError};
pub use generate::Generator;
pub use model::{load_talker, save_talker, Runner, Talker};
pub use samples::{SampleCache, SampleCodec, SequenceBuilder};
pub use train::Trainer;
