//! CLI Module
//!
//! Command-line interface for training and sampling audio models.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Train an LSTM on audio clips and generate new audio from it
#[derive(Parser, Debug)]
#[command(name = "rnn-talk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a new or existing model on a directory of WAV files
    #[command(name = "train")]
    Train {
        /// Model file, created if it does not exist
        model_file: PathBuf,

        /// [codec-file] <audio-dir> <step-size>
        #[arg(num_args = 2..=3, value_names = ["CODEC_FILE", "AUDIO_DIR", "STEP_SIZE"])]
        args: Vec<String>,

        /// Stop after this many iterations
        #[arg(short, long)]
        iterations: Option<usize>,
    },

    /// Generate audio from a trained model
    #[command(name = "talk")]
    Talk {
        /// Trained model file
        model_file: PathBuf,

        /// Output WAV file
        output: PathBuf,

        /// Duration to generate, in seconds
        seconds: f64,

        /// Clip to continue from
        priming: Option<PathBuf>,
    },

    /// Run a clip through a model with the true samples as inputs
    #[command(name = "echo")]
    Echo {
        /// Trained model file
        model_file: PathBuf,

        /// Input WAV file
        input: PathBuf,

        /// Output WAV file
        output: PathBuf,
    },
}

/// Positional arguments of `train` after the model file
#[derive(Debug, Clone, PartialEq)]
pub struct TrainArgs {
    pub codec_file: Option<PathBuf>,
    pub audio_dir: PathBuf,
    pub step_size: f64,
}

impl TrainArgs {
    /// Split `[codec-file] <audio-dir> <step-size>`
    pub fn parse(args: &[String]) -> std::result::Result<Self, String> {
        let (codec_file, audio_dir, step) = match args {
            [dir, step] => (None, dir, step),
            [codec, dir, step] => (Some(PathBuf::from(codec)), dir, step),
            _ => return Err(format!("expected 2 or 3 arguments, got {}", args.len())),
        };
        let step_size: f64 = step
            .parse()
            .map_err(|_| format!("invalid step size: {}", step))?;
        if !(step_size.is_finite() && step_size > 0.0) {
            return Err(format!("step size must be positive: {}", step));
        }
        Ok(Self {
            codec_file,
            audio_dir: PathBuf::from(audio_dir),
            step_size,
        })
    }
}
