//! rnn-talk CLI
//!
//! Train an LSTM on audio clips, then generate or echo audio with it.

use std::process;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use env_logger::Env;
use log::debug;

use rnn_talk::cli::{commands, Cli, Commands, TrainArgs};
use rnn_talk::config::Config;
use rnn_talk::Result;

fn main() {
    let cli = Cli::parse();

    // Initialize logger
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    if let Err(e) = run(cli) {
        debug!("{} ({})", e.error_code(), e.recovery_hint());
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Train {
            model_file,
            args,
            iterations,
        } => {
            let args = TrainArgs::parse(&args)
                .unwrap_or_else(|msg| Cli::command().error(ErrorKind::InvalidValue, msg).exit());
            commands::train(
                &config,
                &model_file,
                args.codec_file.as_deref(),
                &args.audio_dir,
                args.step_size,
                iterations,
            )
        }
        Commands::Talk {
            model_file,
            output,
            seconds,
            priming,
        } => commands::talk(&config, &model_file, &output, seconds, priming.as_deref()),
        Commands::Echo {
            model_file,
            input,
            output,
        } => commands::echo(&config, &model_file, &input, &output),
    }
}
