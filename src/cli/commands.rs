//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::audio::{read_sound_file, write_sound_file};
use crate::config::Config;
use crate::error::{Result, TalkError};
use crate::generate::Generator;
use crate::model::{load_talker, save_talker, Talker};
use crate::samples::{
    read_sounds, OneHotCodec, PcaCodec, SampleCache, SampleCodec, SequenceBuilder, TargetKind,
};
use crate::train::Trainer;

/// Codec for a model that does not exist yet
fn new_codec(
    config: &Config,
    codec_file: Option<&Path>,
    audio_dir: &Path,
    cache: &SampleCache,
) -> Result<Arc<dyn SampleCodec>> {
    let Some(codec_file) = codec_file else {
        return Ok(Arc::new(OneHotCodec::new(config.samples.one_hot_bins)));
    };

    if codec_file.exists() {
        info!("Loading codec: {}", codec_file.display());
        return Ok(Arc::from(PcaCodec::load(codec_file)?));
    }

    info!(
        "Fitting {}-component codec over {}-sample windows",
        config.samples.pca_components, config.samples.pca_chunk_size
    );
    let buffers: Vec<_> = read_sounds(audio_dir, cache)?
        .into_iter()
        .map(|(_, sound)| sound)
        .collect();
    let codec = PcaCodec::fit(
        &buffers,
        config.samples.pca_chunk_size,
        config.samples.pca_components,
        config.samples.pca_fit_chunks,
    )?;
    codec.save(codec_file)?;
    info!("Saved codec: {}", codec_file.display());
    Ok(Arc::new(codec))
}

/// Train a new or existing model and write it to `model_file`.
pub fn train(
    config: &Config,
    model_file: &Path,
    codec_file: Option<&Path>,
    audio_dir: &Path,
    step_size: f64,
    iterations: Option<usize>,
) -> Result<()> {
    let cache = Arc::new(SampleCache::new(config.samples.cache_capacity));

    let existing = if model_file.exists() {
        info!("Loading model: {}", model_file.display());
        Some(load_talker(model_file)?)
    } else {
        None
    };

    let codec = match &existing {
        Some(talker) => {
            if codec_file.is_some() {
                warn!("Ignoring codec file; the existing model brings its own codec");
            }
            Arc::clone(&talker.codec)
        }
        None => new_codec(config, codec_file, audio_dir, &cache)?,
    };

    let mut builder = SequenceBuilder::new(Arc::clone(&codec), cache, config.samples.clone());
    if let Some(talker) = &existing {
        builder = builder.with_stats(talker.stats());
    }
    let samples = builder.build(audio_dir)?;

    let mut talker = match existing {
        Some(talker) => {
            if talker.format() != samples.format {
                return Err(TalkError::FormatMismatch {
                    reason: format!(
                        "model expects {} ch at {} Hz but samples are {} ch at {} Hz",
                        talker.channels,
                        talker.sample_rate,
                        samples.format.channels,
                        samples.format.sample_rate
                    ),
                });
            }
            talker
        }
        None => {
            let mut rng = match config.training.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            Talker::new(&config.model, codec, &samples, &mut rng)?
        }
    };

    let mut training = config.training.clone();
    if iterations.is_some() {
        training.max_iterations = iterations;
    }
    let save_interval = training.save_interval;

    info!("Training LSTM on {} samples...", samples.set.len());
    let mut trainer = Trainer::new(training);
    let done = trainer.train(&mut talker, samples.set.as_ref(), step_size, |report, talker| {
        if save_interval > 0 && report.iteration % save_interval == 0 {
            save_talker(talker, model_file)?;
        }
        Ok(true)
    })?;

    save_talker(&talker, model_file)?;
    println!("Trained {} iterations: {}", done, model_file.display());
    Ok(())
}

/// Generate `seconds` of audio into `output`.
pub fn talk(
    config: &Config,
    model_file: &Path,
    output: &Path,
    seconds: f64,
    priming: Option<&Path>,
) -> Result<()> {
    let mut talker = load_talker(model_file)?;
    if priming.is_some() && talker.codec.target_kind() == TargetKind::Continuous {
        return Err(TalkError::UnsupportedFeature {
            feature: "priming for continuous codecs".to_string(),
        });
    }
    let priming = priming.map(read_sound_file).transpose()?;

    info!("Generating {}s of audio...", seconds);
    let audio = Generator::new(&mut talker, config.generation.seed).generate(seconds, priming.as_ref())?;
    write_sound_file(&audio, output, config.generation.bits_per_sample)?;

    println!("Wrote {:.2}s to {}", audio.duration(), output.display());
    Ok(())
}

/// Reconstruct `input` through the model into `output`.
pub fn echo(config: &Config, model_file: &Path, input: &Path, output: &Path) -> Result<()> {
    let mut talker = load_talker(model_file)?;
    let clip = read_sound_file(input)?;

    info!("Echoing {}...", input.display());
    let audio = Generator::new(&mut talker, config.generation.seed).echo(&clip)?;
    write_sound_file(&audio, output, config.generation.bits_per_sample)?;

    println!("Wrote {:.2}s to {}", audio.duration(), output.display());
    Ok(())
}
