//! Autoregressive generation
//!
//! Continuous models are run deterministically: each normalized output is
//! the next input. Categorical models sample a level from the predicted
//! distribution and feed its one-hot encoding back.

use log::{debug, info};

use super::sampler::CategoricalSampler;
use crate::audio::AudioBuffer;
use crate::error::{Result, TalkError};
use crate::model::{Runner, Talker};
use crate::samples::{NormalizationStats, Sequence, TargetKind};

/// Upper bound on interleaved samples per request; a WAV data chunk holds at
/// most 4 GiB and the widest supported sample is four bytes.
pub const MAX_GENERATED_SAMPLES: usize = (u32::MAX / 4) as usize;

pub struct Generator<'a> {
    talker: &'a mut Talker,
    sampler: CategoricalSampler,
}

impl<'a> Generator<'a> {
    pub fn new(talker: &'a mut Talker, seed: Option<u64>) -> Self {
        Self {
            talker,
            sampler: CategoricalSampler::new(seed),
        }
    }

    /// Interleaved samples needed for `seconds` of audio
    pub fn sample_count(&self, seconds: f64) -> Result<usize> {
        let invalid = || TalkError::InvalidDuration { seconds };
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(invalid());
        }
        let samples = (seconds * self.talker.sample_rate as f64).round()
            * self.talker.channels as f64;
        if samples > MAX_GENERATED_SAMPLES as f64 {
            return Err(invalid());
        }
        Ok(samples as usize)
    }

    /// Input fed to the first step: the normalized encoding of a silent
    /// window. Continuous training sequences start from the same vector.
    pub fn first_input(&self) -> Result<Vec<f32>> {
        let codec = &self.talker.codec;
        let silence = codec.encode(&vec![0.0; codec.window_size()])?;
        Ok(normalized(&self.talker.stats(), &silence))
    }

    /// Generate `seconds` of audio, optionally continuing from a clip.
    ///
    /// Priming is only available for categorical models; asking for it on a
    /// continuous model fails before any audio is produced.
    pub fn generate(&mut self, seconds: f64, priming: Option<&AudioBuffer>) -> Result<AudioBuffer> {
        let count = self.sample_count(seconds)?;
        let samples = match self.talker.codec.target_kind() {
            TargetKind::Continuous => {
                if priming.is_some() {
                    return Err(TalkError::UnsupportedFeature {
                        feature: "priming for continuous codecs".to_string(),
                    });
                }
                self.reconstruct(count)?
            }
            TargetKind::Categorical => self.sample_categorical(count, priming)?,
        };
        info!("Generated {:.2}s of audio", seconds);
        AudioBuffer::new(samples, self.talker.channels, self.talker.sample_rate)
    }

    /// Teacher-forced pass over a real clip: every step sees the true
    /// previous input and the model's prediction is written out.
    pub fn echo(&mut self, clip: &AudioBuffer) -> Result<AudioBuffer> {
        let clip = self.conform(clip)?;
        let stats = self.talker.stats();
        let mut sequence = Sequence::from_buffer(&clip, self.talker.codec.as_ref())?;
        stats.apply(&mut sequence);
        if sequence.is_empty() {
            return Err(TalkError::EmptyBuffer);
        }

        self.talker.set_dropout(false);
        self.talker.set_training(false);
        let codec = self.talker.codec.clone();
        let kind = codec.target_kind();
        let mut runner = Runner::new(&self.talker.block)?;

        let mut samples = Vec::with_capacity(clip.samples().len());
        for input in &sequence.inputs {
            let output = runner.step_time(input)?;
            match kind {
                TargetKind::Continuous => {
                    samples.extend(codec.decode(&denormalized(&stats, &output))?);
                }
                TargetKind::Categorical => {
                    let index = self.sampler.sample(&output);
                    samples.extend(codec.decode(&one_hot(codec.encoded_size(), index))?);
                }
            }
        }
        debug!("Echoed {} steps", sequence.len());
        AudioBuffer::new(samples, self.talker.channels, self.talker.sample_rate)
    }

    fn reconstruct(&mut self, count: usize) -> Result<Vec<f32>> {
        self.talker.set_dropout(false);
        self.talker.set_training(false);
        let stats = self.talker.stats();
        let codec = self.talker.codec.clone();
        let mut runner = Runner::new(&self.talker.block)?;

        let mut input = self.first_input()?;
        let mut samples = Vec::with_capacity(count);
        while samples.len() < count {
            let output = runner.step_time(&input)?;
            samples.extend(codec.decode(&denormalized(&stats, &output))?);
            input = output;
        }
        samples.truncate(count);
        Ok(samples)
    }

    fn sample_categorical(&mut self, count: usize, priming: Option<&AudioBuffer>) -> Result<Vec<f32>> {
        let stats = self.talker.stats();
        let codec = self.talker.codec.clone();
        let width = codec.encoded_size();
        let encode = |sample: f32| -> Result<Vec<f32>> {
            Ok(normalized(&stats, &codec.encode(&[sample])?))
        };

        self.talker.set_dropout(false);
        self.talker.set_training(false);
        let mut states = Runner::new(&self.talker.block)?.into_states();
        let mut input = self.first_input()?;

        if let Some(clip) = priming {
            let clip = self.conform(clip)?;
            if let Some((&last, head)) = clip.samples().split_last() {
                let mut runner = Runner::with_states(&self.talker.block, states)?;
                for &sample in head {
                    runner.step_time(&encode(sample)?)?;
                }
                states = runner.into_states();
                input = encode(last)?;
                debug!("Primed with {} samples", head.len() + 1);
            }
        }

        self.talker.set_dropout(true);
        let mut runner = Runner::with_states(&self.talker.block, states)?;
        let mut samples = Vec::with_capacity(count);
        while samples.len() < count {
            let log_probs = runner.step_time(&input)?;
            let choice = one_hot(width, self.sampler.sample(&log_probs));
            samples.extend(codec.decode(&choice)?);
            input = normalized(&stats, &choice);
        }
        drop(runner);
        self.talker.set_dropout(false);

        samples.truncate(count);
        Ok(samples)
    }

    /// Check channels and convert a clip to the model's sample rate
    fn conform(&self, clip: &AudioBuffer) -> Result<AudioBuffer> {
        if clip.channels() != self.talker.channels {
            return Err(TalkError::FormatMismatch {
                reason: format!(
                    "clip has {} channels but the model expects {}",
                    clip.channels(),
                    self.talker.channels
                ),
            });
        }
        Ok(clip.resample(self.talker.sample_rate))
    }
}

fn one_hot(width: usize, index: usize) -> Vec<f32> {
    let mut v = vec![0.0; width];
    if let Some(slot) = v.get_mut(index) {
        *slot = 1.0;
    }
    v
}

fn normalized(stats: &NormalizationStats, values: &[f32]) -> Vec<f32> {
    values.iter().map(|&x| stats.normalize(x)).collect()
}

fn denormalized(stats: &NormalizationStats, values: &[f32]) -> Vec<f32> {
    values.iter().map(|&x| stats.denormalize(x)).collect()
}
