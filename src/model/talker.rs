//! Trained artifact: network, codec, audio format and normalization bounds

use std::sync::Arc;

use candle_core::Device;
use log::info;
use rand::Rng;

use super::block::StackedBlock;
use super::lstm::LstmCell;
use super::stage::{Activation, DropoutStage, ProjectionStage, RescaleStage, Stage};
use crate::config::ModelConfig;
use crate::error::{Result, TalkError};
use crate::samples::{
    AudioFormat, BuiltSamples, NormalizationStats, SampleCodec, SampleMoments, TargetKind,
};

#[derive(Debug)]
pub struct Talker {
    pub block: StackedBlock,
    pub codec: Arc<dyn SampleCodec>,
    pub sample_rate: u32,
    pub channels: u16,
    pub min: f64,
    pub max: f64,
}

impl Talker {
    /// Fresh, untrained model for the given samples.
    ///
    /// The input rescale stage is fitted to the mean and deviation of the
    /// normalized sample outputs.
    pub fn new<R: Rng + ?Sized>(
        config: &ModelConfig,
        codec: Arc<dyn SampleCodec>,
        samples: &BuiltSamples,
        rng: &mut R,
    ) -> Result<Self> {
        let moments = SampleMoments::measure(samples.set.as_ref())?;
        let block = build_block(config, codec.as_ref(), moments, rng)?;
        info!(
            "Created {} model: {} -> {:?} -> {}",
            codec.codec_type(),
            block.input_width(),
            config.hidden_sizes,
            block.output_width()
        );
        Ok(Self::from_parts(block, codec, samples.format, samples.stats))
    }

    pub fn from_parts(
        block: StackedBlock,
        codec: Arc<dyn SampleCodec>,
        format: AudioFormat,
        stats: NormalizationStats,
    ) -> Self {
        Self {
            block,
            codec,
            sample_rate: format.sample_rate,
            channels: format.channels,
            min: stats.min,
            max: stats.max,
        }
    }

    pub fn stats(&self) -> NormalizationStats {
        NormalizationStats {
            min: self.min,
            max: self.max,
        }
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }

    pub fn set_dropout(&mut self, enabled: bool) {
        self.block.set_dropout(enabled);
    }

    pub fn set_training(&mut self, training: bool) {
        self.block.set_training(training);
    }
}

/// Rescale → (LSTM → dropout)* → projection
pub fn build_block<R: Rng + ?Sized>(
    config: &ModelConfig,
    codec: &dyn SampleCodec,
    moments: SampleMoments,
    rng: &mut R,
) -> Result<StackedBlock> {
    if config.hidden_sizes.len() != config.keep_probabilities.len() {
        return Err(TalkError::InvalidConfig {
            reason: "one keep probability is needed per hidden layer".to_string(),
        });
    }

    let device = Device::Cpu;
    let width = codec.encoded_size();
    let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(RescaleStage::standardizing(
        width,
        moments.mean,
        moments.stddev,
    ))];

    let mut input = width;
    for (&hidden, &keep) in config.hidden_sizes.iter().zip(&config.keep_probabilities) {
        stages.push(Box::new(LstmCell::new(
            input,
            hidden,
            config.input_gate_bias,
            config.output_gate_bias,
            rng,
            &device,
        )?));
        stages.push(Box::new(DropoutStage::new(hidden, keep)));
        input = hidden;
    }

    let activation = match codec.target_kind() {
        TargetKind::Continuous => Activation::Sigmoid,
        TargetKind::Categorical => Activation::LogSoftmax,
    };
    stages.push(Box::new(ProjectionStage::new(input, width, activation, rng, &device)?));

    StackedBlock::new(stages, device)
}
