//! Stacked block
//!
//! Ordered stages with matching widths. The block itself is stateless; the
//! caller owns one [`StageState`] per stage and threads it through [`step`].
//!
//! [`step`]: StackedBlock::step

use candle_core::{Device, Tensor, Var};

use super::stage::{Stage, StageRecord, StageState};
use crate::error::{Result, TalkError};

#[derive(Debug)]
pub struct StackedBlock {
    stages: Vec<Box<dyn Stage>>,
    device: Device,
}

impl StackedBlock {
    /// Build a block, checking that adjacent stage widths agree
    pub fn new(stages: Vec<Box<dyn Stage>>, device: Device) -> Result<Self> {
        if stages.is_empty() {
            return Err(TalkError::InvalidConfig {
                reason: "a block needs at least one stage".to_string(),
            });
        }
        for pair in stages.windows(2) {
            if pair[0].output_width() != pair[1].input_width() {
                return Err(TalkError::DimensionMismatch {
                    expected: pair[0].output_width(),
                    actual: pair[1].input_width(),
                });
            }
        }
        Ok(Self { stages, device })
    }

    /// Rebuild from serialized stages
    pub fn from_records(records: Vec<StageRecord>, device: Device) -> Result<Self> {
        let stages = records
            .into_iter()
            .map(|record| record.into_stage(&device))
            .collect::<Result<Vec<_>>>()?;
        Self::new(stages, device)
    }

    pub fn to_records(&self) -> Result<Vec<StageRecord>> {
        self.stages.iter().map(|stage| stage.to_record()).collect()
    }

    pub fn stages(&self) -> &[Box<dyn Stage>] {
        &self.stages
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn input_width(&self) -> usize {
        self.stages.first().map(|s| s.input_width()).unwrap_or(0)
    }

    pub fn output_width(&self) -> usize {
        self.stages.last().map(|s| s.output_width()).unwrap_or(0)
    }

    /// Zeroed state for `lanes` parallel sequences, one entry per stage
    pub fn zero_state(&self, lanes: usize) -> Result<Vec<StageState>> {
        self.stages
            .iter()
            .map(|stage| stage.zero_state(lanes, &self.device))
            .collect()
    }

    /// Total recurrent state values per lane
    pub fn state_width(&self) -> Result<usize> {
        Ok(self.zero_state(1)?.iter().map(StageState::width).sum())
    }

    /// Run one timestep through every stage
    pub fn step(&self, input: &Tensor, states: &[StageState]) -> Result<(Tensor, Vec<StageState>)> {
        if states.len() != self.stages.len() {
            return Err(TalkError::DimensionMismatch {
                expected: self.stages.len(),
                actual: states.len(),
            });
        }
        let mut x = input.clone();
        let mut next = Vec::with_capacity(states.len());
        for (stage, state) in self.stages.iter().zip(states) {
            let (out, new_state) = stage.forward(&x, state)?;
            x = out;
            next.push(new_state);
        }
        Ok((x, next))
    }

    /// Trainable parameters of every stage, in stage order
    pub fn vars(&self) -> Vec<Var> {
        self.stages.iter().flat_map(|stage| stage.vars()).collect()
    }

    /// Enable or disable every dropout stage
    pub fn set_dropout(&mut self, enabled: bool) {
        for stage in &mut self.stages {
            if let Some(dropout) = stage.as_dropout_mut() {
                dropout.set_enabled(enabled);
            }
        }
    }

    /// Switch projection heads between training and inference behaviour
    pub fn set_training(&mut self, training: bool) {
        for stage in &mut self.stages {
            if let Some(projection) = stage.as_projection_mut() {
                projection.set_training(training);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::lstm::LstmCell;
    use crate::model::stage::{Activation, DropoutStage, ProjectionStage, RescaleStage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_block() -> StackedBlock {
        let mut rng = StdRng::seed_from_u64(5);
        let device = Device::Cpu;
        StackedBlock::new(
            vec![
                Box::new(RescaleStage::new(3, 0.5, 2.0)),
                Box::new(LstmCell::new(3, 4, -1.0, -2.0, &mut rng, &device).unwrap()),
                Box::new(DropoutStage::new(4, 0.5)),
                Box::new(ProjectionStage::new(4, 3, Activation::Sigmoid, &mut rng, &device).unwrap()),
            ],
            device,
        )
        .unwrap()
    }

    #[test]
    fn test_widths() {
        let block = small_block();
        assert_eq!(block.input_width(), 3);
        assert_eq!(block.output_width(), 3);
        assert_eq!(block.state_width().unwrap(), 8);
        assert_eq!(block.vars().len(), 5);
    }

    #[test]
    fn test_width_chain_checked() {
        let mut rng = StdRng::seed_from_u64(5);
        let result = StackedBlock::new(
            vec![
                Box::new(RescaleStage::new(3, 0.0, 1.0)),
                Box::new(LstmCell::new(2, 4, -1.0, -2.0, &mut rng, &Device::Cpu).unwrap()),
            ],
            Device::Cpu,
        );
        assert!(matches!(
            result,
            Err(TalkError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_mode_toggles_reach_stages() {
        let mut block = small_block();
        block.set_dropout(true);
        block.set_training(true);
        let records = block.to_records().unwrap();
        assert_eq!(records.len(), 4);

        for stage in &mut block.stages {
            if let Some(dropout) = stage.as_dropout_mut() {
                assert!(dropout.is_enabled());
            }
            if let Some(projection) = stage.as_projection_mut() {
                assert!(projection.is_training());
            }
        }
    }

    #[test]
    fn test_records_rebuild_same_block() {
        let block = small_block();
        let rebuilt = StackedBlock::from_records(block.to_records().unwrap(), Device::Cpu).unwrap();
        assert_eq!(rebuilt.to_records().unwrap(), block.to_records().unwrap());
    }

    #[test]
    fn test_step_output_shape() {
        let block = small_block();
        let states = block.zero_state(2).unwrap();
        let input = Tensor::zeros((2, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
        let (out, next) = block.step(&input, &states).unwrap();
        assert_eq!(out.dims(), &[2, 3]);
        assert_eq!(next.len(), 4);
    }
}
