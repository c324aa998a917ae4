//! Step-wise driver
//!
//! A runner borrows a block immutably and owns the recurrent state of one
//! sequence. State only moves forward; start over by building a new runner.

use candle_core::Tensor;
use rand::Rng;

use super::block::StackedBlock;
use super::stage::StageState;
use crate::error::{Result, TalkError};
use crate::samples::SampleSet;
use crate::train::cost::CostFunction;

#[derive(Debug)]
pub struct Runner<'a> {
    block: &'a StackedBlock,
    states: Vec<StageState>,
}

impl<'a> Runner<'a> {
    /// Runner starting from the zero state
    pub fn new(block: &'a StackedBlock) -> Result<Self> {
        Ok(Self {
            block,
            states: block.zero_state(1)?,
        })
    }

    /// Runner continuing from states produced by another runner
    pub fn with_states(block: &'a StackedBlock, states: Vec<StageState>) -> Result<Self> {
        if states.len() != block.stages().len() {
            return Err(TalkError::DimensionMismatch {
                expected: block.stages().len(),
                actual: states.len(),
            });
        }
        Ok(Self { block, states })
    }

    pub fn into_states(self) -> Vec<StageState> {
        self.states
    }

    /// Feed a `[1, input_width]` tensor and return the block output
    pub fn step_tensor(&mut self, input: &Tensor) -> Result<Tensor> {
        let (output, states) = self.block.step(input, &self.states)?;
        self.states = states.iter().map(StageState::detach).collect();
        Ok(output.detach())
    }

    /// Feed one input vector and return the block output
    pub fn step_time(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let width = self.block.input_width();
        if input.len() != width {
            return Err(TalkError::DimensionMismatch {
                expected: width,
                actual: input.len(),
            });
        }
        let tensor = Tensor::from_vec(input.to_vec(), (1, width), self.block.device())?;
        let output = self.step_tensor(&tensor)?;
        Ok(output.flatten_all()?.to_vec1::<f32>()?)
    }

    /// Summed cost over `batch_size` randomly drawn sequences, each run from
    /// a fresh zero state. No gradients are kept.
    pub fn total_cost<R: Rng + ?Sized>(
        block: &StackedBlock,
        batch_size: usize,
        set: &dyn SampleSet,
        cost: &dyn CostFunction,
        rng: &mut R,
    ) -> Result<f64> {
        if set.is_empty() {
            return Ok(0.0);
        }
        let device = block.device();
        let mut total = 0.0;
        for _ in 0..batch_size {
            let sequence = set.sequence(rng.gen_range(0..set.len()))?;
            let mut runner = Runner::new(block)?;
            for (input, expected) in sequence.inputs.iter().zip(&sequence.outputs) {
                let input = Tensor::from_vec(input.clone(), (1, input.len()), device)?;
                let expected = Tensor::from_vec(expected.clone(), (1, expected.len()), device)?;
                let predicted = runner.step_tensor(&input)?;
                total += cost
                    .lane_costs(&predicted, &expected)?
                    .sum_all()?
                    .to_scalar::<f32>()? as f64;
            }
        }
        Ok(total)
    }
}
