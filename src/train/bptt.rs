//! Backpropagation through time
//!
//! Sequences of a batch are unrolled side by side as lanes of one tensor.
//! Shorter sequences are padded with zeros and masked out of the cost. At
//! most `max_lanes` sequences share one pass; gradients of further passes
//! are added to the first.

use candle_core::Tensor;

use crate::error::{Result, TalkError};
use crate::model::StackedBlock;
use crate::samples::Sequence;
use crate::train::cost::CostFunction;

/// Summed cost of a batch and its gradient
#[derive(Debug)]
pub struct Gradient {
    pub cost: f64,
    /// One entry per block variable, `None` where no gradient reached it
    pub grads: Vec<Option<Tensor>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Bptt {
    max_lanes: usize,
}

impl Bptt {
    pub fn new(max_lanes: usize) -> Self {
        Self {
            max_lanes: max_lanes.max(1),
        }
    }

    /// Cost of `sequences` under `block` and its gradient with respect to
    /// `block.vars()`
    pub fn gradient(
        &self,
        block: &StackedBlock,
        cost: &dyn CostFunction,
        sequences: &[Sequence],
    ) -> Result<Gradient> {
        let vars = block.vars();
        let mut gradient = Gradient {
            cost: 0.0,
            grads: vec![None; vars.len()],
        };

        for pass in sequences.chunks(self.max_lanes) {
            let Some(total) = self.unroll(block, cost, pass)? else {
                continue;
            };
            gradient.cost += total.to_scalar::<f32>()? as f64;

            let store = total.backward()?;
            for (slot, var) in gradient.grads.iter_mut().zip(&vars) {
                if let Some(grad) = store.get(var.as_tensor()) {
                    *slot = Some(match slot.take() {
                        Some(acc) => acc.add(grad)?,
                        None => grad.clone(),
                    });
                }
            }
        }

        Ok(gradient)
    }

    /// Run one pass of lanes forward and return the summed, masked cost
    fn unroll(
        &self,
        block: &StackedBlock,
        cost: &dyn CostFunction,
        lanes: &[Sequence],
    ) -> Result<Option<Tensor>> {
        let device = block.device();
        let in_width = block.input_width();
        let out_width = block.output_width();
        let steps = lanes.iter().map(Sequence::len).max().unwrap_or(0);
        let count = lanes.len();

        let mut states = block.zero_state(count)?;
        let mut total: Option<Tensor> = None;

        for t in 0..steps {
            let mut input = vec![0.0f32; count * in_width];
            let mut expected = vec![0.0f32; count * out_width];
            let mut mask = vec![0.0f32; count];

            for (lane, sequence) in lanes.iter().enumerate() {
                if t >= sequence.len() {
                    continue;
                }
                let (x, y) = (&sequence.inputs[t], &sequence.outputs[t]);
                if x.len() != in_width {
                    return Err(TalkError::DimensionMismatch {
                        expected: in_width,
                        actual: x.len(),
                    });
                }
                if y.len() != out_width {
                    return Err(TalkError::DimensionMismatch {
                        expected: out_width,
                        actual: y.len(),
                    });
                }
                input[lane * in_width..(lane + 1) * in_width].copy_from_slice(x);
                expected[lane * out_width..(lane + 1) * out_width].copy_from_slice(y);
                mask[lane] = 1.0;
            }

            let input = Tensor::from_vec(input, (count, in_width), device)?;
            let expected = Tensor::from_vec(expected, (count, out_width), device)?;
            let mask = Tensor::from_vec(mask, count, device)?;

            let (predicted, next) = block.step(&input, &states)?;
            states = next;

            let step_cost = cost.lane_costs(&predicted, &expected)?.mul(&mask)?.sum_all()?;
            total = Some(match total {
                Some(acc) => acc.add(&step_cost)?,
                None => step_cost,
            });
        }

        Ok(total)
    }
}
