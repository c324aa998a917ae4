//! Cost functions

use std::fmt::Debug;

use candle_core::Tensor;

use crate::error::Result;
use crate::samples::TargetKind;

/// Per-lane cost of a batch of predictions
pub trait CostFunction: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Cost of `[lanes, width]` predictions against targets, shape `[lanes]`
    fn lane_costs(&self, predicted: &Tensor, expected: &Tensor) -> Result<Tensor>;
}

/// `Σ (p - e)²`
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredCost;

impl CostFunction for MeanSquaredCost {
    fn name(&self) -> &'static str {
        "mean_squared"
    }

    fn lane_costs(&self, predicted: &Tensor, expected: &Tensor) -> Result<Tensor> {
        Ok(predicted.sub(expected)?.sqr()?.sum(1)?)
    }
}

/// `-Σ e · log p`, with predictions already in log space
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyCost;

impl CostFunction for CrossEntropyCost {
    fn name(&self) -> &'static str {
        "cross_entropy"
    }

    fn lane_costs(&self, predicted: &Tensor, expected: &Tensor) -> Result<Tensor> {
        Ok(expected.mul(predicted)?.sum(1)?.neg()?)
    }
}

/// Cost matching a codec's target kind
pub fn for_target(kind: TargetKind) -> Box<dyn CostFunction> {
    match kind {
        TargetKind::Continuous => Box::new(MeanSquaredCost),
        TargetKind::Categorical => Box::new(CrossEntropyCost),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    fn tensor(rows: &[&[f32]]) -> Tensor {
        let width = rows[0].len();
        let data: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_vec(data, (rows.len(), width), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_squared_cost_per_lane() {
        let p = tensor(&[&[0.5, 0.5], &[1.0, 0.0]]);
        let e = tensor(&[&[0.0, 1.0], &[1.0, 0.0]]);
        let costs = MeanSquaredCost.lane_costs(&p, &e).unwrap().to_vec1::<f32>().unwrap();
        assert_abs_diff_eq!(costs[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(costs[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cross_entropy_picks_target_log_prob() {
        let p = tensor(&[&[0.25f32.ln(), 0.75f32.ln()]]);
        let e = tensor(&[&[0.0, 1.0]]);
        let costs = CrossEntropyCost.lane_costs(&p, &e).unwrap().to_vec1::<f32>().unwrap();
        assert_abs_diff_eq!(costs[0], -(0.75f32.ln()), epsilon = 1e-6);
    }

    #[test]
    fn test_cost_for_target() {
        assert_eq!(for_target(TargetKind::Continuous).name(), "mean_squared");
        assert_eq!(for_target(TargetKind::Categorical).name(), "cross_entropy");
    }
}
