//! Network stages
//!
//! A [`StackedBlock`](super::block::StackedBlock) is an ordered list of boxed
//! stages. Each stage maps a `[lanes, input_width]` tensor to
//! `[lanes, output_width]`, optionally carrying recurrent state between
//! timesteps.

use std::fmt::Debug;

use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::{Linear, Module};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::lstm::LstmCell;
use crate::error::{Result, TalkError};

/// Per-stage state carried from one timestep to the next
#[derive(Debug, Clone)]
pub enum StageState {
    Stateless,
    Recurrent { hidden: Tensor, cell: Tensor },
}

impl StageState {
    /// Same values, cut off from the autodiff graph
    pub fn detach(&self) -> Self {
        match self {
            StageState::Stateless => StageState::Stateless,
            StageState::Recurrent { hidden, cell } => StageState::Recurrent {
                hidden: hidden.detach(),
                cell: cell.detach(),
            },
        }
    }

    /// Number of state values per lane
    pub fn width(&self) -> usize {
        match self {
            StageState::Stateless => 0,
            StageState::Recurrent { hidden, cell } => {
                hidden.dims().last().copied().unwrap_or(0) + cell.dims().last().copied().unwrap_or(0)
            }
        }
    }
}

/// One layer of a stacked block
pub trait Stage: Send + Sync + Debug {
    /// Get the stage type identifier
    fn stage_type(&self) -> &'static str;

    fn input_width(&self) -> usize;

    fn output_width(&self) -> usize;

    /// Initial state for `lanes` parallel sequences
    fn zero_state(&self, _lanes: usize, _device: &Device) -> Result<StageState> {
        Ok(StageState::Stateless)
    }

    /// Process one timestep, returning the output and the next state
    fn forward(&self, input: &Tensor, state: &StageState) -> Result<(Tensor, StageState)>;

    /// Trainable parameters, in a stable order
    fn vars(&self) -> Vec<Var> {
        Vec::new()
    }

    fn as_dropout_mut(&mut self) -> Option<&mut DropoutStage> {
        None
    }

    fn as_projection_mut(&mut self) -> Option<&mut ProjectionStage> {
        None
    }

    /// Serializable form of this stage
    fn to_record(&self) -> Result<StageRecord>;
}

// ============================================================================
// Parameter helpers
// ============================================================================

/// `rows x cols` variable with entries drawn from N(0, 1/fan_in)
pub(crate) fn random_var<R: Rng + ?Sized>(
    rows: usize,
    cols: usize,
    fan_in: usize,
    rng: &mut R,
    device: &Device,
) -> Result<Var> {
    let std = (1.0 / fan_in.max(1) as f64).sqrt();
    let normal = Normal::new(0.0, std).map_err(|e| TalkError::InvalidConfig {
        reason: format!("bad initialization scale: {}", e),
    })?;
    let data: Vec<f32> = (0..rows * cols).map(|_| normal.sample(rng) as f32).collect();
    Ok(Var::from_tensor(&Tensor::from_vec(data, (rows, cols), device)?)?)
}

pub(crate) fn var_from_vec(data: Vec<f32>, shape: &[usize], device: &Device) -> Result<Var> {
    Ok(Var::from_tensor(&Tensor::from_vec(data, shape, device)?)?)
}

pub(crate) fn var_to_vec(var: &Var) -> Result<Vec<f32>> {
    Ok(var.as_tensor().flatten_all()?.to_vec1::<f32>()?)
}

// ============================================================================
// Rescale
// ============================================================================

/// Fixed affine input normalization: `(x - bias) * scale`
#[derive(Debug, Clone, PartialEq)]
pub struct RescaleStage {
    width: usize,
    bias: f32,
    scale: f32,
}

impl RescaleStage {
    pub fn new(width: usize, bias: f32, scale: f32) -> Self {
        Self { width, bias, scale }
    }

    /// Rescale for data with the given mean and standard deviation
    pub fn standardizing(width: usize, mean: f64, stddev: f64) -> Self {
        let stddev = if stddev == 0.0 { 1.0 } else { stddev };
        Self::new(width, mean as f32, (1.0 / stddev) as f32)
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }
}

impl Stage for RescaleStage {
    fn stage_type(&self) -> &'static str {
        "rescale"
    }

    fn input_width(&self) -> usize {
        self.width
    }

    fn output_width(&self) -> usize {
        self.width
    }

    fn forward(&self, input: &Tensor, _state: &StageState) -> Result<(Tensor, StageState)> {
        let scale = self.scale as f64;
        let out = input.affine(scale, -(self.bias as f64) * scale)?;
        Ok((out, StageState::Stateless))
    }

    fn to_record(&self) -> Result<StageRecord> {
        Ok(StageRecord::Rescale {
            width: self.width,
            bias: self.bias,
            scale: self.scale,
        })
    }
}

// ============================================================================
// Dropout
// ============================================================================

/// Inverted dropout, stochastic only while enabled
#[derive(Debug, Clone, PartialEq)]
pub struct DropoutStage {
    width: usize,
    keep_probability: f64,
    enabled: bool,
}

impl DropoutStage {
    pub fn new(width: usize, keep_probability: f64) -> Self {
        Self {
            width,
            keep_probability,
            enabled: false,
        }
    }

    pub fn keep_probability(&self) -> f64 {
        self.keep_probability
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl Stage for DropoutStage {
    fn stage_type(&self) -> &'static str {
        "dropout"
    }

    fn input_width(&self) -> usize {
        self.width
    }

    fn output_width(&self) -> usize {
        self.width
    }

    fn forward(&self, input: &Tensor, _state: &StageState) -> Result<(Tensor, StageState)> {
        let out = if self.enabled && self.keep_probability < 1.0 {
            candle_nn::ops::dropout(input, (1.0 - self.keep_probability) as f32)?
        } else {
            input.clone()
        };
        Ok((out, StageState::Stateless))
    }

    fn as_dropout_mut(&mut self) -> Option<&mut DropoutStage> {
        Some(self)
    }

    fn to_record(&self) -> Result<StageRecord> {
        Ok(StageRecord::Dropout {
            width: self.width,
            keep_probability: self.keep_probability,
        })
    }
}

// ============================================================================
// Projection
// ============================================================================

/// Output squashing applied after the dense projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Sigmoid,
    LogSoftmax,
}

/// Dense layer to the codec width plus its activation.
///
/// In training mode a sigmoid head emits raw pre-activations; a log-softmax
/// head is never bypassed.
#[derive(Debug, Clone)]
pub struct ProjectionStage {
    /// `output x input`
    weight: Var,
    bias: Var,
    activation: Activation,
    training: bool,
}

impl ProjectionStage {
    pub fn new<R: Rng + ?Sized>(
        input_width: usize,
        output_width: usize,
        activation: Activation,
        rng: &mut R,
        device: &Device,
    ) -> Result<Self> {
        Ok(Self {
            weight: random_var(output_width, input_width, input_width, rng, device)?,
            bias: Var::from_tensor(&Tensor::zeros(output_width, DType::F32, device)?)?,
            activation,
            training: false,
        })
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

impl Stage for ProjectionStage {
    fn stage_type(&self) -> &'static str {
        "projection"
    }

    fn input_width(&self) -> usize {
        self.weight.as_tensor().dims()[1]
    }

    fn output_width(&self) -> usize {
        self.weight.as_tensor().dims()[0]
    }

    fn forward(&self, input: &Tensor, _state: &StageState) -> Result<(Tensor, StageState)> {
        let linear = Linear::new(
            self.weight.as_tensor().clone(),
            Some(self.bias.as_tensor().clone()),
        );
        let raw = linear.forward(input)?;
        let out = match self.activation {
            Activation::Sigmoid if self.training => raw,
            Activation::Sigmoid => candle_nn::ops::sigmoid(&raw)?,
            Activation::LogSoftmax => candle_nn::ops::log_softmax(&raw, D::Minus1)?,
        };
        Ok((out, StageState::Stateless))
    }

    fn vars(&self) -> Vec<Var> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    fn as_projection_mut(&mut self) -> Option<&mut ProjectionStage> {
        Some(self)
    }

    fn to_record(&self) -> Result<StageRecord> {
        Ok(StageRecord::Projection {
            input_width: self.input_width(),
            output_width: self.output_width(),
            activation: self.activation,
            weight: var_to_vec(&self.weight)?,
            bias: var_to_vec(&self.bias)?,
        })
    }
}

// ============================================================================
// Records
// ============================================================================

/// Serialized stage parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageRecord {
    Rescale {
        width: usize,
        bias: f32,
        scale: f32,
    },
    Lstm {
        input_width: usize,
        hidden_width: usize,
        w_ih: Vec<f32>,
        w_hh: Vec<f32>,
        bias: Vec<f32>,
    },
    Dropout {
        width: usize,
        keep_probability: f64,
    },
    Projection {
        input_width: usize,
        output_width: usize,
        activation: Activation,
        weight: Vec<f32>,
        bias: Vec<f32>,
    },
}

fn checked(values: Vec<f32>, len: usize) -> Result<Vec<f32>> {
    if values.len() != len || values.iter().any(|x| !x.is_finite()) {
        return Err(TalkError::InvalidModelData);
    }
    Ok(values)
}

impl StageRecord {
    /// Input and output widths this record claims
    pub fn widths(&self) -> (usize, usize) {
        match self {
            StageRecord::Rescale { width, .. } | StageRecord::Dropout { width, .. } => {
                (*width, *width)
            }
            StageRecord::Lstm {
                input_width,
                hidden_width,
                ..
            } => (*input_width, *hidden_width),
            StageRecord::Projection {
                input_width,
                output_width,
                ..
            } => (*input_width, *output_width),
        }
    }

    /// Rebuild the stage, rejecting inconsistent parameters
    pub fn into_stage(self, device: &Device) -> Result<Box<dyn Stage>> {
        match self {
            StageRecord::Rescale { width, bias, scale } => {
                if width == 0 || !bias.is_finite() || !scale.is_finite() {
                    return Err(TalkError::InvalidModelData);
                }
                Ok(Box::new(RescaleStage::new(width, bias, scale)))
            }
            StageRecord::Lstm {
                input_width,
                hidden_width,
                w_ih,
                w_hh,
                bias,
            } => {
                if input_width == 0 || hidden_width == 0 {
                    return Err(TalkError::InvalidModelData);
                }
                let gates = 4 * hidden_width;
                Ok(Box::new(LstmCell::from_parts(
                    var_from_vec(checked(w_ih, gates * input_width)?, &[gates, input_width], device)?,
                    var_from_vec(checked(w_hh, gates * hidden_width)?, &[gates, hidden_width], device)?,
                    var_from_vec(checked(bias, gates)?, &[gates], device)?,
                )))
            }
            StageRecord::Dropout {
                width,
                keep_probability,
            } => {
                if width == 0 || !(keep_probability > 0.0 && keep_probability <= 1.0) {
                    return Err(TalkError::InvalidModelData);
                }
                Ok(Box::new(DropoutStage::new(width, keep_probability)))
            }
            StageRecord::Projection {
                input_width,
                output_width,
                activation,
                weight,
                bias,
            } => {
                if input_width == 0 || output_width == 0 {
                    return Err(TalkError::InvalidModelData);
                }
                let weight = checked(weight, output_width * input_width)?;
                let bias = checked(bias, output_width)?;
                Ok(Box::new(ProjectionStage {
                    weight: var_from_vec(weight, &[output_width, input_width], device)?,
                    bias: var_from_vec(bias, &[output_width], device)?,
                    activation,
                    training: false,
                }))
            }
        }
    }

    /// Feed the record's kind, shape and parameter bit patterns to a digest
    pub fn hash_into(&self, hasher: &mut Sha256) {
        fn floats(hasher: &mut Sha256, values: &[f32]) {
            hasher.update((values.len() as u64).to_le_bytes());
            for v in values {
                hasher.update(v.to_bits().to_le_bytes());
            }
        }
        fn sizes(hasher: &mut Sha256, values: &[usize]) {
            for v in values {
                hasher.update((*v as u64).to_le_bytes());
            }
        }

        match self {
            StageRecord::Rescale { width, bias, scale } => {
                hasher.update(b"rescale");
                sizes(hasher, &[*width]);
                floats(hasher, &[*bias, *scale]);
            }
            StageRecord::Lstm {
                input_width,
                hidden_width,
                w_ih,
                w_hh,
                bias,
            } => {
                hasher.update(b"lstm");
                sizes(hasher, &[*input_width, *hidden_width]);
                floats(hasher, w_ih);
                floats(hasher, w_hh);
                floats(hasher, bias);
            }
            StageRecord::Dropout {
                width,
                keep_probability,
            } => {
                hasher.update(b"dropout");
                sizes(hasher, &[*width]);
                hasher.update(keep_probability.to_bits().to_le_bytes());
            }
            StageRecord::Projection {
                input_width,
                output_width,
                activation,
                weight,
                bias,
            } => {
                hasher.update(b"projection");
                sizes(hasher, &[*input_width, *output_width]);
                hasher.update(match activation {
                    Activation::Sigmoid => b"sigmoid".as_slice(),
                    Activation::LogSoftmax => b"log_softmax".as_slice(),
                });
                floats(hasher, weight);
                floats(hasher, bias);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn row(values: &[f32]) -> Tensor {
        Tensor::from_vec(values.to_vec(), (1, values.len()), &Device::Cpu).unwrap()
    }

    fn out_vec(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_rescale_standardizes() {
        let stage = RescaleStage::standardizing(2, 1.0, 2.0);
        let (out, _) = stage.forward(&row(&[3.0, -1.0]), &StageState::Stateless).unwrap();
        let out = out_vec(&out);
        assert_abs_diff_eq!(out[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_stddev_is_unit_scale() {
        let stage = RescaleStage::standardizing(1, 0.5, 0.0);
        assert_eq!(stage.scale(), 1.0);
    }

    #[test]
    fn test_disabled_dropout_is_identity() {
        let mut stage = DropoutStage::new(3, 0.5);
        let input = row(&[1.0, 2.0, 3.0]);
        let (out, _) = stage.forward(&input, &StageState::Stateless).unwrap();
        assert_eq!(out_vec(&out), vec![1.0, 2.0, 3.0]);

        stage.set_enabled(true);
        let (out, _) = stage.forward(&row(&[1.0; 64]), &StageState::Stateless).unwrap();
        assert!(out_vec(&out).iter().all(|&x| x == 0.0 || (x - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_projection_heads() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut sigmoid = ProjectionStage::new(4, 3, Activation::Sigmoid, &mut rng, &Device::Cpu).unwrap();
        let input = row(&[5.0, -5.0, 2.0, 1.0]);

        let (out, _) = sigmoid.forward(&input, &StageState::Stateless).unwrap();
        assert!(out_vec(&out).iter().all(|&x| x > 0.0 && x < 1.0));

        sigmoid.set_training(true);
        let (raw, _) = sigmoid.forward(&input, &StageState::Stateless).unwrap();
        let squashed: Vec<f32> = out_vec(&raw).iter().map(|x| 1.0 / (1.0 + (-x).exp())).collect();
        for (a, b) in squashed.iter().zip(out_vec(&out)) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-5);
        }

        let mut softmax =
            ProjectionStage::new(4, 3, Activation::LogSoftmax, &mut rng, &Device::Cpu).unwrap();
        softmax.set_training(true);
        let (logp, _) = softmax.forward(&input, &StageState::Stateless).unwrap();
        let total: f32 = out_vec(&logp).iter().map(|x| x.exp()).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_projection_record_round_trip() {
        let mut rng = StdRng::seed_from_u64(9);
        let stage = ProjectionStage::new(2, 5, Activation::LogSoftmax, &mut rng, &Device::Cpu).unwrap();
        let record = stage.to_record().unwrap();
        assert_eq!(record.widths(), (2, 5));

        let rebuilt = record.clone().into_stage(&Device::Cpu).unwrap();
        assert_eq!(rebuilt.to_record().unwrap(), record);
    }

    #[test]
    fn test_short_parameter_list_rejected() {
        let record = StageRecord::Projection {
            input_width: 2,
            output_width: 2,
            activation: Activation::Sigmoid,
            weight: vec![0.0; 3],
            bias: vec![0.0; 2],
        };
        assert!(matches!(
            record.into_stage(&Device::Cpu),
            Err(TalkError::InvalidModelData)
        ));
    }
}
