//! LSTM cell
//!
//! Gate layout in the stacked weight matrices is input, forget, candidate,
//! output:
//!
//! ```text
//! [i f g o] = x W_ihᵀ + h W_hhᵀ + b
//! c' = σ(f)·c + σ(i)·tanh(g)
//! h' = σ(o)·tanh(c')
//! ```

use candle_core::{DType, Device, Tensor, Var};
use rand::Rng;

use super::stage::{random_var, var_to_vec, Stage, StageRecord, StageState};
use crate::error::{Result, TalkError};

#[derive(Debug, Clone)]
pub struct LstmCell {
    /// `4H x I`
    w_ih: Var,
    /// `4H x H`
    w_hh: Var,
    /// `4H`
    bias: Var,
}

impl LstmCell {
    /// Fresh cell with N(0, 1/fan_in) weights and the given gate biases
    pub fn new<R: Rng + ?Sized>(
        input_width: usize,
        hidden_width: usize,
        input_gate_bias: f32,
        output_gate_bias: f32,
        rng: &mut R,
        device: &Device,
    ) -> Result<Self> {
        let gates = 4 * hidden_width;
        let mut bias = vec![0.0f32; gates];
        bias[..hidden_width].fill(input_gate_bias);
        bias[3 * hidden_width..].fill(output_gate_bias);

        Ok(Self {
            w_ih: random_var(gates, input_width, input_width, rng, device)?,
            w_hh: random_var(gates, hidden_width, hidden_width, rng, device)?,
            bias: Var::from_tensor(&Tensor::from_vec(bias, gates, device)?)?,
        })
    }

    pub(crate) fn from_parts(w_ih: Var, w_hh: Var, bias: Var) -> Self {
        Self { w_ih, w_hh, bias }
    }

    pub fn hidden_width(&self) -> usize {
        self.w_hh.as_tensor().dims()[1]
    }
}

impl Stage for LstmCell {
    fn stage_type(&self) -> &'static str {
        "lstm"
    }

    fn input_width(&self) -> usize {
        self.w_ih.as_tensor().dims()[1]
    }

    fn output_width(&self) -> usize {
        self.hidden_width()
    }

    fn zero_state(&self, lanes: usize, device: &Device) -> Result<StageState> {
        let shape = (lanes, self.hidden_width());
        Ok(StageState::Recurrent {
            hidden: Tensor::zeros(shape, DType::F32, device)?,
            cell: Tensor::zeros(shape, DType::F32, device)?,
        })
    }

    fn forward(&self, input: &Tensor, state: &StageState) -> Result<(Tensor, StageState)> {
        let StageState::Recurrent { hidden, cell } = state else {
            return Err(TalkError::DimensionMismatch {
                expected: 2 * self.hidden_width(),
                actual: 0,
            });
        };

        let gates = input
            .matmul(&self.w_ih.as_tensor().t()?)?
            .add(&hidden.matmul(&self.w_hh.as_tensor().t()?)?)?
            .broadcast_add(self.bias.as_tensor())?;
        let chunks = gates.chunk(4, 1)?;
        let input_gate = candle_nn::ops::sigmoid(&chunks[0])?;
        let forget_gate = candle_nn::ops::sigmoid(&chunks[1])?;
        let candidate = chunks[2].tanh()?;
        let output_gate = candle_nn::ops::sigmoid(&chunks[3])?;

        let next_cell = forget_gate.mul(cell)?.add(&input_gate.mul(&candidate)?)?;
        let next_hidden = output_gate.mul(&next_cell.tanh()?)?;

        Ok((
            next_hidden.clone(),
            StageState::Recurrent {
                hidden: next_hidden,
                cell: next_cell,
            },
        ))
    }

    fn vars(&self) -> Vec<Var> {
        vec![self.w_ih.clone(), self.w_hh.clone(), self.bias.clone()]
    }

    fn to_record(&self) -> Result<StageRecord> {
        Ok(StageRecord::Lstm {
            input_width: self.input_width(),
            hidden_width: self.hidden_width(),
            w_ih: var_to_vec(&self.w_ih)?,
            w_hh: var_to_vec(&self.w_hh)?,
            bias: var_to_vec(&self.bias)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sigmoid(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn test_gate_biases() {
        let mut rng = StdRng::seed_from_u64(1);
        let cell = LstmCell::new(3, 2, -1.0, -2.0, &mut rng, &Device::Cpu).unwrap();
        let bias = var_to_vec(&cell.bias).unwrap();
        assert_eq!(bias, vec![-1.0, -1.0, 0.0, 0.0, 0.0, 0.0, -2.0, -2.0]);
    }

    #[test]
    fn test_step_matches_hand_computation() {
        // Input width 1, hidden width 1: every gate sees w_ih*x + w_hh*h + b.
        let device = Device::Cpu;
        let cell = LstmCell::from_parts(
            Var::from_tensor(&Tensor::new(&[[0.5f32], [1.0], [2.0], [-1.0]], &device).unwrap())
                .unwrap(),
            Var::from_tensor(&Tensor::new(&[[0.1f32], [0.2], [0.3], [0.4]], &device).unwrap())
                .unwrap(),
            Var::from_tensor(&Tensor::new(&[0.0f32, 0.0, 0.0, 0.0], &device).unwrap()).unwrap(),
        );

        let x = Tensor::new(&[[1.0f32]], &device).unwrap();
        let state = StageState::Recurrent {
            hidden: Tensor::new(&[[0.5f32]], &device).unwrap(),
            cell: Tensor::new(&[[0.25f32]], &device).unwrap(),
        };
        let (out, next) = cell.forward(&x, &state).unwrap();

        let i = sigmoid(0.5 + 0.05);
        let f = sigmoid(1.0 + 0.1);
        let g = (2.0f32 + 0.15).tanh();
        let o = sigmoid(-1.0 + 0.2);
        let c = f * 0.25 + i * g;
        let h = o * c.tanh();

        let out = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_abs_diff_eq!(out[0], h, epsilon = 1e-5);
        let StageState::Recurrent { cell: next_cell, .. } = next else {
            panic!("lstm state must stay recurrent");
        };
        let next_cell = next_cell.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_abs_diff_eq!(next_cell[0], c, epsilon = 1e-5);
    }

    #[test]
    fn test_zero_state_shape() {
        let mut rng = StdRng::seed_from_u64(2);
        let cell = LstmCell::new(4, 6, -1.0, -2.0, &mut rng, &Device::Cpu).unwrap();
        let state = cell.zero_state(3, &Device::Cpu).unwrap();
        assert_eq!(state.width(), 12);
        let StageState::Recurrent { hidden, .. } = state else {
            panic!("lstm state must be recurrent");
        };
        assert_eq!(hidden.dims(), &[3, 6]);
    }
}
