//! Adaptive step rules
//!
//! Optimizers keep per-variable state indexed by position in the variable
//! list, so the list must be passed in the same order on every step.

use candle_core::{Tensor, Var};

use crate::config::{OptimizerKind, TrainingConfig};
use crate::error::Result;

pub trait Optimizer: Send {
    fn name(&self) -> &'static str;

    /// Descend along `grads` by `step_size`; `None` gradients are skipped
    fn step(&mut self, vars: &[Var], grads: &[Option<Tensor>], step_size: f64) -> Result<()>;
}

fn descend(var: &Var, direction: &Tensor, step_size: f64) -> Result<()> {
    let updated = var.as_tensor().sub(&direction.affine(step_size, 0.0)?)?;
    var.set(&updated.detach())?;
    Ok(())
}

fn grow_state(state: &mut Vec<Option<Tensor>>, len: usize) {
    if state.len() < len {
        state.resize(len, None);
    }
}

/// Plain gradient descent
#[derive(Debug, Clone, Copy, Default)]
pub struct Sgd;

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "sgd"
    }

    fn step(&mut self, vars: &[Var], grads: &[Option<Tensor>], step_size: f64) -> Result<()> {
        for (var, grad) in vars.iter().zip(grads) {
            if let Some(grad) = grad {
                descend(var, grad, step_size)?;
            }
        }
        Ok(())
    }
}

/// Divides each step by the root of the summed squared gradients seen so far
#[derive(Debug, Clone)]
pub struct AdaGrad {
    damping: f64,
    squares: Vec<Option<Tensor>>,
}

impl AdaGrad {
    pub fn new(damping: f64) -> Self {
        Self {
            damping,
            squares: Vec::new(),
        }
    }
}

impl Optimizer for AdaGrad {
    fn name(&self) -> &'static str {
        "adagrad"
    }

    fn step(&mut self, vars: &[Var], grads: &[Option<Tensor>], step_size: f64) -> Result<()> {
        grow_state(&mut self.squares, vars.len());
        for (i, (var, grad)) in vars.iter().zip(grads).enumerate() {
            let Some(grad) = grad else { continue };
            let square = grad.sqr()?;
            let sum = match self.squares[i].take() {
                Some(prev) => prev.add(&square)?,
                None => square,
            };
            let direction = grad.div(&sum.sqrt()?.affine(1.0, self.damping)?)?;
            descend(var, &direction, step_size)?;
            self.squares[i] = Some(sum);
        }
        Ok(())
    }
}

/// Divides each step by the root of a decaying average of squared gradients
#[derive(Debug, Clone)]
pub struct RmsProp {
    memory: f64,
    damping: f64,
    averages: Vec<Option<Tensor>>,
}

impl RmsProp {
    pub fn new(memory: f64, damping: f64) -> Self {
        Self {
            memory,
            damping,
            averages: Vec::new(),
        }
    }
}

impl Optimizer for RmsProp {
    fn name(&self) -> &'static str {
        "rmsprop"
    }

    fn step(&mut self, vars: &[Var], grads: &[Option<Tensor>], step_size: f64) -> Result<()> {
        grow_state(&mut self.averages, vars.len());
        for (i, (var, grad)) in vars.iter().zip(grads).enumerate() {
            let Some(grad) = grad else { continue };
            let square = grad.sqr()?;
            let average = match self.averages[i].take() {
                Some(prev) => prev
                    .affine(self.memory, 0.0)?
                    .add(&square.affine(1.0 - self.memory, 0.0)?)?,
                None => square,
            };
            let direction = grad.div(&average.sqrt()?.affine(1.0, self.damping)?)?;
            descend(var, &direction, step_size)?;
            self.averages[i] = Some(average);
        }
        Ok(())
    }
}

/// Optimizer selected by the training configuration
pub fn from_config(config: &TrainingConfig) -> Box<dyn Optimizer> {
    match config.optimizer {
        OptimizerKind::AdaGrad => Box::new(AdaGrad::new(config.damping)),
        OptimizerKind::RmsProp => Box::new(RmsProp::new(config.rms_memory, config.damping)),
        OptimizerKind::Sgd => Box::new(Sgd),
    }
}
