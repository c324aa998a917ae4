//! Training loop

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::bptt::Bptt;
use super::cost::{self, CostFunction};
use super::optim::{self, Optimizer};
use crate::config::TrainingConfig;
use crate::error::{Result, TalkError};
use crate::model::{Runner, Talker};
use crate::samples::{SampleSet, TargetKind};

/// Costs observed in one training iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    /// 1-based iteration number
    pub iteration: usize,
    /// Summed cost of a fresh validation draw, measured in inference mode
    pub validation_cost: f64,
    /// Summed cost of the batch the gradient came from
    pub batch_cost: f64,
}

pub struct Trainer {
    config: TrainingConfig,
    rng: StdRng,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    /// Whether dropout is active while computing gradients
    pub fn dropout_enabled(&self, kind: TargetKind) -> bool {
        self.config
            .dropout
            .unwrap_or(kind == TargetKind::Categorical)
    }

    /// Train until `on_iteration` returns `false` or the configured
    /// iteration limit is hit. Returns the number of completed iterations.
    ///
    /// The talker is left in inference mode.
    pub fn train<F>(
        &mut self,
        talker: &mut Talker,
        set: &dyn SampleSet,
        step_size: f64,
        mut on_iteration: F,
    ) -> Result<usize>
    where
        F: FnMut(&IterationReport, &Talker) -> Result<bool>,
    {
        if set.is_empty() {
            return Err(TalkError::EmptyBuffer);
        }

        let kind = talker.codec.target_kind();
        let dropout = self.dropout_enabled(kind);
        let cost: Box<dyn CostFunction> = cost::for_target(kind);
        let mut optimizer: Box<dyn Optimizer> = optim::from_config(&self.config);
        let bptt = Bptt::new(self.config.max_lanes);
        let vars = talker.block.vars();

        info!(
            "Training on {} sequences: {} cost, {} optimizer, step size {}, dropout {}",
            set.len(),
            cost.name(),
            optimizer.name(),
            step_size,
            if dropout { "on" } else { "off" }
        );

        let mut iteration = 0;
        let result = loop {
            if let Some(max) = self.config.max_iterations {
                if iteration >= max {
                    break Ok(iteration);
                }
            }
            iteration += 1;

            talker.set_dropout(dropout);
            talker.set_training(self.config.bypass_saturation);

            let batch = (0..self.config.batch_size)
                .map(|_| set.sequence(self.rng.gen_range(0..set.len())))
                .collect::<Result<Vec<_>>>();
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => break Err(e),
            };
            let gradient = match bptt.gradient(&talker.block, cost.as_ref(), &batch) {
                Ok(gradient) => gradient,
                Err(e) => break Err(e),
            };
            if !gradient.cost.is_finite() {
                warn!("Iteration {}: batch cost is {}", iteration, gradient.cost);
            }
            if let Err(e) = optimizer.step(&vars, &gradient.grads, step_size) {
                break Err(e);
            }

            talker.set_dropout(false);
            talker.set_training(false);
            let validation_cost = match Runner::total_cost(
                &talker.block,
                self.config.validation_batch_size,
                set,
                cost.as_ref(),
                &mut self.rng,
            ) {
                Ok(cost) => cost,
                Err(e) => break Err(e),
            };

            let report = IterationReport {
                iteration,
                validation_cost,
                batch_cost: gradient.cost,
            };
            info!(
                "Iteration {}: cost={} last={}",
                report.iteration, report.validation_cost, report.batch_cost
            );

            match on_iteration(&report, talker) {
                Ok(true) => {}
                Ok(false) => break Ok(iteration),
                Err(e) => break Err(e),
            }
        };

        talker.set_dropout(false);
        talker.set_training(false);
        result
    }
}
