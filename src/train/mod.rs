//! Training
//!
//! Cost functions, the batched BPTT gradient, optimizers and the loop that
//! ties them together with periodic validation.

pub mod bptt;
pub mod cost;
pub mod optim;
pub mod trainer;

pub use bptt::{Bptt, Gradient};
pub use cost::{CostFunction, CrossEntropyCost, MeanSquaredCost};
pub use optim::{AdaGrad, Optimizer, RmsProp, Sgd};
pub use trainer::{IterationReport, Trainer};
