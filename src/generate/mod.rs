//! Audio generation from a trained model

pub mod generator;
pub mod sampler;

pub use generator::Generator;
pub use sampler::{choose_index, CategoricalSampler};
