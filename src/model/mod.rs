//! Recurrent model
//!
//! Stages, the stacked block built from them, the trained [`Talker`]
//! artifact, its persisted form and the step-wise [`Runner`].

pub mod block;
pub mod lstm;
pub mod runner;
pub mod stage;
pub mod store;
pub mod talker;

pub use block::StackedBlock;
pub use lstm::LstmCell;
pub use runner::Runner;
pub use stage::{
    Activation, DropoutStage, ProjectionStage, RescaleStage, Stage, StageRecord, StageState,
};
pub use store::{load_talker, save_talker, serialize_talker, DeserializerRegistry, Field};
pub use talker::{build_block, Talker};
