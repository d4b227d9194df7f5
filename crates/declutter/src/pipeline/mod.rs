pub mod error;
pub mod runner;

pub use error::PipelineError;
pub use runner::{narration_script, Disposition, Pipeline, ProcessOutcome};
