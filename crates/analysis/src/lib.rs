pub mod interp;
pub mod metrics;
pub mod validate;
pub use metrics::{CfgMetrics, collect_metrics, compare};

use thiserror::Error;

/// Error type for analysis of a routine.
#[derive(Debug, Error)]
pub enum Error {
    /// CFG is empty.
    #[error("CFG is empty")]
    EmptyCfg,
    /// The interpreter ran longer than its step limit.
    #[error("step limit of {0} exceeded")]
    StepLimit(usize),
    /// The interpreter hit an operation it cannot perform.
    #[error("execution failed: {0}")]
    Execution(String),
    /// A structural rule of the IL does not hold.
    #[error("invalid structure: {0}")]
    Structure(String),
    #[error(transparent)]
    Core(#[from] tacmesh_core::Error),
}

/// Analysis result type
pub type Result<T> = std::result::Result<T, Error>;
