pub mod budget;
pub mod mesh;
pub mod obfuscator;
pub mod pass;

use budget::MeshBudget;
use serde::{Deserialize, Serialize};
use tacmesh_analysis::Error as MetricsError;
use tacmesh_core::choice::Chooser;
use tacmesh_core::il::Function;
use thiserror::Error;

/// Transform error type encompassing all transform module errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A graph primitive or decoder failed.
    #[error("core operation failed: {0}")]
    Core(#[from] tacmesh_core::Error),

    /// Metrics computation failed.
    #[error("metrics computation failed: {0}")]
    Metrics(#[from] MetricsError),

    /// The caller cancelled the pass.
    #[error("meshing cancelled")]
    Cancelled,

    /// The pass ran past its deadline.
    #[error("meshing deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Whether the error is an abort requested from outside rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

/// Transform result type
pub type Result<T> = std::result::Result<T, Error>;

/// A control-flow transform applied to one function at a time.
pub trait Transform: Send + Sync {
    /// Returns the transform's name for logging and identification.
    fn name(&self) -> &'static str;
    /// Applies the transform, returning whether the function changed.
    fn apply(&self, func: &mut Function, chooser: &mut Chooser, budget: &MeshBudget)
    -> Result<bool>;
}

/// Tuning of the meshing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Fraction of control-flow transitions to mesh
    pub cft_ratio: f64,
    /// Insert decoy lanes around unconditional jumps
    pub fake_lanes: bool,
    /// Insert dead lanes around unconditional jumps
    pub dead_lanes: bool,
    /// Expand conditional jumps into test chains
    pub expand_conditionals: bool,
    /// Number of generated tests per conditional chain
    pub chain_length: usize,
    /// Upper bound of random guard constants
    pub guard_constant_max: i64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            cft_ratio: 1.0,
            fake_lanes: true,
            dead_lanes: true,
            expand_conditionals: true,
            chain_length: 6,
            guard_constant_max: 100,
        }
    }
}
