//! Routine-level driver: meshes every function of a routine in parallel.
//!
//! Functions share no mutable state, so each rayon worker owns one function for the
//! duration of its pass, with its own [`Chooser`] derived from the seed and the function
//! identifier. A function is meshed on a copy that replaces the original only when the
//! pass succeeds; failed and cancelled functions are reported and left untouched.

use crate::budget::MeshBudget;
use crate::mesh::Mesh;
use crate::pass::{DefaultPass, Pass};
use crate::{MeshConfig, Transform};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tacmesh_analysis::metrics::{CfgMetrics, collect_metrics, compare};
use tacmesh_core::Ident;
use tacmesh_core::choice::Chooser;
use tacmesh_core::il::{Function, Routine, TraceEvent};
use tacmesh_core::seed::Seed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for the obfuscation pipeline
#[derive(Debug, Clone)]
pub struct ObfuscationConfig {
    /// Seed every random decision derives from
    pub seed: Seed,
    /// Meshing engine tuning
    pub mesh: MeshConfig,
    /// Wall-clock limit for the whole routine
    pub deadline: Option<Duration>,
    /// Cancels meshing of every function still in progress
    pub cancel: CancellationToken,
}

impl ObfuscationConfig {
    /// Create config with a specific seed
    pub fn with_seed(seed: Seed) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            seed: Seed::generate(),
            mesh: MeshConfig::default(),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Outcome of meshing one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FunctionStatus {
    Meshed,
    Unchanged,
    Failed(String),
    Cancelled(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionReport {
    pub id: Ident,
    pub label: String,
    pub status: FunctionStatus,
    pub before: Option<CfgMetrics>,
    pub after: Option<CfgMetrics>,
    /// Potency change between `before` and `after`
    pub potency_delta: f64,
    /// Mutations applied to the function
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceEvent>,
}

/// Result of the obfuscation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObfuscationReport {
    /// Hex form of the seed used
    pub seed: String,
    pub functions: Vec<FunctionReport>,
}

impl ObfuscationReport {
    pub fn meshed(&self) -> usize {
        self.count(|status| *status == FunctionStatus::Meshed)
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, FunctionStatus::Failed(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|status| matches!(status, FunctionStatus::Cancelled(_)))
    }

    fn count(&self, pred: impl Fn(&FunctionStatus) -> bool) -> usize {
        self.functions.iter().filter(|f| pred(&f.status)).count()
    }
}

/// Meshes every function of `routine` in place.
pub fn obfuscate_routine(routine: &mut Routine, config: &ObfuscationConfig) -> ObfuscationReport {
    let budget = MeshBudget::new(config.deadline, config.cancel.clone());
    let transforms: Vec<Box<dyn Transform>> = vec![Box::new(Mesh::new(config.mesh.clone()))];

    debug!(
        "meshing {} functions with seed {}",
        routine.functions.len(),
        config.seed.to_hex()
    );

    let functions = routine
        .functions
        .par_iter_mut()
        .map(|func| obfuscate_function(func, &transforms, &config.seed, &budget))
        .collect();

    ObfuscationReport {
        seed: config.seed.to_hex(),
        functions,
    }
}

/// Meshes one function, committing the result only on success.
pub fn obfuscate_function(
    func: &mut Function,
    transforms: &[Box<dyn Transform>],
    seed: &Seed,
    budget: &MeshBudget,
) -> FunctionReport {
    let mut report = FunctionReport {
        id: func.id,
        label: func.external_label.clone(),
        status: FunctionStatus::Unchanged,
        before: None,
        after: None,
        potency_delta: 0.0,
        trace: Vec::new(),
    };

    let before = match collect_metrics(func) {
        Ok(metrics) => metrics,
        Err(e) => {
            warn!("{}: skipped, {}", func.external_label, e);
            report.status = FunctionStatus::Failed(e.to_string());
            return report;
        }
    };

    let mut chooser = Chooser::for_function(seed, func);
    let mut working = func.clone();
    match DefaultPass.run(&mut working, transforms, &mut chooser, budget) {
        Ok(()) => {
            let trace = working.take_trace();
            if !trace.is_empty() {
                report.status = FunctionStatus::Meshed;
            }
            report.after = collect_metrics(&working).ok();
            if let Some(after) = &report.after {
                report.potency_delta = compare(&before, after);
            }
            report.trace = trace;
            *func = working;
        }
        Err(e) if e.is_abort() => {
            warn!("{}: {}, function left unchanged", func.external_label, e);
            report.status = FunctionStatus::Cancelled(e.to_string());
        }
        Err(e) => {
            warn!("{}: {}, function left unchanged", func.external_label, e);
            report.status = FunctionStatus::Failed(e.to_string());
        }
    }
    report.before = Some(before);
    report
}
