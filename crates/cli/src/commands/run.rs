//! Module for the `run` subcommand, which interprets one function of a routine.
//!
//! With `--mesh-seed` the routine is also meshed with that seed and run again; the command
//! fails if the two runs observe different results.

use super::{CliError, load_routine, select_function};
use async_trait::async_trait;
use clap::Args;
use std::error::Error;
use tacmesh_analysis::interp::{DEFAULT_STEP_LIMIT, Interpreter};
use tacmesh_core::seed::Seed;
use tacmesh_transform::obfuscator::{ObfuscationConfig, obfuscate_routine};
use tracing::info;

/// Arguments for the `run` subcommand.
#[derive(Args)]
pub struct RunArgs {
    /// Routine document (JSON).
    pub input: String,
    /// External label of the function to run (default: the first function)
    #[arg(short, long)]
    function: Option<String>,
    /// Comma-separated argument values, bound to the inputs in declaration order
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    args: Vec<i64>,
    /// Also run a copy meshed with this seed and compare the observations
    #[arg(long, value_name = "HEX")]
    mesh_seed: Option<String>,
    /// Maximum number of instructions executed
    #[arg(long, default_value_t = DEFAULT_STEP_LIMIT)]
    step_limit: usize,
}

#[async_trait]
impl super::Command for RunArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let routine = load_routine(&self.input)?;
        let label = select_function(&routine, self.function.as_deref())?
            .external_label
            .clone();

        let trace = Interpreter::new(&routine)
            .with_step_limit(self.step_limit)
            .run(&label, &self.args)?;
        println!("{}", serde_json::to_string_pretty(&trace)?);

        if let Some(seed_hex) = &self.mesh_seed {
            let mut meshed = routine.clone();
            let config = ObfuscationConfig::with_seed(Seed::from_hex(seed_hex)?);
            let report = obfuscate_routine(&mut meshed, &config);
            info!("{} of {} functions meshed", report.meshed(), report.functions.len());

            let after = Interpreter::new(&meshed)
                .with_step_limit(self.step_limit)
                .run(&label, &self.args)?;
            println!("{}", serde_json::to_string_pretty(&after)?);
            if after.observed != trace.observed {
                return Err(CliError::Diverged(label).into());
            }
            info!(
                "{label}: same observation after meshing ({} -> {} steps)",
                trace.steps, after.steps
            );
        }
        Ok(())
    }
}
