//! Module for the `mesh` subcommand, which meshes every function of a routine and lowers
//! the result to assembly.
//!
//! Meshing runs on the blocking pool; Ctrl-C cancels the functions still in progress,
//! which are then emitted unchanged.

use super::{CliError, load_routine, write_output};
use async_trait::async_trait;
use clap::Args;
use std::error::Error;
use std::fs;
use std::time::Duration;
use tacmesh_analysis::validate::{validate, validate_guards};
use tacmesh_core::emitter::emit_routine;
use tacmesh_core::il::Routine;
use tacmesh_core::seed::Seed;
use tacmesh_transform::MeshConfig;
use tacmesh_transform::obfuscator::{
    FunctionStatus, ObfuscationConfig, ObfuscationReport, obfuscate_routine,
};
use tracing::{info, warn};

/// Arguments for the `mesh` subcommand.
#[derive(Args)]
pub struct MeshArgs {
    /// Routine document (JSON).
    pub input: String,
    /// Seed for deterministic meshing, 64 hex digits (random when omitted)
    #[arg(long)]
    seed: Option<String>,
    /// Fraction of control-flow transitions to mesh, in [0, 1]
    #[arg(long)]
    ratio: Option<f64>,
    /// Number of generated tests per conditional chain
    #[arg(long)]
    chain_length: Option<usize>,
    /// Do not insert fake lanes
    #[arg(long)]
    no_fake: bool,
    /// Do not insert dead lanes
    #[arg(long)]
    no_dead: bool,
    /// Do not expand conditional jumps
    #[arg(long)]
    no_conditionals: bool,
    /// Abort meshing of functions still running after this many milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
    /// Mesh configuration as JSON; flags override its fields
    #[arg(long, value_name = "FILE")]
    config: Option<String>,
    /// Path to write the meshed routine document (JSON)
    #[arg(long, value_name = "FILE")]
    emit_il: Option<String>,
    /// Path to write the per-function report with its mutation trace (JSON)
    #[arg(long, value_name = "FILE")]
    emit_trace: Option<String>,
    /// Output file for the assembly (default: stdout)
    #[arg(short, long)]
    output: Option<String>,
}

impl MeshArgs {
    fn mesh_config(&self) -> Result<MeshConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
            None => MeshConfig::default(),
        };
        if let Some(ratio) = self.ratio {
            config.cft_ratio = ratio;
        }
        if let Some(length) = self.chain_length {
            config.chain_length = length;
        }
        config.fake_lanes &= !self.no_fake;
        config.dead_lanes &= !self.no_dead;
        config.expand_conditionals &= !self.no_conditionals;

        if !(0.0..=1.0).contains(&config.cft_ratio) {
            return Err(CliError::InvalidArgument(format!(
                "ratio {} is outside [0, 1]",
                config.cft_ratio
            )));
        }
        if config.guard_constant_max < 1 {
            return Err(CliError::InvalidArgument(
                "guard_constant_max must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}

/// Executes the `mesh` subcommand.
#[async_trait]
impl super::Command for MeshArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let mut routine = load_routine(&self.input)?;
        let original = routine.clone();

        let mut config = match &self.seed {
            Some(seed_hex) => ObfuscationConfig::with_seed(Seed::from_hex(seed_hex)?),
            None => ObfuscationConfig::default(),
        };
        config.mesh = self.mesh_config()?;
        config.deadline = self.timeout_ms.map(Duration::from_millis);

        let cancel = config.cancel.clone();
        let mut job = tokio::task::spawn_blocking(move || {
            let report = obfuscate_routine(&mut routine, &config);
            (routine, report)
        });
        let (routine, report) = tokio::select! {
            done = &mut job => done?,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, cancelling the functions still being meshed");
                cancel.cancel();
                job.await?
            }
        };

        check_meshed(&routine, &original, &report)?;
        print_summary(&report);

        if let Some(path) = &self.emit_il {
            fs::write(path, routine.to_document().to_json()?)?;
            info!("wrote meshed IL to {path}");
        }
        if let Some(path) = &self.emit_trace {
            fs::write(path, serde_json::to_string_pretty(&report)?)?;
            info!("wrote meshing report to {path}");
        }

        let asm = emit_routine(&routine)?;
        write_output(self.output.as_deref(), &asm)?;
        Ok(())
    }
}

/// Re-checks the structure and guards of every meshed function.
fn check_meshed(
    routine: &Routine,
    original: &Routine,
    report: &ObfuscationReport,
) -> Result<(), Box<dyn Error>> {
    for entry in &report.functions {
        if entry.status != FunctionStatus::Meshed {
            continue;
        }
        let (Some(meshed), Some(before)) =
            (routine.function(&entry.id), original.function(&entry.id))
        else {
            continue;
        };
        validate(meshed)?;
        validate_guards(meshed, before)?;
    }
    Ok(())
}

fn print_summary(report: &ObfuscationReport) {
    eprintln!("seed {}", report.seed);
    for entry in &report.functions {
        let status = match &entry.status {
            FunctionStatus::Meshed => "meshed".to_string(),
            FunctionStatus::Unchanged => "unchanged".to_string(),
            FunctionStatus::Failed(reason) => format!("failed: {reason}"),
            FunctionStatus::Cancelled(reason) => format!("cancelled: {reason}"),
        };
        match (&entry.before, &entry.after) {
            (Some(before), Some(after)) => eprintln!(
                "{:<24} {:>4} -> {:<4} blocks {:>4} -> {:<4} edges  Δ{:+.2}  {}",
                entry.label,
                before.block_cnt,
                after.block_cnt,
                before.edge_cnt,
                after.edge_cnt,
                entry.potency_delta,
                status
            ),
            _ => eprintln!("{:<24} {}", entry.label, status),
        }
    }
    eprintln!(
        "{} meshed, {} failed, {} cancelled",
        report.meshed(),
        report.failed(),
        report.cancelled()
    );
}
