//! Module for the `emit` subcommand, which lowers a routine to assembly as it is.

use super::{load_routine, write_output};
use async_trait::async_trait;
use clap::Args;
use std::error::Error;
use tacmesh_core::emitter::emit_routine;

/// Arguments for the `emit` subcommand.
#[derive(Args)]
pub struct EmitArgs {
    /// Routine document (JSON).
    pub input: String,
    /// Output file for the assembly (default: stdout)
    #[arg(short, long)]
    output: Option<String>,
}

#[async_trait]
impl super::Command for EmitArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let routine = load_routine(&self.input)?;
        let asm = emit_routine(&routine)?;
        write_output(self.output.as_deref(), &asm)?;
        Ok(())
    }
}
