use async_trait::async_trait;
use clap::Subcommand;
use std::error::Error;
use std::path::Path;
use tacmesh_core::document::RoutineDoc;
use tacmesh_core::il::{Function, Routine};

pub mod cfg;
pub mod emit;
pub mod mesh;
pub mod run;

use thiserror::Error;

/// Errors raised by the CLI itself, as opposed to the libraries it drives.
#[derive(Debug, Error)]
pub enum CliError {
    /// No function of the routine carries the requested label.
    #[error("no function labelled '{0}'")]
    UnknownFunction(String),
    /// The routine holds no function at all.
    #[error("routine has no functions")]
    EmptyRoutine,
    /// A flag value is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The meshed and original programs disagree on an observable result.
    #[error("behaviour of {0} changed after meshing")]
    Diverged(String),
    /// File read/write error.
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// CLI subcommands for TacMesh.
#[derive(Subcommand)]
pub enum Cmd {
    /// Mesh a routine and lower it to assembly.
    Mesh(mesh::MeshArgs),
    /// Lower a routine to assembly without meshing it.
    Emit(emit::EmitArgs),
    /// Write a function's CFG as Graphviz dot.
    Cfg(cfg::CfgArgs),
    /// Interpret a function of a routine.
    Run(run::RunArgs),
}

/// Trait for executing CLI subcommands.
///
/// Implementors load a routine document and produce their output (assembly, dot graph,
/// interpreter trace) on stdout or in a file.
#[async_trait]
pub trait Command {
    /// Executes the subcommand.
    ///
    /// # Returns
    /// A `Result` indicating success or an error if execution fails.
    async fn execute(self) -> Result<(), Box<dyn Error>>;
}

#[async_trait]
impl Command for Cmd {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Mesh(args) => args.execute().await,
            Cmd::Emit(args) => args.execute().await,
            Cmd::Cfg(args) => args.execute().await,
            Cmd::Run(args) => args.execute().await,
        }
    }
}

/// Reads a routine document from `path` and builds its IL.
pub(crate) fn load_routine(path: impl AsRef<Path>) -> Result<Routine, Box<dyn Error>> {
    let doc = RoutineDoc::from_file(path)?;
    Ok(Routine::from_document(&doc)?)
}

/// The function labelled `label`, or the first function when no label is given.
pub(crate) fn select_function<'r>(
    routine: &'r Routine,
    label: Option<&str>,
) -> Result<&'r Function, CliError> {
    match label {
        Some(label) => routine
            .function_by_label(label)
            .ok_or_else(|| CliError::UnknownFunction(label.to_string())),
        None => routine.functions.first().ok_or(CliError::EmptyRoutine),
    }
}

/// Writes `content` to `output`, or to stdout when no path is given.
pub(crate) fn write_output(output: Option<&str>, content: &str) -> Result<(), CliError> {
    match output {
        Some(path) => std::fs::write(path, content)?,
        None => println!("{content}"),
    }
    Ok(())
}
