use clap::Parser;
use tacmesh_cli::commands::{Cmd, Command};

/// TacMesh CLI
///
/// TacMesh obscures the control flow of three-address-code routines by meshing their
/// jumps with fake and dead lanes and expanding their conditionals into test chains, then
/// lowers the result to x86 assembly
#[derive(Parser)]
#[command(name = "tacmesh")]
#[command(about = "TacMesh: TAC control-flow meshing")]
struct Cli {
    /// Log every lane and chain inserted
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Cmd,
}

/// Runs the TacMesh CLI with the provided arguments.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    cli.command.execute().await
}
