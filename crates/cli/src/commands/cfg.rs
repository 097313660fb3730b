//! This module builds the IL of a routine document and generates a Graphviz .dot file
//! representing one function's CFG. The output can be written to a file or printed to
//! stdout.

use super::{load_routine, select_function, write_output};
use async_trait::async_trait;
use clap::Args;
use std::error::Error;
use std::fmt::Write as _;
use tacmesh_core::il::Function;

/// Arguments for the `cfg` subcommand.
#[derive(Args)]
pub struct CfgArgs {
    /// Routine document (JSON).
    pub input: String,
    /// External label of the function to draw (default: the first function)
    #[arg(short, long)]
    function: Option<String>,
    /// Output file for Graphviz .dot (default: stdout)
    #[arg(short, long)]
    output: Option<String>,
}

/// Executes the `cfg` subcommand to generate a CFG visualization.
#[async_trait]
impl super::Command for CfgArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let routine = load_routine(&self.input)?;
        let func = select_function(&routine, self.function.as_deref())?;
        let dot = generate_dot(func)?;
        write_output(self.output.as_deref(), &dot)?;
        Ok(())
    }
}

/// Generates a Graphviz .dot representation of the CFG.
///
/// # Arguments
/// * `func` - The function whose CFG to visualize.
///
/// # Returns
/// A `String` containing the .dot file content. Dead blocks are drawn dashed.
pub fn generate_dot(func: &Function) -> Result<String, Box<dyn Error>> {
    let mut dot = String::from("digraph CFG {\n    node [shape=box, fontname=monospace];\n");

    // Add nodes
    for (node, block) in func.blocks() {
        let instrs: Vec<String> = block
            .instructions
            .iter()
            .map(|inst| {
                let text = inst.text.replace('"', "\\\"");
                if inst.poly_required {
                    format!("{text} [poly]")
                } else {
                    text
                }
            })
            .collect();
        let style = if block.dead { ", style=dashed" } else { "" };
        writeln!(
            dot,
            "    {} [label=\"{}\\l{}\\l\"{}];",
            node.index(),
            block.id.label(),
            instrs.join("\\l"),
            style
        )?;
    }

    // Add edges
    for &node in func.layout() {
        for (kind, target) in func.successors(node)? {
            writeln!(
                dot,
                "    {} -> {} [label=\"{}\"];",
                node.index(),
                target.index(),
                kind
            )?;
        }
    }

    dot.push_str("}\n");
    Ok(dot)
}
