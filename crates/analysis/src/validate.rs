//! Structural checks on a function's control-flow graph.
//!
//! [`validate`] checks that terminals and edges agree. [`validate_guards`] checks that a
//! meshed function only branches on what the original branched on or on pristine fake
//! locals, and that no dead block can be reached at run time.

use crate::{Error, Result};
use petgraph::graph::NodeIndex;
use std::collections::HashSet;
use tacmesh_core::Ident;
use tacmesh_core::decoder::{Operand, Statement};
use tacmesh_core::il::{EdgeKind, Function, StatementType, VarIndex};
use tracing::debug;

fn structure(func: &Function, block: Option<&Ident>, reason: impl std::fmt::Display) -> Error {
    match block {
        Some(id) => Error::Structure(format!("{}: block {id}: {reason}", func.external_label)),
        None => Error::Structure(format!("{}: {reason}", func.external_label)),
    }
}

/// Checks the terminal/edge consistency of every block of `func`.
pub fn validate(func: &Function) -> Result<()> {
    if func.block_count() == 0 {
        return Err(Error::EmptyCfg);
    }

    let mut seen = HashSet::new();
    for &node in func.layout() {
        if !seen.insert(node) {
            return Err(structure(func, None, "block listed twice in layout"));
        }
    }
    if seen.len() != func.block_count() {
        return Err(structure(func, None, "layout does not cover every block"));
    }

    for (node, block) in func.blocks() {
        let Some(terminal) = block.terminal() else {
            return Err(structure(func, Some(&block.id), "no instructions"));
        };
        let last = block.instructions.len() - 1;
        for (i, inst) in block.instructions.iter().enumerate() {
            if inst.kind.is_jump() && i != last {
                return Err(structure(func, Some(&block.id), "jump before end of block"));
            }
            if inst.kind != StatementType::Invalid {
                func.statement(inst)?;
            }
        }

        let edges = func.successors(node)?;
        let count = |kind: EdgeKind| edges.iter().filter(|(k, _)| *k == kind).count();
        let target_id = |kind: EdgeKind| -> Result<Option<Ident>> {
            match func.successor(node, kind) {
                Some(target) => Ok(Some(func.block(target)?.id)),
                None => Ok(None),
            }
        };

        match func.statement(terminal) {
            Ok(Statement::Goto { target }) => {
                if edges.len() != 1 || count(EdgeKind::Jump) != 1 {
                    return Err(structure(func, Some(&block.id), "goto needs one jump edge"));
                }
                if target_id(EdgeKind::Jump)? != Some(target) {
                    return Err(structure(
                        func,
                        Some(&block.id),
                        format!("goto names {target} but the edge disagrees"),
                    ));
                }
            }
            Ok(Statement::IfGoto { target, .. }) => {
                if edges.len() != 2
                    || count(EdgeKind::BranchTrue) != 1
                    || count(EdgeKind::BranchFalse) != 1
                {
                    return Err(structure(
                        func,
                        Some(&block.id),
                        "conditional needs one true and one false edge",
                    ));
                }
                if target_id(EdgeKind::BranchTrue)? != Some(target) {
                    return Err(structure(
                        func,
                        Some(&block.id),
                        format!("conditional names {target} but the true edge disagrees"),
                    ));
                }
            }
            _ => {
                if edges.len() > 1 || edges.len() != count(EdgeKind::Fallthrough) {
                    return Err(structure(
                        func,
                        Some(&block.id),
                        "non-jump terminal allows a single fallthrough edge",
                    ));
                }
            }
        }
    }
    debug!("{}: structure ok", func.external_label);
    Ok(())
}

/// Checks the guards introduced by meshing `original` into `meshed`.
///
/// Every conditional of `meshed` must test a variable some conditional of `original`
/// tested, or a fake local nothing writes. Any edge from a live block into a dead block
/// must be the arm its guard never takes.
pub fn validate_guards(meshed: &Function, original: &Function) -> Result<()> {
    let mut tested: HashSet<Ident> = HashSet::new();
    for (_, block) in original.blocks() {
        for inst in &block.instructions {
            if inst.kind != StatementType::ConditionalJump {
                continue;
            }
            if let Statement::IfGoto { lhs, rhs, .. } = original.statement(inst)? {
                tested.extend(original.variable(lhs).map(|v| v.id));
                if let Operand::Var(rhs) = rhs {
                    tested.extend(original.variable(rhs).map(|v| v.id));
                }
            }
        }
    }
    let pristine: HashSet<VarIndex> = meshed.pristine_fake_locals()?.into_iter().collect();

    for (node, block) in meshed.blocks() {
        let Some(terminal) = block.terminal() else {
            continue;
        };
        if terminal.kind == StatementType::ConditionalJump {
            let Statement::IfGoto { lhs, .. } = meshed.statement(terminal)? else {
                continue;
            };
            let known = meshed
                .variable(lhs)
                .is_some_and(|v| tested.contains(&v.id));
            if !known && !pristine.contains(&lhs) {
                return Err(structure(
                    meshed,
                    Some(&block.id),
                    "conditional tests a variable that is neither original nor a pristine guard",
                ));
            }
        }
        if !block.dead {
            check_dead_edges(meshed, node, &pristine)?;
        }
    }
    Ok(())
}

fn check_dead_edges(func: &Function, node: NodeIndex, pristine: &HashSet<VarIndex>) -> Result<()> {
    let block = func.block(node)?;
    let mut dead_arms = Vec::new();
    for (kind, target) in func.successors(node)? {
        if func.block(target)?.dead {
            dead_arms.push(kind);
        }
    }
    if dead_arms.is_empty() {
        return Ok(());
    }

    let taken = match block.terminal().map(|inst| func.statement(inst)).transpose()? {
        Some(Statement::IfGoto {
            lhs,
            relop,
            rhs,
            ..
        }) if pristine.contains(&lhs) => {
            let value = |idx: VarIndex| func.variable(idx).map(|v| v.known_value());
            let rhs = match rhs {
                Operand::Const(k) => Some(k),
                Operand::Var(idx) if pristine.contains(&idx) => value(idx),
                Operand::Var(_) => None,
            };
            match (value(lhs), rhs) {
                (Some(l), Some(r)) if relop.holds(l, r) => Some(EdgeKind::BranchTrue),
                (Some(_), Some(_)) => Some(EdgeKind::BranchFalse),
                _ => None,
            }
        }
        _ => None,
    };
    match taken {
        Some(arm) if !dead_arms.contains(&arm) => Ok(()),
        _ => Err(structure(
            func,
            Some(&block.id),
            "a dead block is reachable from a live block",
        )),
    }
}
