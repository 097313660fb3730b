use super::guard::GuardPool;
use crate::Result;
use petgraph::graph::NodeIndex;
use tacmesh_core::choice::Chooser;
use tacmesh_core::il::{EdgeKind, Function};
use tacmesh_core::Error as CoreError;
use tracing::debug;

/// Blocks created by one dead-lane insertion. All three are marked dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadLane {
    pub head: NodeIndex,
    pub middle: NodeIndex,
    pub tail: NodeIndex,
}

/// Turns the `goto` ending `block` into a fake-guarded conditional whose true arm keeps the
/// real successor and whose false arm enters a chain of three dead blocks.
///
/// The guard on `block` compares a fake local against a constant above its known value, so
/// the real arm is the one taken at run time. Inside the lane, `D1` branches on another fake
/// guard to `D3` or `D2`, and both end in a `goto` to a randomly chosen jumpable block.
pub fn insert_dead_lane(
    func: &mut Function,
    block: NodeIndex,
    guards: &GuardPool,
    chooser: &mut Chooser,
    constant_max: i64,
) -> Result<DeadLane> {
    let id = func.block(block)?.id;
    let real = func.successor(block, EdgeKind::Jump).ok_or_else(|| {
        CoreError::InvalidBlockStructure(format!("block {id} has no jump successor"))
    })?;

    let d1 = func.add_block(None, true)?;
    let d2 = func.split_after(d1, 0)?;
    let d3 = func.split_after(d2, 0)?;

    let inner = guards.smaller(chooser, constant_max);
    func.make_conditional(d1, inner, d3, d2)?;

    let outer = guards.always_true(chooser, constant_max);
    func.make_conditional(block, outer, real, d1)?;

    for dangling in [d2, d3] {
        let target = chooser.jumpable_block(func).unwrap_or(real);
        func.make_unconditional(dangling, target)?;
    }

    debug!("dead lane on {id}");
    Ok(DeadLane {
        head: d1,
        middle: d2,
        tail: d3,
    })
}
