use super::guard::GuardPool;
use crate::Result;
use petgraph::graph::NodeIndex;
use tacmesh_core::choice::Chooser;
use tacmesh_core::il::{EdgeKind, Function};
use tracing::debug;

/// Blocks created by one fake-lane insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeLane {
    /// Holds the fake guard; `B` now jumps here.
    pub guard: NodeIndex,
    /// Not-taken side of the guard, leading into the decoy.
    pub detour: NodeIndex,
    /// Taken side of the guard, leading on to the real target.
    pub real: NodeIndex,
    /// Deep copy of the real target.
    pub decoy: NodeIndex,
}

/// Inserts a fake lane between `block` (ending in `goto target`) and `target`.
///
/// `block` is split three times into the chain `F1 -> F2 -> F3 -> target`. The decoy `D`,
/// a poly-required deep clone of `target` with the same outgoing edges, becomes `F2`'s
/// only successor, and `F1` gets a random fake guard choosing between `F3` and `F2`. Both
/// outcomes therefore execute `target`'s code.
pub fn insert_fake_lane(
    func: &mut Function,
    block: NodeIndex,
    target: NodeIndex,
    guards: &GuardPool,
    chooser: &mut Chooser,
    constant_max: i64,
) -> Result<FakeLane> {
    let last = func.block(block)?.instructions.len().saturating_sub(1);
    let f1 = func.split_after(block, last)?;
    let f2 = func.split_after(f1, 0)?;
    let f3 = func.split_after(f2, 0)?;

    let decoy = func.clone_block(target, true)?;
    func.mark_poly_required(decoy)?;
    func.mirror_successors(decoy, target)?;

    func.link_to_successor(f2, decoy, EdgeKind::Fallthrough, true)?;
    let condition = guards.random(chooser, constant_max);
    func.make_conditional(f1, condition, f3, f2)?;

    debug!(
        "fake lane {} -> {} (decoy {})",
        func.block(block)?.id,
        func.block(target)?.id,
        func.block(decoy)?.id
    );
    Ok(FakeLane {
        guard: f1,
        detour: f2,
        real: f3,
        decoy,
    })
}
