//! The meshing engine.
//!
//! Sites are collected once, before anything changes: blocks ending in an unconditional
//! jump receive a fake lane and a dead lane (in that order, the dead lane rewrites the jump
//! the fake lane redirected), and blocks ending in a `var relop C` conditional are expanded
//! into test chains. Blocks created by meshing are never meshed themselves.

pub mod cond_chain;
pub mod dead_lane;
pub mod fake_lane;
pub mod guard;

use crate::budget::MeshBudget;
use crate::{MeshConfig, Result, Transform};
use guard::GuardPool;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use tacmesh_core::Error as CoreError;
use tacmesh_core::choice::Chooser;
use tacmesh_core::il::{EdgeKind, Function, StatementType};
use tracing::debug;

/// What one meshing pass inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshStats {
    pub fake_lanes: usize,
    pub dead_lanes: usize,
    pub chains: usize,
}

impl MeshStats {
    pub fn changed(&self) -> bool {
        self.fake_lanes + self.dead_lanes + self.chains > 0
    }
}

/// Control-flow meshing of one function.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    config: MeshConfig,
}

impl Mesh {
    pub fn new(config: MeshConfig) -> Self {
        Self { config }
    }

    /// Meshes `func` in place.
    ///
    /// The budget is checked before each site; when it runs out the function is left
    /// partially meshed and the caller must discard it.
    pub fn mesh_function(
        &self,
        func: &mut Function,
        chooser: &mut Chooser,
        budget: &MeshBudget,
    ) -> Result<MeshStats> {
        let jumps = self.select(func, StatementType::UnconditionalJump, chooser)?;
        let conditionals = if self.config.expand_conditionals {
            self.select(func, StatementType::ConditionalJump, chooser)?
        } else {
            Vec::new()
        };
        debug!(
            "{}: {} jump sites, {} conditional sites",
            func.external_label,
            jumps.len(),
            conditionals.len()
        );

        let mut stats = MeshStats::default();
        let lanes = self.config.fake_lanes || self.config.dead_lanes;
        if lanes && !jumps.is_empty() {
            let guards = GuardPool::prepare(func)?;
            for block in jumps {
                budget.check()?;
                self.mesh_jump(func, block, &guards, chooser, &mut stats)?;
            }
        }

        for block in conditionals {
            budget.check()?;
            if cond_chain::expand_conditional(func, block, chooser, self.config.chain_length)?
                .is_some()
            {
                stats.chains += 1;
            }
        }
        Ok(stats)
    }

    fn mesh_jump(
        &self,
        func: &mut Function,
        block: NodeIndex,
        guards: &GuardPool,
        chooser: &mut Chooser,
        stats: &mut MeshStats,
    ) -> Result<()> {
        let max = self.config.guard_constant_max;
        if self.config.fake_lanes {
            let target = func.successor(block, EdgeKind::Jump).ok_or_else(|| {
                let id = func.block(block).map(|b| b.id.to_string()).unwrap_or_default();
                CoreError::InvalidBlockStructure(format!("block {id} has no jump successor"))
            })?;
            fake_lane::insert_fake_lane(func, block, target, guards, chooser, max)?;
            stats.fake_lanes += 1;
        }
        if self.config.dead_lanes {
            dead_lane::insert_dead_lane(func, block, guards, chooser, max)?;
            stats.dead_lanes += 1;
        }
        Ok(())
    }

    /// Live blocks ending in `kind`, thinned out to `cft_ratio` of them.
    ///
    /// Conditionals testing a pristine fake local are guards from an earlier pass and are
    /// left alone, as are dead blocks.
    fn select(
        &self,
        func: &Function,
        kind: StatementType,
        chooser: &mut Chooser,
    ) -> Result<Vec<NodeIndex>> {
        let guards = func.pristine_fake_locals()?;
        let mut sites = Vec::new();
        for (node, block) in func.blocks() {
            if block.dead || !block.ends_in(kind) {
                continue;
            }
            if kind == StatementType::ConditionalJump {
                let guarded = cond_chain::terminal_condition(func, node)?
                    .is_some_and(|condition| guards.contains(&condition.var));
                if guarded {
                    continue;
                }
            }
            sites.push(node);
        }
        let ratio = self.config.cft_ratio;
        Ok(sites
            .into_iter()
            .filter(|_| ratio >= 1.0 || chooser.chance(ratio))
            .collect())
    }
}

impl Transform for Mesh {
    fn name(&self) -> &'static str {
        "Mesh"
    }

    fn apply(
        &self,
        func: &mut Function,
        chooser: &mut Chooser,
        budget: &MeshBudget,
    ) -> Result<bool> {
        let stats = self.mesh_function(func, chooser, budget)?;
        debug!(
            "{}: {} fake lanes, {} dead lanes, {} chains",
            func.external_label, stats.fake_lanes, stats.dead_lanes, stats.chains
        );
        Ok(stats.changed())
    }
}
