use crate::Result;
use crate::Transform;
use crate::budget::MeshBudget;
use tacmesh_analysis::metrics::{collect_metrics, compare};
use tacmesh_core::choice::Chooser;
use tacmesh_core::il::Function;
use tracing::info;

/// Trait for running a sequence of transforms on one function.
pub trait Pass {
    fn run(
        &self,
        func: &mut Function,
        passes: &[Box<dyn Transform>],
        chooser: &mut Chooser,
        budget: &MeshBudget,
    ) -> Result<()>;
}

/// Default implementation of the Pass trait.
///
/// Each transform runs on a snapshot that only replaces the function once the transform
/// has succeeded.
pub struct DefaultPass;

impl Pass for DefaultPass {
    fn run(
        &self,
        func: &mut Function,
        passes: &[Box<dyn Transform>],
        chooser: &mut Chooser,
        budget: &MeshBudget,
    ) -> Result<()> {
        for pass in passes {
            budget.check()?;
            let before = collect_metrics(func)?;
            let mut snapshot = func.clone();

            let mutated = pass.apply(&mut snapshot, chooser, budget)?;
            if !mutated {
                continue;
            }

            let after = collect_metrics(&snapshot)?;
            let delta = compare(&before, &after);

            info!("{:>14} Δ{:+.2} ({})", pass.name(), delta, func.external_label);
            *func = snapshot;
        }
        Ok(())
    }
}
