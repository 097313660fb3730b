use crate::Result;
use tacmesh_core::choice::Chooser;
use tacmesh_core::decoder::{Condition, RelOp};
use tacmesh_core::il::{Function, VarIndex};
use tracing::debug;

/// Fake locals usable in synthetic guards: nothing writes them, so at run time each one
/// holds its known value.
#[derive(Debug, Clone)]
pub struct GuardPool {
    vars: Vec<(VarIndex, i64)>,
}

impl GuardPool {
    /// Collects the pristine fake locals of `func`, adding one when there is none.
    pub fn prepare(func: &mut Function) -> Result<Self> {
        let mut pristine = func.pristine_fake_locals()?;
        if pristine.is_empty() {
            let added = func.add_fake_local("mesh_guard", 0);
            debug!("{}: no pristine fake local, added one", func.external_label);
            pristine.push(added);
        }
        let vars = pristine
            .into_iter()
            .filter_map(|idx| func.variable(idx).map(|var| (idx, var.known_value())))
            .collect();
        Ok(Self { vars })
    }

    /// Guard variables, in declaration order.
    pub fn vars(&self) -> impl Iterator<Item = VarIndex> + '_ {
        self.vars.iter().map(|(idx, _)| *idx)
    }

    fn pick(&self, chooser: &mut Chooser) -> (VarIndex, i64) {
        // prepare() guarantees at least one entry
        let idx = chooser.index(self.vars.len());
        self.vars[idx]
    }

    /// A guard with a random operator and a random constant in `[0, max]`; either outcome
    /// is possible as far as the guard's text shows.
    pub fn random(&self, chooser: &mut Chooser, max: i64) -> Condition {
        let (var, _) = self.pick(chooser);
        let relop = chooser.relop();
        Condition::new(var, relop, chooser.number(0, max))
    }

    /// A `fake < k` guard with a random `k` in `[0, max]`.
    pub fn smaller(&self, chooser: &mut Chooser, max: i64) -> Condition {
        let (var, _) = self.pick(chooser);
        Condition::new(var, RelOp::Smaller, chooser.number(0, max))
    }

    /// A `fake < k` guard that holds at run time: `k` is drawn from
    /// `(known, known + max]`.
    pub fn always_true(&self, chooser: &mut Chooser, max: i64) -> Condition {
        let (var, known) = self.pick(chooser);
        match known.checked_add(1) {
            Some(lo) => {
                let hi = known.saturating_add(max.max(1));
                Condition::new(var, RelOp::Smaller, chooser.number(lo, hi))
            }
            None => Condition::new(var, RelOp::SmallerOrEquals, known),
        }
    }
}
