//! Choice Provider: every random decision of the meshing engine goes through a [`Chooser`].

use crate::decoder::RelOp;
use crate::il::Function;
use crate::seed::Seed;
use petgraph::graph::NodeIndex;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Seeded source of meshing decisions.
///
/// A chooser is owned by exactly one worker; parallel passes derive one per function via
/// [`Chooser::for_function`].
#[derive(Debug, Clone)]
pub struct Chooser {
    rng: StdRng,
}

impl Chooser {
    pub fn new(rng: StdRng) -> Self {
        Self { rng }
    }

    /// Chooser with a fixed small seed, for tests and tooling.
    pub fn from_u64(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Chooser dedicated to one function of a routine.
    pub fn for_function(seed: &Seed, func: &Function) -> Self {
        Self::new(seed.function_rng(&func.id))
    }

    /// Uniform integer in `[lo, hi]` (bounds swapped if reversed).
    pub fn number(&mut self, lo: i64, hi: i64) -> i64 {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        self.rng.random_range(lo..=hi)
    }

    /// Uniform index in `[0, len)`; `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }

    /// Uniformly chosen relational operator.
    pub fn relop(&mut self) -> RelOp {
        RelOp::ALL[self.index(RelOp::ALL.len())]
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.index(items.len());
        items.get(idx)
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    /// True with probability `p` (clamped to `[0, 1]`).
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.random_bool(p.clamp(0.0, 1.0))
    }

    /// Any block of `func` that is valid to jump to: not dead, and holding at least one
    /// instruction that is not a no-op.
    pub fn jumpable_block(&mut self, func: &Function) -> Option<NodeIndex> {
        let candidates: Vec<NodeIndex> = func
            .blocks()
            .filter(|(_, block)| block.is_jumpable())
            .map(|(node, _)| node)
            .collect();
        self.pick(&candidates).copied()
    }
}
