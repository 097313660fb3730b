//! Expansion of a `var relop C` conditional jump into a chain of equivalent tests.
//!
//! The chain is built from constants around `C`. Each generated test `var op k` is
//! classified against the original test `var relop C`:
//!
//! * [`Outcome::True`]: every value passing the test also passes the original,
//! * [`Outcome::False`]: no value passing the test passes the original,
//! * [`Outcome::Ambiguous`]: neither, so the chain moves on whatever the result,
//! * [`Outcome::Last`]: the test is an exact rewrite of the original (`>= C` as `> C-1`).
//!
//! Tests are evaluated in order and the first passing non-ambiguous test decides. A `Last`
//! test always sits after every ambiguous one, which makes the chain equivalent to the
//! original test for every value of `var`.

use crate::Result;
use petgraph::graph::NodeIndex;
use tacmesh_core::choice::Chooser;
use tacmesh_core::decoder::{Condition, RelOp, Statement};
use tacmesh_core::il::{EdgeKind, Function, StatementType};
use tracing::debug;

/// How a generated test relates to the original one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    True,
    False,
    Ambiguous,
    Last,
}

/// One generated test of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTest {
    pub constant: i64,
    pub relop: RelOp,
    pub outcome: Outcome,
}

/// The exact rewrite of `relop constant` using `adjacent` instead, when one exists.
fn exact_rewrite(constant: i64, relop: RelOp, adjacent: i64) -> Option<RelOp> {
    let below = constant.checked_sub(1) == Some(adjacent);
    let above = constant.checked_add(1) == Some(adjacent);
    match relop {
        RelOp::GreaterOrEquals if below => Some(RelOp::Greater),
        RelOp::Smaller if below => Some(RelOp::SmallerOrEquals),
        RelOp::Greater if above => Some(RelOp::GreaterOrEquals),
        RelOp::SmallerOrEquals if above => Some(RelOp::Smaller),
        _ => None,
    }
}

/// Classifies `v op k` against `v relop c`.
///
/// Membership in either set only changes at `k` and `c`, so the integers of
/// `[min(k, c) - 1, max(k, c) + 1]` represent every value.
pub fn classify(c: i64, relop: RelOp, k: i64, op: RelOp) -> Outcome {
    let lo = k.min(c);
    let hi = k.max(c);
    let lo = lo.checked_sub(1).unwrap_or(lo);
    let hi = hi.checked_add(1).unwrap_or(hi);

    let mut subset = true;
    let mut disjoint = true;
    for v in lo..=hi {
        if op.holds(v, k) {
            if relop.holds(v, c) {
                disjoint = false;
            } else {
                subset = false;
            }
        }
    }
    match (subset, disjoint) {
        (true, _) => Outcome::True,
        (false, true) => Outcome::False,
        (false, false) => Outcome::Ambiguous,
    }
}

/// Generates the test list for `var relop constant`.
///
/// `length` constants are taken alternately below and above `constant` (`C-1, C+1, C-2, …`).
/// The list is shuffled, its `Last` entries are repositioned, and when no exact rewrite
/// was generated the original test itself is appended as the final `Last` entry.
pub fn generate_cond_list(
    constant: i64,
    relop: RelOp,
    length: usize,
    chooser: &mut Chooser,
) -> Vec<ChainTest> {
    let mut list = Vec::with_capacity(length + 1);
    let mut distance: i64 = 1;
    while list.len() < length && distance <= length as i64 {
        for k in [constant.checked_sub(distance), constant.checked_add(distance)]
            .into_iter()
            .flatten()
        {
            if list.len() == length {
                break;
            }
            let test = match exact_rewrite(constant, relop, k) {
                Some(rewrite) => ChainTest {
                    constant: k,
                    relop: rewrite,
                    outcome: Outcome::Last,
                },
                None => {
                    let op = chooser.relop();
                    ChainTest {
                        constant: k,
                        relop: op,
                        outcome: classify(constant, relop, k, op),
                    }
                }
            };
            list.push(test);
        }
        distance += 1;
    }

    chooser.shuffle(&mut list);
    reposition_lasts(&mut list);
    if !list.iter().any(|test| test.outcome == Outcome::Last) {
        list.push(ChainTest {
            constant,
            relop,
            outcome: Outcome::Last,
        });
    }
    list
}

/// Keeps a single `Last` entry and moves it right after the final ambiguous entry (to the
/// end when there is none).
pub fn reposition_lasts(list: &mut Vec<ChainTest>) {
    let lasts: Vec<usize> = list
        .iter()
        .enumerate()
        .filter(|(_, test)| test.outcome == Outcome::Last)
        .map(|(i, _)| i)
        .collect();
    let Some((&kept, demoted)) = lasts.split_last() else {
        return;
    };
    for &i in demoted {
        list[i].outcome = Outcome::Ambiguous;
    }

    let last = list.remove(kept);
    let position = list
        .iter()
        .rposition(|test| test.outcome == Outcome::Ambiguous)
        .map(|i| i + 1)
        .unwrap_or(list.len());
    list.insert(position, last);
}

/// Evaluates a chain for one value of the tested variable, as the generated blocks would.
pub fn evaluate_chain(chain: &[ChainTest], value: i64) -> bool {
    for test in chain {
        if !test.relop.holds(value, test.constant) {
            continue;
        }
        match test.outcome {
            Outcome::True | Outcome::Last => return true,
            Outcome::False => return false,
            Outcome::Ambiguous => {}
        }
    }
    false
}

/// Blocks generated for one conditional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub tests: Vec<ChainTest>,
    pub blocks: Vec<NodeIndex>,
}

/// Replaces the terminal `if var relop C` of `block` with a chain of test blocks.
///
/// Returns `None`, leaving the block untouched, when the condition does not compare a
/// variable with an integer constant or when the generated chain would not mix at least
/// two kinds of tests.
pub fn expand_conditional(
    func: &mut Function,
    block: NodeIndex,
    chooser: &mut Chooser,
    length: usize,
) -> Result<Option<Chain>> {
    let Some(condition) = terminal_condition(func, block)? else {
        return Ok(None);
    };
    let (Some(on_true), Some(on_false)) = (
        func.successor(block, EdgeKind::BranchTrue),
        func.successor(block, EdgeKind::BranchFalse),
    ) else {
        return Ok(None);
    };

    let tests = generate_cond_list(condition.rhs, condition.relop, length, chooser);
    let mut kinds: Vec<Outcome> = Vec::new();
    for test in &tests {
        if !kinds.contains(&test.outcome) {
            kinds.push(test.outcome);
        }
    }
    if kinds.len() < 2 {
        debug!("chain on {} degenerates, keeping the original test", func.block(block)?.id);
        return Ok(None);
    }

    let dead = func.block(block)?.dead;
    let mut blocks = Vec::with_capacity(tests.len());
    let mut anchor = block;
    for _ in &tests {
        anchor = func.add_block(Some(anchor), dead)?;
        blocks.push(anchor);
    }

    for (i, test) in tests.iter().enumerate() {
        let next = blocks.get(i + 1).copied().unwrap_or(on_false);
        let taken = match test.outcome {
            Outcome::True | Outcome::Last => on_true,
            Outcome::False => on_false,
            Outcome::Ambiguous => next,
        };
        let guard = Condition::new(condition.var, test.relop, test.constant);
        func.make_conditional(blocks[i], guard, taken, next)?;
    }

    func.replace_terminal(block, Statement::Nop)?;
    func.link_to_successor(block, blocks[0], EdgeKind::Fallthrough, true)?;

    debug!(
        "expanded conditional of {} into {} tests",
        func.block(block)?.id,
        tests.len()
    );
    Ok(Some(Chain { tests, blocks }))
}

pub(crate) fn terminal_condition(func: &Function, block: NodeIndex) -> Result<Option<Condition>> {
    let bb = func.block(block)?;
    match bb.terminal() {
        Some(inst) if inst.kind == StatementType::ConditionalJump => {
            Ok(func.statement(inst)?.condition())
        }
        _ => Ok(None),
    }
}
