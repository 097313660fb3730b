use petgraph::graph::NodeIndex;
use proptest::prelude::*;
use tacmesh_core::choice::Chooser;
use tacmesh_core::decoder::{RelOp, Statement};
use tacmesh_core::document::RoutineDoc;
use tacmesh_core::il::{EdgeKind, Function, StatementType};
use tacmesh_transform::mesh::cond_chain::{
    ChainTest, Outcome, classify, evaluate_chain, expand_conditional, generate_cond_list,
    reposition_lasts,
};

use crate::common::{ROUTINE, assert_edge_symmetry, function_mut, init_tracing, nth_block, routine};

fn test(constant: i64, relop: RelOp, outcome: Outcome) -> ChainTest {
    ChainTest {
        constant,
        relop,
        outcome,
    }
}

#[test]
fn test_classify() {
    // v > 10 implies v > 5
    assert_eq!(classify(5, RelOp::Greater, 10, RelOp::Greater), Outcome::True);
    // v < 3 never satisfies v > 5
    assert_eq!(classify(5, RelOp::Greater, 3, RelOp::Smaller), Outcome::False);
    // v > 3 holds for 4, which fails v > 5, and for 6, which passes
    assert_eq!(classify(5, RelOp::Greater, 3, RelOp::Greater), Outcome::Ambiguous);
    assert_eq!(classify(5, RelOp::Equals, 5, RelOp::Equals), Outcome::True);
    assert_eq!(classify(5, RelOp::Equals, 6, RelOp::Equals), Outcome::False);
    assert_eq!(classify(5, RelOp::NotEquals, 6, RelOp::Equals), Outcome::True);
    assert_eq!(classify(i64::MAX, RelOp::SmallerOrEquals, i64::MAX - 1, RelOp::Greater), Outcome::True);
}

#[test]
fn test_reposition_keeps_one_last_after_ambiguous() {
    let mut list = vec![
        test(1, RelOp::Greater, Outcome::Last),
        test(2, RelOp::Equals, Outcome::Ambiguous),
        test(3, RelOp::Smaller, Outcome::True),
        test(4, RelOp::GreaterOrEquals, Outcome::Last),
        test(5, RelOp::NotEquals, Outcome::Ambiguous),
        test(6, RelOp::Equals, Outcome::False),
    ];
    reposition_lasts(&mut list);

    let outcomes: Vec<Outcome> = list.iter().map(|t| t.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Ambiguous,
            Outcome::Ambiguous,
            Outcome::True,
            Outcome::Ambiguous,
            Outcome::Last,
            Outcome::False,
        ]
    );
    assert_eq!(list[4].constant, 4);

    let mut none = vec![test(1, RelOp::Greater, Outcome::True)];
    reposition_lasts(&mut none);
    assert_eq!(none, vec![test(1, RelOp::Greater, Outcome::True)]);
}

#[test]
fn test_original_test_appended_without_exact_rewrite() {
    // `==` has no exact rewrite with an adjacent constant
    let mut chooser = Chooser::from_u64(9);
    let list = generate_cond_list(0, RelOp::Equals, 4, &mut chooser);
    assert_eq!(list.len(), 5);
    assert_eq!(list.iter().filter(|t| t.outcome == Outcome::Last).count(), 1);
    assert!(list.contains(&test(0, RelOp::Equals, Outcome::Last)));
    let constants: Vec<i64> = list.iter().map(|t| t.constant).collect();
    for k in [-2, -1, 1, 2] {
        assert!(constants.contains(&k));
    }
}

proptest! {
    #[test]
    fn chain_matches_original_test(
        constant in -1_000i64..1_000,
        relop in prop::sample::select(RelOp::ALL.to_vec()),
        length in 1usize..12,
        seed in any::<u64>(),
    ) {
        let mut chooser = Chooser::from_u64(seed);
        let chain = generate_cond_list(constant, relop, length, &mut chooser);

        let lasts: Vec<usize> = chain
            .iter()
            .enumerate()
            .filter(|(_, t)| t.outcome == Outcome::Last)
            .map(|(i, _)| i)
            .collect();
        prop_assert_eq!(lasts.len(), 1);
        prop_assert!(chain[lasts[0] + 1..].iter().all(|t| t.outcome != Outcome::Ambiguous));

        for value in constant - 10..=constant + 10 {
            prop_assert_eq!(
                evaluate_chain(&chain, value),
                relop.holds(value, constant),
                "value {} against {} {}", value, relop, constant
            );
        }
    }
}

/// Follows conditionals from `start` with `value` in the tested variable until control
/// reaches one of `exits`.
fn walk(func: &Function, start: NodeIndex, value: i64, exits: &[NodeIndex]) -> NodeIndex {
    let mut node = start;
    for _ in 0..func.block_count() {
        if exits.contains(&node) {
            return node;
        }
        let block = func.block(node).unwrap();
        let kind = match func.statement(block.terminal().unwrap()).unwrap() {
            Statement::IfGoto { .. } => {
                let condition = func
                    .statement(block.terminal().unwrap())
                    .unwrap()
                    .condition()
                    .unwrap();
                if condition.relop.holds(value, condition.rhs) {
                    EdgeKind::BranchTrue
                } else {
                    EdgeKind::BranchFalse
                }
            }
            Statement::Goto { .. } => EdgeKind::Jump,
            _ => EdgeKind::Fallthrough,
        };
        node = func.successor(node, kind).unwrap();
    }
    panic!("chain does not terminate");
}

#[test]
fn test_expanded_chain_preserves_branching() {
    init_tracing();
    let mut routine = routine(ROUTINE);
    let main = function_mut(&mut routine, "main");
    let [b4, b5, b6] = [3, 4, 5].map(|n| nth_block(main, n));
    let total = main.variables().iter().position(|v| v.name == "total").unwrap();

    for seed in 0..16 {
        let mut func = main.clone();
        let mut chooser = Chooser::from_u64(seed);
        let chain = expand_conditional(&mut func, b4, &mut chooser, 6)
            .unwrap()
            .expect("`total > 20` expands");

        assert_eq!(chain.blocks.len(), chain.tests.len());
        assert_eq!(func.block_count(), 6 + chain.blocks.len());
        assert_eq!(
            func.block(b4).unwrap().terminal_kind(),
            Some(StatementType::NoOperation)
        );
        assert_eq!(
            func.successors(b4).unwrap(),
            vec![(EdgeKind::Fallthrough, chain.blocks[0])]
        );
        for &node in &chain.blocks {
            let terminal = func.block(node).unwrap().terminal().unwrap();
            let condition = func.statement(terminal).unwrap().condition().unwrap();
            assert_eq!(condition.var.index(), total);
        }
        let last = *chain.blocks.last().unwrap();
        assert_eq!(func.successor(last, EdgeKind::BranchFalse), Some(b6));
        assert_edge_symmetry(&func);

        for value in 0..=40 {
            let exit = walk(&func, b4, value, &[b5, b6]);
            assert_eq!(exit == b5, value > 20, "seed {seed}, total {value}");
        }
    }
}

#[test]
fn test_variable_comparisons_are_not_expanded() {
    let mut routine = routine(ROUTINE);
    let main = function_mut(&mut routine, "main");
    let b1 = nth_block(main, 1);
    let before = main.to_document();
    let mut chooser = Chooser::from_u64(0);

    assert_eq!(expand_conditional(main, b1, &mut chooser, 6).unwrap(), None);
    assert_eq!(main.to_document(), before);

    // a block without a conditional terminal is left alone too
    let b0 = nth_block(main, 0);
    assert_eq!(expand_conditional(main, b0, &mut chooser, 6).unwrap(), None);
}

/// `main` with `if total > 20` sitting in a dead block.
fn main_with_dead_test() -> Function {
    let mut doc = RoutineDoc::from_json(ROUTINE).unwrap();
    let main = doc
        .functions
        .iter_mut()
        .find(|f| f.external_label == "main")
        .unwrap();
    main.basic_blocks[3].dead = true;
    Function::from_document(main).unwrap()
}

#[test]
fn test_chain_in_dead_block_stays_dead() {
    let mut expanded = 0;
    for seed in 0..16 {
        let mut main = main_with_dead_test();
        let b4 = nth_block(&main, 3);
        let Some(chain) = expand_conditional(&mut main, b4, &mut Chooser::from_u64(seed), 6)
            .unwrap()
        else {
            continue;
        };
        for block in chain.blocks {
            assert!(main.block(block).unwrap().dead, "seed {seed}");
        }
        expanded += 1;
    }
    assert!(expanded > 0);
}
