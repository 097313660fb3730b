use tacmesh_core::choice::Chooser;
use tacmesh_core::decoder::Statement;
use tacmesh_core::il::{EdgeKind, Provenance, StatementType};
use tacmesh_transform::mesh::fake_lane::insert_fake_lane;
use tacmesh_transform::mesh::guard::GuardPool;

use crate::common::{
    SINGLE_JUMP, assert_edge_symmetry, function_mut, init_tracing, nth_block, reachable, routine,
};

#[test]
fn test_fake_lane_shape() {
    init_tracing();
    let mut routine = routine(SINGLE_JUMP);
    let func = function_mut(&mut routine, "single");
    let b0 = nth_block(func, 0);
    let b1 = nth_block(func, 1);
    let mut chooser = Chooser::from_u64(1);

    let guards = GuardPool::prepare(func).unwrap();
    let lane = insert_fake_lane(func, b0, b1, &guards, &mut chooser, 100).unwrap();

    assert_eq!(func.block_count(), 6);
    assert_eq!(func.successors(b0).unwrap(), vec![(EdgeKind::Jump, lane.guard)]);
    assert_eq!(
        func.successors(lane.guard).unwrap(),
        vec![(EdgeKind::BranchTrue, lane.real), (EdgeKind::BranchFalse, lane.detour)]
    );
    assert_eq!(
        func.successors(lane.detour).unwrap(),
        vec![(EdgeKind::Fallthrough, lane.decoy)]
    );
    assert_eq!(func.successors(lane.real).unwrap(), vec![(EdgeKind::Fallthrough, b1)]);
    // the decoy mirrors the real target, which returns
    assert!(func.successors(lane.decoy).unwrap().is_empty());
    assert_edge_symmetry(func);

    let seen = reachable(func);
    assert!(seen.contains(&b1));
    assert!(seen.contains(&lane.decoy));
}

#[test]
fn test_decoy_is_poly_copy_of_target() {
    let mut routine = routine(SINGLE_JUMP);
    let func = function_mut(&mut routine, "single");
    let b0 = nth_block(func, 0);
    let b1 = nth_block(func, 1);
    let mut chooser = Chooser::from_u64(2);

    let guards = GuardPool::prepare(func).unwrap();
    let lane = insert_fake_lane(func, b0, b1, &guards, &mut chooser, 100).unwrap();

    let target = func.block(b1).unwrap();
    let decoy = func.block(lane.decoy).unwrap();
    assert!(!decoy.dead);
    assert_eq!(decoy.instructions.len(), target.instructions.len());
    for (copy, real) in decoy.instructions.iter().zip(&target.instructions) {
        assert_ne!(copy.id, real.id);
        assert_eq!(copy.text, real.text);
        assert!(copy.poly_required);
        assert!(!real.poly_required);
    }
}

#[test]
fn test_fake_guard_tests_a_fake_local() {
    let mut routine = routine(SINGLE_JUMP);
    let func = function_mut(&mut routine, "single");
    let b0 = nth_block(func, 0);
    let b1 = nth_block(func, 1);

    for seed in 0..20 {
        let mut copy = func.clone();
        let mut chooser = Chooser::from_u64(seed);
        let guards = GuardPool::prepare(&mut copy).unwrap();
        let lane = insert_fake_lane(&mut copy, b0, b1, &guards, &mut chooser, 10).unwrap();

        let terminal = copy.block(lane.guard).unwrap().terminal().unwrap();
        assert_eq!(terminal.kind, StatementType::ConditionalJump);
        let Statement::IfGoto { lhs, .. } = copy.statement(terminal).unwrap() else {
            panic!("guard is not a conditional");
        };
        let var = copy.variable(lhs).unwrap();
        assert_eq!(var.provenance, Provenance::Fake);
        assert!(guards.vars().any(|g| g == lhs));
        let condition = copy.statement(terminal).unwrap().condition().unwrap();
        assert!((0..=10).contains(&condition.rhs));
    }
}
