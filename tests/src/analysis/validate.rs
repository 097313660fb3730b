use tacmesh_analysis::Error;
use tacmesh_analysis::validate::{validate, validate_guards};
use tacmesh_core::Ident;
use tacmesh_core::decoder::{Condition, RelOp, Statement};
use tacmesh_core::document::InstructionDoc;
use tacmesh_core::il::{EdgeKind, StatementType};

use crate::common::{ROUTINE, SINGLE_JUMP, block_id, function_mut, nth_block, routine};

fn structure_error(result: Result<(), Error>) -> String {
    match result {
        Err(Error::Structure(reason)) => reason,
        other => panic!("expected a structure error, got {other:?}"),
    }
}

#[test]
fn test_fixtures_are_valid() {
    let routine = routine(ROUTINE);
    for func in &routine.functions {
        validate(func).unwrap();
        validate_guards(func, func).unwrap();
    }
}

#[test]
fn test_goto_text_must_match_edge() {
    let mut routine = routine(SINGLE_JUMP);
    let single = function_mut(&mut routine, "single");
    let b0 = nth_block(single, 0);
    let b0_id = block_id(single, b0);
    single
        .replace_terminal(b0, Statement::Goto { target: b0_id })
        .unwrap();

    let reason = structure_error(validate(single));
    assert!(reason.starts_with("single: block "));
    assert!(reason.contains("edge disagrees"));
}

#[test]
fn test_conditional_needs_both_arms() {
    let mut routine = routine(ROUTINE);
    let main = function_mut(&mut routine, "main");
    let b1 = nth_block(main, 1);
    let b2 = nth_block(main, 2);
    main.link_to_successor(b1, b2, EdgeKind::BranchTrue, true).unwrap();

    let reason = structure_error(validate(main));
    assert!(reason.contains("one true and one false edge"));
}

#[test]
fn test_jump_must_end_block() {
    let mut routine = routine(SINGLE_JUMP);
    let single = function_mut(&mut routine, "single");
    let b0 = nth_block(single, 0);
    let x = single.variables()[0].id;
    single
        .push_instruction(
            b0,
            &InstructionDoc {
                id: Ident::generate(),
                statement_type: StatementType::Copy,
                text: format!("{x} = 1"),
                poly_required: false,
                ref_vars: x.to_string(),
            },
        )
        .unwrap();

    let reason = structure_error(validate(single));
    assert!(reason.contains("jump before end of block"));
}

#[test]
fn test_guard_on_untested_original_variable() {
    let mut routine = routine(SINGLE_JUMP);
    let single = function_mut(&mut routine, "single");
    let original = single.clone();
    let b0 = nth_block(single, 0);
    let b1 = nth_block(single, 1);
    let x = single.variable_index(&single.variables()[0].id).unwrap();
    let other = single.add_block(Some(b0), false).unwrap();
    single.link_to_successor(other, b1, EdgeKind::Fallthrough, true).unwrap();
    single
        .make_conditional(b0, Condition::new(x, RelOp::Equals, 41), b1, other)
        .unwrap();

    validate(single).unwrap();
    let reason = structure_error(validate_guards(single, &original));
    assert!(reason.contains("neither original nor a pristine guard"));
}

#[test]
fn test_dead_block_must_sit_on_untaken_arm() {
    let mut routine = routine(SINGLE_JUMP);
    let single = function_mut(&mut routine, "single");
    let original = single.clone();
    let b0 = nth_block(single, 0);
    let b1 = nth_block(single, 1);
    let fake = single.add_fake_local("g", 4);
    let dead = single.add_block(None, true).unwrap();
    single.make_unconditional(dead, b1).unwrap();

    // g < 9 always holds, so its false arm is never taken
    let mut safe = single.clone();
    safe.make_conditional(b0, Condition::new(fake, RelOp::Smaller, 9), b1, dead)
        .unwrap();
    validate(&safe).unwrap();
    validate_guards(&safe, &original).unwrap();

    let mut unsafe_arm = single.clone();
    unsafe_arm
        .make_conditional(b0, Condition::new(fake, RelOp::Smaller, 9), dead, b1)
        .unwrap();
    let reason = structure_error(validate_guards(&unsafe_arm, &original));
    assert!(reason.contains("dead block is reachable"));

    // a plain jump into a dead block is never safe
    let mut direct = single.clone();
    direct.make_unconditional(b0, dead).unwrap();
    assert!(validate_guards(&direct, &original).is_err());
}
