use petgraph::graph::NodeIndex;
use tacmesh_core::Ident;
use tacmesh_core::il::{Function, Routine};
use tacmesh_core::seed::Seed;

pub const SINGLE_JUMP: &str = include_str!("../fixtures/single_jump.json");
pub const ROUTINE: &str = include_str!("../fixtures/routine.json");
pub const UNRESOLVED_VARIABLE: &str = include_str!("../fixtures/unresolved_variable.json");

pub const SEED_HEX: &str = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";

/// Installs a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .without_time()
        .with_test_writer()
        .try_init();
}

pub fn seed() -> Seed {
    Seed::from_hex(SEED_HEX).unwrap()
}

pub fn routine(json: &str) -> Routine {
    Routine::from_json(json).unwrap()
}

pub fn function<'r>(routine: &'r Routine, label: &str) -> &'r Function {
    routine
        .function_by_label(label)
        .unwrap_or_else(|| panic!("fixture has no function {label}"))
}

pub fn function_mut<'r>(routine: &'r mut Routine, label: &str) -> &'r mut Function {
    routine
        .functions
        .iter_mut()
        .find(|f| f.external_label == label)
        .unwrap_or_else(|| panic!("fixture has no function {label}"))
}

/// Handle of the `n`th block in layout order.
pub fn nth_block(func: &Function, n: usize) -> NodeIndex {
    func.layout()[n]
}

pub fn block_id(func: &Function, node: NodeIndex) -> Ident {
    func.block(node).unwrap().id
}

/// Every edge is seen the same way from both of its ends.
pub fn assert_edge_symmetry(func: &Function) {
    for &node in func.layout() {
        for (_, target) in func.successors(node).unwrap() {
            assert!(
                func.predecessors(target).unwrap().contains(&node),
                "{} lists {} as successor but not the other way round",
                block_id(func, node),
                block_id(func, target)
            );
        }
        for pred in func.predecessors(node).unwrap() {
            assert!(
                func.successors(pred)
                    .unwrap()
                    .iter()
                    .any(|(_, target)| *target == node),
                "{} lists {} as predecessor but not the other way round",
                block_id(func, node),
                block_id(func, pred)
            );
        }
    }
}

/// Blocks reachable from the entry.
pub fn reachable(func: &Function) -> Vec<NodeIndex> {
    let mut seen = Vec::new();
    let mut stack: Vec<NodeIndex> = func.entry().into_iter().collect();
    while let Some(node) = stack.pop() {
        if seen.contains(&node) {
            continue;
        }
        seen.push(node);
        for (_, target) in func.successors(node).unwrap() {
            stack.push(target);
        }
    }
    seen
}
