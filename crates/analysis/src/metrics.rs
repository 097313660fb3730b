use crate::{Error, Result};
/// Module for computing analytical metrics to evaluate control-flow meshing.
///
/// Implements a minimal set of metrics quantified by graph size, synthetic code, and
/// dominator overlap to assess transform potency (analyst effort). The module provides
/// functions to collect metrics from a `Function`, compare pre- and post-meshing states, and
/// compute dominator/post-dominator pairs for control flow analysis.
///
/// # Usage
/// ```rust,ignore
/// let routine = tacmesh_core::il::Routine::from_json(&json)?;
/// let metrics = metrics::collect_metrics(&routine.functions[0])?;
/// println!("{}", serde_json::to_string_pretty(&metrics)?);
/// ```
use petgraph::{
    algo::dominators::simple_fast,
    graph::{DiGraph, NodeIndex},
    visit::Reversed,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tacmesh_core::il::Function;

/// Analytical metrics of one function's control-flow graph.
///
/// Used to compare pre- and post-meshing states and to report the effect of each pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfgMetrics {
    /// Number of basic blocks.
    pub block_cnt: usize,
    /// Number of edges.
    pub edge_cnt: usize,
    /// Number of instructions over all blocks.
    pub instr_cnt: usize,
    /// Number of blocks marked dead.
    pub dead_cnt: usize,
    /// Number of instructions flagged poly-required.
    pub poly_cnt: usize,
    /// Fraction of nodes whose immediate dominator is also their immediate post-dominator.
    pub dom_overlap: f64,
    /// Composite potency score (heuristic based on nodes, edges, and overlap).
    pub potency: f64,
}

/// Collects metrics from a function's CFG.
///
/// # Arguments
/// * `func` - The function to measure.
///
/// # Returns
/// A `CfgMetrics` struct, or `Error::EmptyCfg` if the function has no blocks.
pub fn collect_metrics(func: &Function) -> Result<CfgMetrics> {
    if func.block_count() == 0 {
        return Err(Error::EmptyCfg);
    }

    let (doms, post_doms) = dominator_pairs(func)?;
    let overlap = dom_overlap(&doms, &post_doms);

    let cfg = func.cfg();
    let dead_cnt = cfg.node_weights().filter(|b| b.dead).count();
    let poly_cnt = cfg
        .node_weights()
        .flat_map(|b| b.instructions.iter())
        .filter(|inst| inst.poly_required)
        .count();

    Ok(CfgMetrics {
        block_cnt: func.block_count(),
        edge_cnt: func.edge_count(),
        instr_cnt: func.instruction_count(),
        dead_cnt,
        poly_cnt,
        dom_overlap: overlap,
        potency: score(overlap, func.block_count(), func.edge_count()),
    })
}

// Define a type alias for the HashMap used in dominator pairs
type DominatorMap = HashMap<NodeIndex, NodeIndex>;

/// Computes dominator and post-dominator pairs for the CFG.
///
/// The function's graph is copied into a compact `DiGraph` with one extra exit node that
/// every block without successors flows into, so post-dominators have a single root. Uses
/// `petgraph`'s `simple_fast` algorithm from the entry block and, on the reversed graph,
/// from the exit node. Keys and values of both maps are indices of the compact graph; the
/// virtual exit never appears as a key.
pub fn dominator_pairs(func: &Function) -> Result<(DominatorMap, DominatorMap)> {
    let entry = func.entry().ok_or(Error::EmptyCfg)?;

    let mut g: DiGraph<(), ()> = DiGraph::new();
    let mut local = HashMap::new();
    for &node in func.layout() {
        local.insert(node, g.add_node(()));
    }
    let exit = g.add_node(());
    for &node in func.layout() {
        let from = local[&node];
        let successors = func.resolve_edges(node, petgraph::Direction::Outgoing)?;
        if successors.is_empty() {
            g.add_edge(from, exit, ());
        }
        for target in successors {
            if let Some(&to) = local.get(&target) {
                g.add_edge(from, to, ());
            }
        }
    }

    let doms = simple_fast(&g, local[&entry]);
    let mut dom_map = HashMap::new();
    for n in g.node_indices().filter(|&n| n != exit) {
        if let Some(idom) = doms.immediate_dominator(n) {
            dom_map.insert(n, idom);
        }
    }

    let post = simple_fast(Reversed(&g), exit);
    let mut pdom_map = HashMap::new();
    for n in g.node_indices().filter(|&n| n != exit) {
        if let Some(ipdom) = post.immediate_dominator(n) {
            pdom_map.insert(n, ipdom);
        }
    }

    Ok((dom_map, pdom_map))
}

/// Computes the fraction of nodes that are both dominators and post-dominators.
///
/// A higher overlap suggests a more linear CFG, reducing obfuscation potency.
pub fn dom_overlap(doms: &DominatorMap, pdoms: &DominatorMap) -> f64 {
    let common = doms
        .iter()
        .filter(|(n, d)| pdoms.get(*n) == Some(*d))
        .count();
    if doms.is_empty() {
        0.0
    } else {
        common as f64 / doms.len() as f64
    }
}

/// Composite potency: graph size against dominator overlap.
fn score(overlap: f64, nodes: usize, edges: usize) -> f64 {
    5.0 * (nodes as f64).log2() + edges as f64 + 30.0 * (1.0 - overlap)
}

/// Compares two sets of metrics; positive means the transform added complexity.
///
/// Instruction growth is charged lightly so that a pass that only inflates code without
/// adding control flow scores low.
pub fn compare(before: &CfgMetrics, after: &CfgMetrics) -> f64 {
    after.potency - before.potency - 0.05 * (after.instr_cnt as f64 - before.instr_cnt as f64)
}
