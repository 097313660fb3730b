//! IL entity model: routines, functions, variables, basic blocks and instructions.
//!
//! A [`Function`] owns its blocks in a [`StableDiGraph`], so block handles ([`NodeIndex`])
//! stay valid across the structural edits performed by the mutation primitives in
//! [`mutate`]. Every edge carries an [`EdgeKind`] describing how control reaches the target.
//! An edge is stored once, so a block's successor list and its successors' predecessor
//! lists always agree.

mod build;
mod mutate;
mod trace;

pub use trace::{OperationKind, TraceEvent};

use crate::decoder::{self, Statement};
use crate::ident::Ident;
use crate::result::{Error, RefKind, Result};
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Closed set of statement kinds an instruction can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementType {
    UnconditionalJump,
    ConditionalJump,
    FullAssignment,
    UnaryAssignment,
    Copy,
    PointerAssignment,
    IndexedAssignment,
    Procedural,
    NoOperation,
    Invalid,
}

impl StatementType {
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            StatementType::UnconditionalJump | StatementType::ConditionalJump
        )
    }
}

/// Which external context may call a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalledFrom {
    InternalOnly,
    ExternalOnly,
    Both,
}

/// Storage size class of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeClass {
    Byte,
    Word,
    DWord,
    QWord,
}

impl SizeClass {
    pub fn bytes(self) -> u32 {
        match self {
            SizeClass::Byte => 1,
            SizeClass::Word => 2,
            SizeClass::DWord => 4,
            SizeClass::QWord => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarRole {
    Input,
    Output,
    Local,
}

/// Whether a variable exists in the source program or only hosts obfuscation guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Original,
    Fake,
}

/// Position of a variable in its function's variable list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarIndex(usize);

impl VarIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub id: Ident,
    pub name: String,
    pub size: SizeClass,
    pub pointer: bool,
    pub role: VarRole,
    pub provenance: Provenance,
    /// Constant carried when the variable is a parameter placeholder.
    pub const_value: Option<i64>,
}

impl Variable {
    pub fn is_fake_local(&self) -> bool {
        self.role == VarRole::Local && self.provenance == Provenance::Fake
    }

    /// Value the variable holds on function entry when nothing writes it.
    pub fn known_value(&self) -> i64 {
        self.const_value.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub id: Ident,
    pub kind: StatementType,
    pub text: String,
    /// Asks the emitter for an alternative instruction selection.
    pub poly_required: bool,
    pub refs: Vec<VarIndex>,
}

impl Instruction {
    pub(crate) fn nop(id: Ident) -> Self {
        Self {
            id,
            kind: StatementType::NoOperation,
            text: "nop".to_string(),
            poly_required: false,
            refs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: Ident,
    pub instructions: Vec<Instruction>,
    /// Reachable only through a guard that never holds at run time.
    pub dead: bool,
}

impl BasicBlock {
    /// The last instruction, which decides how control leaves the block.
    pub fn terminal(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    pub fn terminal_kind(&self) -> Option<StatementType> {
        self.terminal().map(|inst| inst.kind)
    }

    pub fn ends_in(&self, kind: StatementType) -> bool {
        self.terminal_kind() == Some(kind)
    }

    /// A block may be the target of an arbitrary synthetic jump.
    pub fn is_jumpable(&self) -> bool {
        !self.dead
            && self
                .instructions
                .iter()
                .any(|inst| inst.kind != StatementType::NoOperation)
    }
}

/// How control flows along an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Fallthrough,
    Jump,
    BranchTrue,
    BranchFalse,
}

impl EdgeKind {
    /// Successor ordering used when listing edges: true arm first, false arm last.
    fn rank(self) -> u8 {
        match self {
            EdgeKind::BranchTrue => 0,
            EdgeKind::Jump => 1,
            EdgeKind::Fallthrough => 2,
            EdgeKind::BranchFalse => 3,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Fallthrough => f.write_str("fallthrough"),
            EdgeKind::Jump => f.write_str("jump"),
            EdgeKind::BranchTrue => f.write_str("true"),
            EdgeKind::BranchFalse => f.write_str("false"),
        }
    }
}

/// Top-level compilation unit.
#[derive(Debug, Clone)]
pub struct Routine {
    pub description: String,
    pub functions: Vec<Function>,
}

impl Routine {
    pub fn function(&self, id: &Ident) -> Option<&Function> {
        self.functions.iter().find(|func| func.id == *id)
    }

    pub fn function_by_label(&self, label: &str) -> Option<&Function> {
        self.functions
            .iter()
            .find(|func| func.external_label == label)
    }
}

/// One function: its variables, its control-flow graph, and the block layout order.
#[derive(Debug, Clone)]
pub struct Function {
    pub id: Ident,
    pub external_label: String,
    pub called_from: CalledFrom,
    variables: Vec<Variable>,
    cfg: StableDiGraph<BasicBlock, EdgeKind>,
    layout: Vec<NodeIndex>,
    used_ids: HashSet<Ident>,
    serial: u64,
    trace: Vec<TraceEvent>,
}

impl Function {
    /// Creates an empty function with no variables and no blocks.
    pub fn new(id: Ident, external_label: impl Into<String>, called_from: CalledFrom) -> Self {
        let mut used_ids = HashSet::new();
        used_ids.insert(id);
        Self {
            id,
            external_label: external_label.into(),
            called_from,
            variables: Vec::new(),
            cfg: StableDiGraph::new(),
            layout: Vec::new(),
            used_ids,
            serial: 0,
            trace: Vec::new(),
        }
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, idx: VarIndex) -> Option<&Variable> {
        self.variables.get(idx.0)
    }

    pub fn variable_index(&self, id: &Ident) -> Option<VarIndex> {
        self.variables
            .iter()
            .position(|var| var.id == *id)
            .map(VarIndex)
    }

    pub fn variable_indices(&self) -> impl Iterator<Item = VarIndex> + '_ {
        (0..self.variables.len()).map(VarIndex)
    }

    /// Read-only view of the control-flow graph.
    pub fn cfg(&self) -> &StableDiGraph<BasicBlock, EdgeKind> {
        &self.cfg
    }

    /// Blocks in layout order.
    pub fn layout(&self) -> &[NodeIndex] {
        &self.layout
    }

    /// Blocks in layout order, with their handles.
    pub fn blocks(&self) -> impl Iterator<Item = (NodeIndex, &BasicBlock)> + '_ {
        self.layout
            .iter()
            .filter_map(|&node| self.cfg.node_weight(node).map(|block| (node, block)))
    }

    pub fn block_count(&self) -> usize {
        self.cfg.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.cfg.edge_count()
    }

    pub fn instruction_count(&self) -> usize {
        self.cfg.node_weights().map(|b| b.instructions.len()).sum()
    }

    /// The entry block is the first block in layout order.
    pub fn entry(&self) -> Option<NodeIndex> {
        self.layout.first().copied()
    }

    pub fn block(&self, node: NodeIndex) -> Result<&BasicBlock> {
        self.cfg
            .node_weight(node)
            .ok_or_else(|| Error::unresolved(RefKind::Block, format!("node {}", node.index())))
    }

    pub(crate) fn block_mut(&mut self, node: NodeIndex) -> Result<&mut BasicBlock> {
        self.cfg
            .node_weight_mut(node)
            .ok_or_else(|| Error::unresolved(RefKind::Block, format!("node {}", node.index())))
    }

    /// Resolves a block identifier to its graph handle.
    pub fn node_of(&self, id: &Ident) -> Option<NodeIndex> {
        self.blocks()
            .find(|(_, block)| block.id == *id)
            .map(|(node, _)| node)
    }

    /// Outgoing edges of `node`, true arm first and false arm last.
    pub fn successors(&self, node: NodeIndex) -> Result<Vec<(EdgeKind, NodeIndex)>> {
        self.block(node)?;
        let mut edges: Vec<_> = self
            .cfg
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| (edge.id(), *edge.weight(), edge.target()))
            .collect();
        edges.sort_by_key(|(id, kind, _)| (kind.rank(), id.index()));
        Ok(edges
            .into_iter()
            .map(|(_, kind, target)| (kind, target))
            .collect())
    }

    /// The successor reached along an edge of the given kind.
    pub fn successor(&self, node: NodeIndex, kind: EdgeKind) -> Option<NodeIndex> {
        self.cfg
            .edges_directed(node, Direction::Outgoing)
            .find(|edge| *edge.weight() == kind)
            .map(|edge| edge.target())
    }

    /// Distinct predecessors of `node`, in layout order.
    pub fn predecessors(&self, node: NodeIndex) -> Result<Vec<NodeIndex>> {
        self.block(node)?;
        let sources: HashSet<NodeIndex> = self
            .cfg
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        Ok(self
            .layout
            .iter()
            .copied()
            .filter(|n| sources.contains(n))
            .collect())
    }

    /// Neighbouring blocks of `node` in the given direction.
    ///
    /// Fails without a partial answer if `node` is not a block of this function.
    pub fn resolve_edges(&self, node: NodeIndex, direction: Direction) -> Result<Vec<NodeIndex>> {
        match direction {
            Direction::Incoming => self.predecessors(node),
            Direction::Outgoing => {
                let mut targets = Vec::new();
                for (_, target) in self.successors(node)? {
                    if !targets.contains(&target) {
                        targets.push(target);
                    }
                }
                Ok(targets)
            }
        }
    }

    /// Decodes an instruction of this function.
    pub fn statement(&self, inst: &Instruction) -> Result<Statement> {
        decoder::decode(self, inst)
    }

    /// Fake locals that no instruction writes and whose address never escapes.
    pub fn pristine_fake_locals(&self) -> Result<Vec<VarIndex>> {
        let mut written = HashSet::new();
        for block in self.cfg.node_weights() {
            for inst in &block.instructions {
                if inst.kind == StatementType::Invalid {
                    continue;
                }
                let statement = self.statement(inst)?;
                written.extend(statement.defined_var());
                written.extend(statement.escaping_var());
            }
        }
        Ok(self
            .variable_indices()
            .filter(|idx| self.variables[idx.0].is_fake_local() && !written.contains(idx))
            .collect())
    }

    /// Mutations recorded on this function since it was built.
    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    pub fn take_trace(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.trace)
    }
}
