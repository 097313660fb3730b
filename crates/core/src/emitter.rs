//! Lowering of a (possibly meshed) function to 32-bit x86 assembly, Intel syntax.
//!
//! Every variable lives in a DWORD stack slot: inputs above the saved frame pointer starting
//! at `ebp+8`, everything else below it. Blocks are reordered so that fallthrough successors
//! follow their predecessor whenever possible; any fallthrough that could not be placed next
//! gets an explicit `JMP`.
//!
//! Instructions flagged `poly_required` are lowered with an alternative but equivalent
//! instruction selection, so a decoy block does not share its machine code with the block
//! it was cloned from.

use crate::decoder::{ArithOp, Operand, PointerForm, RelOp, Statement, UnaryOp};
use crate::il::{
    CalledFrom, EdgeKind, Function, Instruction, Routine, StatementType, VarIndex, VarRole,
};
use crate::result::{Error, Result};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const SLOT: i64 = 4;

/// Lowers every function of the routine, in order.
pub fn emit_routine(routine: &Routine) -> Result<String> {
    let mut listing = String::new();
    for func in &routine.functions {
        listing.push_str(&emit_function(func)?);
        listing.push('\n');
    }
    Ok(listing)
}

/// Lowers one function.
pub fn emit_function(func: &Function) -> Result<String> {
    let order = block_order(func)?;
    let mut emitter = Emitter::new(func, &order)?;
    emitter.prologue();
    for (position, &node) in order.iter().enumerate() {
        emitter.block(position, node)?;
    }
    emitter.epilogue();
    debug!(
        "emitted {} ({} blocks, {} lines)",
        func.external_label,
        order.len(),
        emitter.lines.len()
    );
    Ok(emitter.finish())
}

/// Block placement: depth-first from the entry, chaining each block's fallthrough (or
/// false-branch) successor directly after it when still unplaced. Blocks unreachable from
/// the entry follow in layout order.
pub fn block_order(func: &Function) -> Result<Vec<NodeIndex>> {
    let mut order = Vec::with_capacity(func.block_count());
    let mut placed = HashSet::new();
    let mut worklist: Vec<NodeIndex> = func.entry().into_iter().collect();

    while let Some(start) = worklist.pop() {
        let mut current = Some(start);
        while let Some(node) = current {
            if !placed.insert(node) {
                break;
            }
            order.push(node);
            let successors = func.successors(node)?;
            let next = successors
                .iter()
                .find(|(kind, _)| is_fallthrough(*kind))
                .map(|(_, target)| *target);
            for (_, target) in successors.iter().rev() {
                if Some(*target) != next && !placed.contains(target) {
                    worklist.push(*target);
                }
            }
            current = next.filter(|target| !placed.contains(target));
        }
    }

    for &node in func.layout() {
        if placed.insert(node) {
            order.push(node);
        }
    }
    Ok(order)
}

fn is_fallthrough(kind: EdgeKind) -> bool {
    matches!(kind, EdgeKind::Fallthrough | EdgeKind::BranchFalse)
}

struct Emitter<'a> {
    func: &'a Function,
    order: &'a [NodeIndex],
    offsets: HashMap<VarIndex, i64>,
    frame: i64,
    labelled: HashSet<NodeIndex>,
    lines: Vec<String>,
}

impl<'a> Emitter<'a> {
    fn new(func: &'a Function, order: &'a [NodeIndex]) -> Result<Self> {
        let mut offsets = HashMap::new();
        let mut below = 0;
        let mut above = 8;
        for idx in func.variable_indices() {
            let Some(var) = func.variable(idx) else {
                continue;
            };
            let size = i64::from(var.size.bytes()).max(SLOT);
            if var.role == VarRole::Input {
                offsets.insert(idx, above);
                above += size;
            } else {
                below -= size;
                offsets.insert(idx, below);
            }
        }

        let labelled = labelled_blocks(func, order)?;
        Ok(Self {
            func,
            order,
            offsets,
            frame: -below,
            labelled,
            lines: Vec::new(),
        })
    }

    fn finish(self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }

    fn raw(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn op(&mut self, line: impl AsRef<str>) {
        self.lines.push(format!("    {}", line.as_ref()));
    }

    fn exit_label(&self) -> String {
        format!("{}_exit", self.func.id.label())
    }

    fn block_label(&self, node: NodeIndex) -> String {
        self.func
            .cfg()
            .node_weight(node)
            .map(|block| block.id.label())
            .unwrap_or_else(|| format!("L_node{}", node.index()))
    }

    fn slot(&self, idx: VarIndex) -> String {
        let offset = self.offsets.get(&idx).copied().unwrap_or_default();
        if offset >= 0 {
            format!("DWORD PTR [ebp + {offset}]")
        } else {
            format!("DWORD PTR [ebp - {}]", -offset)
        }
    }

    fn value(&self, operand: Operand) -> String {
        match operand {
            Operand::Var(idx) => self.slot(idx),
            Operand::Const(value) => value.to_string(),
        }
    }

    fn prologue(&mut self) {
        if self.func.called_from != CalledFrom::InternalOnly {
            let label = self.func.external_label.clone();
            self.raw(format!("global {label}"));
            self.raw(format!("{label}:"));
        }
        let label = self.func.id.label();
        self.raw(format!("{label}:"));
        self.op("PUSH ebp");
        self.op("MOV ebp, esp");
        if self.frame > 0 {
            self.op(format!("SUB esp, {}", self.frame));
        }
        let fakes: Vec<(VarIndex, i64)> = self
            .func
            .variable_indices()
            .filter_map(|idx| self.func.variable(idx).map(|var| (idx, var)))
            .filter(|(_, var)| var.is_fake_local())
            .map(|(idx, var)| (idx, var.known_value()))
            .collect();
        for (idx, value) in fakes {
            let slot = self.slot(idx);
            self.op(format!("MOV {slot}, {value}"));
        }
    }

    fn epilogue(&mut self) {
        let exit = self.exit_label();
        self.raw(format!("{exit}:"));
        self.op("MOV esp, ebp");
        self.op("POP ebp");
        self.op("RET");
    }

    fn block(&mut self, position: usize, node: NodeIndex) -> Result<()> {
        let func = self.func;
        let block = func.block(node)?;
        if self.labelled.contains(&node) {
            let label = block.id.label();
            self.raw(format!("{label}:"));
        }
        for inst in &block.instructions {
            self.instruction(node, inst)?;
        }

        let next = self.order.get(position + 1).copied();
        let terminal = block.terminal_kind();
        let leaves = matches!(terminal, Some(StatementType::UnconditionalJump))
            || block
                .terminal()
                .map(|inst| is_return(func, inst))
                .transpose()?
                .unwrap_or(false);
        if leaves {
            return Ok(());
        }
        let fallthrough = func
            .successors(node)?
            .into_iter()
            .find(|(kind, _)| is_fallthrough(*kind))
            .map(|(_, target)| target);
        match fallthrough {
            Some(target) if Some(target) == next => {}
            Some(target) => {
                let label = self.block_label(target);
                self.op(format!("JMP {label}"));
            }
            None => {
                let exit = self.exit_label();
                self.op(format!("JMP {exit}"));
            }
        }
        Ok(())
    }

    fn instruction(&mut self, node: NodeIndex, inst: &Instruction) -> Result<()> {
        let statement = self.func.statement(inst)?;
        let poly = inst.poly_required;
        match statement {
            Statement::Nop => self.op("NOP"),
            Statement::Goto { .. } => {
                let target = self
                    .func
                    .successor(node, EdgeKind::Jump)
                    .map(|t| self.block_label(t))
                    .unwrap_or_else(|| self.exit_label());
                if poly {
                    self.op(format!("PUSH {target}"));
                    self.op("RET");
                } else {
                    self.op(format!("JMP {target}"));
                }
            }
            Statement::IfGoto {
                lhs, relop, rhs, ..
            } => {
                let target = self
                    .func
                    .successor(node, EdgeKind::BranchTrue)
                    .map(|t| self.block_label(t))
                    .unwrap_or_else(|| self.exit_label());
                let lhs = self.slot(lhs);
                self.op(format!("MOV eax, {lhs}"));
                let rhs = self.load_rhs(rhs);
                let compare = if poly { "SUB" } else { "CMP" };
                self.op(format!("{compare} eax, {rhs}"));
                self.op(format!("{} {target}", jcc(relop)));
            }
            Statement::Copy { dst, src } => {
                let dst = self.slot(dst);
                let src = self.value(src);
                if poly {
                    self.op(format!("PUSH {src}"));
                    self.op(format!("POP {dst}"));
                } else if src.starts_with("DWORD") {
                    self.op(format!("MOV eax, {src}"));
                    self.op(format!("MOV {dst}, eax"));
                } else {
                    self.op(format!("MOV {dst}, {src}"));
                }
            }
            Statement::UnaryAssign { dst, op, src } => {
                let src = self.slot(src);
                self.op(format!("MOV eax, {src}"));
                match op {
                    UnaryOp::Neg if poly => {
                        self.op("NOT eax");
                        self.op("ADD eax, 1");
                    }
                    UnaryOp::Neg => self.op("NEG eax"),
                    UnaryOp::Not => {
                        self.op("CMP eax, 0");
                        self.op("SETE al");
                        self.op("MOVZX eax, al");
                    }
                }
                let dst = self.slot(dst);
                self.op(format!("MOV {dst}, eax"));
            }
            Statement::FullAssign { dst, lhs, op, rhs } => {
                let lhs = self.slot(lhs);
                self.op(format!("MOV eax, {lhs}"));
                self.arithmetic(op, rhs, poly);
                let dst = self.slot(dst);
                self.op(format!("MOV {dst}, eax"));
            }
            Statement::Pointer(form) => self.pointer(form),
            Statement::IndexedLoad { dst, base, index } => {
                let base = self.slot(base);
                let index = self.value(index);
                self.op(format!("MOV eax, {base}"));
                self.op(format!("MOV ecx, {index}"));
                self.op("MOV eax, DWORD PTR [eax + ecx*4]");
                let dst = self.slot(dst);
                self.op(format!("MOV {dst}, eax"));
            }
            Statement::IndexedStore { base, index, src } => {
                let base = self.slot(base);
                let index = self.value(index);
                let src = self.value(src);
                self.op(format!("MOV eax, {base}"));
                self.op(format!("MOV ecx, {index}"));
                self.op(format!("MOV edx, {src}"));
                self.op("MOV DWORD PTR [eax + ecx*4], edx");
            }
            Statement::Param(value) => {
                let value = self.value(value);
                self.op(format!("PUSH {value}"));
            }
            Statement::Call { callee, argc } => {
                self.op(format!("CALL {}", callee.label()));
                if argc > 0 {
                    let bytes = argc
                        .checked_mul(SLOT)
                        .ok_or_else(|| Error::shape(inst.id, "argument count out of range"))?;
                    self.op(format!("ADD esp, {bytes}"));
                }
            }
            Statement::Return(value) => {
                if let Some(value) = value {
                    let value = self.value(value);
                    self.op(format!("MOV eax, {value}"));
                }
                let exit = self.exit_label();
                self.op(format!("JMP {exit}"));
            }
            Statement::Retrieve(dst) => {
                let dst = self.slot(dst);
                self.op(format!("MOV {dst}, eax"));
            }
        }
        Ok(())
    }

    /// Loads a comparison right-hand side, going through `ecx` for memory operands.
    fn load_rhs(&mut self, rhs: Operand) -> String {
        match rhs {
            Operand::Var(idx) => {
                let slot = self.slot(idx);
                self.op(format!("MOV ecx, {slot}"));
                "ecx".to_string()
            }
            Operand::Const(value) => value.to_string(),
        }
    }

    fn arithmetic(&mut self, op: ArithOp, rhs: Operand, poly: bool) {
        match (op, rhs) {
            (ArithOp::Add | ArithOp::Sub, Operand::Const(value)) => {
                let (mnemonic, value) = match (op, poly) {
                    (ArithOp::Add, false) => ("ADD", value),
                    (ArithOp::Add, true) => ("SUB", value.wrapping_neg()),
                    (_, false) => ("SUB", value),
                    (_, true) => ("ADD", value.wrapping_neg()),
                };
                self.op(format!("{mnemonic} eax, {value}"));
            }
            (ArithOp::Add | ArithOp::Sub, Operand::Var(idx)) => {
                let slot = self.slot(idx);
                self.op(format!("MOV ecx, {slot}"));
                if poly {
                    self.op("NEG ecx");
                    let mnemonic = if op == ArithOp::Add { "SUB" } else { "ADD" };
                    self.op(format!("{mnemonic} eax, ecx"));
                } else {
                    let mnemonic = if op == ArithOp::Add { "ADD" } else { "SUB" };
                    self.op(format!("{mnemonic} eax, ecx"));
                }
            }
            (ArithOp::Mul, rhs) => {
                let rhs = self.value(rhs);
                self.op(format!("MOV ecx, {rhs}"));
                self.op("IMUL eax, ecx");
            }
            (ArithOp::Div | ArithOp::Mod, rhs) => {
                let rhs = self.value(rhs);
                self.op(format!("MOV ecx, {rhs}"));
                self.op("CDQ");
                self.op("IDIV ecx");
                if op == ArithOp::Mod {
                    self.op("MOV eax, edx");
                }
            }
        }
    }

    fn pointer(&mut self, form: PointerForm) {
        match form {
            PointerForm::AddressOf { dst, src } => {
                let src = self.slot(src);
                let address = src.trim_start_matches("DWORD PTR ").to_string();
                self.op(format!("LEA eax, {address}"));
                let dst = self.slot(dst);
                self.op(format!("MOV {dst}, eax"));
            }
            PointerForm::Load { dst, ptr } => {
                let ptr = self.slot(ptr);
                self.op(format!("MOV eax, {ptr}"));
                self.op("MOV eax, DWORD PTR [eax]");
                let dst = self.slot(dst);
                self.op(format!("MOV {dst}, eax"));
            }
            PointerForm::Store { ptr, src } => {
                let ptr = self.slot(ptr);
                let src = self.value(src);
                self.op(format!("MOV eax, {ptr}"));
                self.op(format!("MOV ecx, {src}"));
                self.op("MOV DWORD PTR [eax], ecx");
            }
        }
    }
}

fn is_return(func: &Function, inst: &Instruction) -> Result<bool> {
    if inst.kind != StatementType::Procedural {
        return Ok(false);
    }
    Ok(matches!(func.statement(inst)?, Statement::Return(_)))
}

fn jcc(relop: RelOp) -> &'static str {
    match relop {
        RelOp::Equals => "JE",
        RelOp::NotEquals => "JNE",
        RelOp::Greater => "JG",
        RelOp::GreaterOrEquals => "JGE",
        RelOp::Smaller => "JL",
        RelOp::SmallerOrEquals => "JLE",
    }
}

/// A block gets a label when it is the target of a jump edge, has several predecessors, or
/// its only predecessor is not the block emitted right before it.
fn labelled_blocks(func: &Function, order: &[NodeIndex]) -> Result<HashSet<NodeIndex>> {
    let mut labelled = HashSet::new();
    for (position, &node) in order.iter().enumerate() {
        let preds = func.predecessors(node)?;
        let previous = position.checked_sub(1).and_then(|p| order.get(p)).copied();
        let jump_target = func
            .cfg()
            .edges_directed(node, petgraph::Direction::Incoming)
            .any(|edge| !is_fallthrough(*edge.weight()));
        if jump_target || preds.len() > 1 || (preds.len() == 1 && Some(preds[0]) != previous) {
            labelled.insert(node);
        }
    }
    Ok(labelled)
}
