//! Graph mutation primitives.
//!
//! Every primitive checks its preconditions before touching the graph, so a failed call
//! leaves the function exactly as it was. Each successful call appends a [`TraceEvent`].

use super::{
    BasicBlock, EdgeKind, Function, Instruction, OperationKind, Provenance, SizeClass,
    StatementType, TraceEvent, VarIndex, VarRole, Variable,
};
use crate::decoder::{Condition, Operand, Statement};
use crate::ident::Ident;
use crate::result::{Error, RefKind, Result};
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use tracing::debug;

impl Function {
    /// Returns an identifier no entity of this function uses yet.
    ///
    /// Identifiers are derived from the function identifier and a running serial, so the
    /// same sequence of mutations always produces the same identifiers.
    pub fn fresh_ident(&mut self) -> Ident {
        loop {
            let id = Ident::derive(&self.id, self.serial);
            self.serial += 1;
            if self.used_ids.insert(id) {
                return id;
            }
        }
    }

    /// Appends a new block holding a single no-op, placed in layout after `after` (or at the
    /// end).
    pub fn add_block(&mut self, after: Option<NodeIndex>, dead: bool) -> Result<NodeIndex> {
        if let Some(anchor) = after {
            self.block(anchor)?;
        }
        let id = self.fresh_ident();
        let nop = Instruction::nop(self.fresh_ident());
        let node = self.cfg.add_node(BasicBlock {
            id,
            instructions: vec![nop],
            dead,
        });
        self.place_after(after, node);
        self.record(OperationKind::AddBlock { block: id, dead });
        Ok(node)
    }

    /// Splits `node` after the instruction at `index`.
    ///
    /// Instructions after `index` move to a new block (a no-op when nothing moves), placed
    /// right after `node` in layout. The new block takes over every outgoing edge of `node`
    /// and becomes its only successor: when the kept part ends in an unconditional jump that
    /// jump is retargeted at the new block, otherwise `node` falls through into it.
    pub fn split_after(&mut self, node: NodeIndex, index: usize) -> Result<NodeIndex> {
        let block = self.block(node)?;
        let len = block.instructions.len();
        if index >= len {
            return Err(Error::InvalidBlockStructure(format!(
                "cannot split block {} after instruction {index}: it holds {len}",
                block.id
            )));
        }
        if block.instructions[index].kind == StatementType::ConditionalJump {
            return Err(Error::InvalidBlockStructure(format!(
                "cannot split block {} after its conditional jump",
                block.id
            )));
        }
        let block_id = block.id;
        let dead = block.dead;
        let kept_goto = block.instructions[index].kind == StatementType::UnconditionalJump;

        let new_id = self.fresh_ident();
        let mut moved = self.block_mut(node)?.instructions.split_off(index + 1);
        if moved.is_empty() {
            moved.push(Instruction::nop(self.fresh_ident()));
        }
        let new_is_jump = moved.last().is_some_and(|inst| inst.kind.is_jump());

        let outgoing = self.take_outgoing(node);
        let new_node = self.cfg.add_node(BasicBlock {
            id: new_id,
            instructions: moved,
            dead,
        });
        self.place_after(Some(node), new_node);

        for (kind, target) in outgoing {
            let kind = if new_is_jump { kind } else { EdgeKind::Fallthrough };
            self.cfg.add_edge(new_node, target, kind);
        }
        let link = if kept_goto {
            EdgeKind::Jump
        } else {
            EdgeKind::Fallthrough
        };
        self.cfg.add_edge(node, new_node, link);
        self.refresh_jump_text(node)?;

        debug!("split {} after #{index} into {}", block_id, new_id);
        self.record(OperationKind::Split {
            block: block_id,
            new_block: new_id,
            after: index,
        });
        Ok(new_node)
    }

    /// Copies `node` into a new block at the end of the layout, without edges.
    ///
    /// A deep clone gives every copied instruction a fresh identifier; a shallow clone keeps
    /// them.
    pub fn clone_block(&mut self, node: NodeIndex, deep: bool) -> Result<NodeIndex> {
        let source = self.block(node)?.clone();
        let id = self.fresh_ident();
        let mut instructions = source.instructions;
        if deep {
            for inst in &mut instructions {
                inst.id = self.fresh_ident();
            }
        }
        let clone = self.cfg.add_node(BasicBlock {
            id,
            instructions,
            dead: source.dead,
        });
        self.layout.push(clone);
        self.record(OperationKind::Clone {
            source: source.id,
            clone: id,
            deep,
        });
        Ok(clone)
    }

    /// Adds an edge `node -> target`; `exclusive` first drops every outgoing edge of `node`.
    pub fn link_to_successor(
        &mut self,
        node: NodeIndex,
        target: NodeIndex,
        kind: EdgeKind,
        exclusive: bool,
    ) -> Result<()> {
        let source = self.block(node)?.id;
        let target_id = self.block(target)?.id;
        if exclusive {
            self.take_outgoing(node);
        }
        self.cfg.add_edge(node, target, kind);
        self.refresh_jump_text(node)?;
        self.record(OperationKind::Link {
            source,
            target: target_id,
            kind,
            exclusive,
        });
        Ok(())
    }

    /// Gives `node` the outgoing edges of `model`, with the same kinds.
    pub fn mirror_successors(&mut self, node: NodeIndex, model: NodeIndex) -> Result<()> {
        let edges = self.successors(model)?;
        self.block(node)?;
        self.take_outgoing(node);
        for (kind, target) in edges {
            self.link_to_successor(node, target, kind, false)?;
        }
        Ok(())
    }

    /// Rewrites the terminal no-op or unconditional jump of `node` into
    /// `if condition goto true_target`, falling back to `false_target`.
    pub fn make_conditional(
        &mut self,
        node: NodeIndex,
        condition: Condition,
        true_target: NodeIndex,
        false_target: NodeIndex,
    ) -> Result<()> {
        let block = self.block(node)?;
        let block_id = block.id;
        if !matches!(
            block.terminal_kind(),
            Some(StatementType::NoOperation | StatementType::UnconditionalJump)
        ) {
            return Err(Error::InvalidBlockStructure(format!(
                "block {block_id} must end in a no-op or unconditional jump to become conditional"
            )));
        }
        let true_id = self.block(true_target)?.id;
        let false_id = self.block(false_target)?.id;
        if self.variable(condition.var).is_none() {
            return Err(Error::unresolved(
                RefKind::Variable,
                format!("index {}", condition.var.index()),
            ));
        }

        self.write_terminal(
            node,
            Statement::IfGoto {
                lhs: condition.var,
                relop: condition.relop,
                rhs: Operand::Const(condition.rhs),
                target: true_id,
            },
        )?;
        self.take_outgoing(node);
        self.cfg.add_edge(node, true_target, EdgeKind::BranchTrue);
        self.cfg.add_edge(node, false_target, EdgeKind::BranchFalse);

        self.record(OperationKind::MakeConditional {
            block: block_id,
            true_target: true_id,
            false_target: false_id,
        });
        Ok(())
    }

    /// Rewrites the terminal no-op or jump of `node` into `goto target`.
    pub fn make_unconditional(&mut self, node: NodeIndex, target: NodeIndex) -> Result<()> {
        let block = self.block(node)?;
        let block_id = block.id;
        if !matches!(
            block.terminal_kind(),
            Some(
                StatementType::NoOperation
                    | StatementType::UnconditionalJump
                    | StatementType::ConditionalJump
            )
        ) {
            return Err(Error::InvalidBlockStructure(format!(
                "block {block_id} must end in a no-op or jump to become an unconditional jump"
            )));
        }
        let target_id = self.block(target)?.id;

        self.write_terminal(node, Statement::Goto { target: target_id })?;
        self.take_outgoing(node);
        self.cfg.add_edge(node, target, EdgeKind::Jump);

        self.record(OperationKind::MakeUnconditional {
            block: block_id,
            target: target_id,
        });
        Ok(())
    }

    /// Replaces the terminal instruction of `node` with `statement`, keeping its identifier.
    /// Edges are left alone.
    pub fn replace_terminal(&mut self, node: NodeIndex, statement: Statement) -> Result<()> {
        let (block_id, inst_id) = {
            let block = self.block(node)?;
            let inst = block.terminal().ok_or_else(|| {
                Error::InvalidBlockStructure(format!("block {} is empty", block.id))
            })?;
            (block.id, inst.id)
        };
        self.write_terminal(node, statement)?;
        self.record(OperationKind::ReplaceTerminal {
            block: block_id,
            instruction: inst_id,
        });
        Ok(())
    }

    /// Adds a Fake local variable and returns its handle.
    pub fn add_fake_local(&mut self, name: impl Into<String>, value: i64) -> VarIndex {
        let id = self.fresh_ident();
        self.variables.push(Variable {
            id,
            name: name.into(),
            size: SizeClass::DWord,
            pointer: false,
            role: VarRole::Local,
            provenance: Provenance::Fake,
            const_value: Some(value),
        });
        self.record(OperationKind::AddVariable { variable: id });
        VarIndex(self.variables.len() - 1)
    }

    /// Flags every instruction of `node` as needing alternative instruction selection.
    pub fn mark_poly_required(&mut self, node: NodeIndex) -> Result<()> {
        for inst in &mut self.block_mut(node)?.instructions {
            inst.poly_required = true;
        }
        Ok(())
    }

    /// Regenerates the text of a terminal jump so that its target matches the edges.
    pub(crate) fn refresh_jump_text(&mut self, node: NodeIndex) -> Result<()> {
        let block = self.block(node)?;
        let Some(terminal) = block.terminal() else {
            return Ok(());
        };
        let statement = match terminal.kind {
            StatementType::UnconditionalJump => {
                let Some(target) = self.successor(node, EdgeKind::Jump) else {
                    return Ok(());
                };
                Statement::Goto {
                    target: self.block(target)?.id,
                }
            }
            StatementType::ConditionalJump => {
                let Some(target) = self.successor(node, EdgeKind::BranchTrue) else {
                    return Ok(());
                };
                match self.statement(terminal)? {
                    Statement::IfGoto { lhs, relop, rhs, .. } => Statement::IfGoto {
                        lhs,
                        relop,
                        rhs,
                        target: self.block(target)?.id,
                    },
                    _ => return Ok(()),
                }
            }
            _ => return Ok(()),
        };
        self.write_terminal(node, statement)
    }

    fn write_terminal(&mut self, node: NodeIndex, statement: Statement) -> Result<()> {
        let (text, refs) = statement.render(self);
        let kind = statement.kind();
        let block = self.block_mut(node)?;
        let id = block.id;
        let inst = block.instructions.last_mut().ok_or_else(|| {
            Error::InvalidBlockStructure(format!("block {id} is empty"))
        })?;
        inst.kind = kind;
        inst.text = text;
        inst.refs = refs;
        Ok(())
    }

    fn take_outgoing(&mut self, node: NodeIndex) -> Vec<(EdgeKind, NodeIndex)> {
        let edges: Vec<_> = self
            .cfg
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| (edge.id(), *edge.weight(), edge.target()))
            .collect();
        edges
            .into_iter()
            .map(|(id, kind, target)| {
                self.cfg.remove_edge(id);
                (kind, target)
            })
            .collect()
    }

    fn place_after(&mut self, after: Option<NodeIndex>, node: NodeIndex) {
        let position = after
            .and_then(|anchor| self.layout.iter().position(|&n| n == anchor))
            .map(|pos| pos + 1)
            .unwrap_or(self.layout.len());
        self.layout.insert(position, node);
    }

    fn record(&mut self, operation: OperationKind) {
        let event = TraceEvent {
            operation,
            blocks: self.cfg.node_count(),
            edges: self.cfg.edge_count(),
        };
        self.trace.push(event);
    }
}
