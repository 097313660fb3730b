use super::{
    BasicBlock, EdgeKind, Function, Instruction, Provenance, Routine, StatementType, VarRole,
    Variable,
};
use crate::document::{
    BasicBlockDoc, FunctionDoc, InstructionDoc, RoutineDoc, VariableDoc, VariableGroupDoc,
};
use crate::ident::{self, Ident};
use crate::result::{Error, RefKind, Result};
use petgraph::graph::NodeIndex;
use tracing::debug;

impl Routine {
    pub fn from_document(doc: &RoutineDoc) -> Result<Self> {
        let functions = doc
            .functions
            .iter()
            .map(Function::from_document)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            description: doc.description.clone(),
            functions,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_document(&RoutineDoc::from_json(json)?)
    }

    /// Exports the current graph back into document form.
    pub fn to_document(&self) -> RoutineDoc {
        RoutineDoc {
            description: self.description.clone(),
            functions: self.functions.iter().map(Function::to_document).collect(),
        }
    }
}

impl Function {
    /// Builds a function from its document form.
    ///
    /// Variable references of instructions and successor lists are resolved eagerly; every
    /// listed predecessor must resolve and must list the block among its successors.
    pub fn from_document(doc: &FunctionDoc) -> Result<Self> {
        let mut func = Function::new(doc.id, doc.external_label.clone(), doc.called_from);

        let groups = [
            (&doc.inputs, VarRole::Input),
            (&doc.outputs, VarRole::Output),
            (&doc.locals, VarRole::Local),
        ];
        for (group, role) in groups {
            for (vars, provenance) in [
                (&group.original, Provenance::Original),
                (&group.fake, Provenance::Fake),
            ] {
                for var in vars {
                    func.claim(var.id)?;
                    func.variables.push(Variable {
                        id: var.id,
                        name: var.name.clone(),
                        size: var.size,
                        pointer: var.pointer,
                        role,
                        provenance,
                        const_value: var.const_value_in_param,
                    });
                }
            }
        }

        for block_doc in &doc.basic_blocks {
            func.claim(block_doc.id)?;
            let node = func.cfg.add_node(BasicBlock {
                id: block_doc.id,
                instructions: Vec::with_capacity(block_doc.instructions.len()),
                dead: block_doc.dead,
            });
            func.layout.push(node);
            for inst_doc in &block_doc.instructions {
                func.push_instruction(node, inst_doc)?;
            }
            if block_doc.instructions.is_empty() {
                return Err(Error::InvalidBlockStructure(format!(
                    "block {} has no instructions",
                    block_doc.id
                )));
            }
        }

        let nodes = func.layout.clone();
        for (block_doc, &node) in doc.basic_blocks.iter().zip(&nodes) {
            let targets = func.resolve_blocks(&block_doc.successors)?;
            for (kind, target) in func.edge_kinds(node, &targets)? {
                func.cfg.add_edge(node, target, kind);
            }
        }

        for (block_doc, &node) in doc.basic_blocks.iter().zip(&nodes) {
            for pred in func.resolve_blocks(&block_doc.predecessors)? {
                if !func.cfg.contains_edge(pred, node) {
                    return Err(Error::InvalidBlockStructure(format!(
                        "block {} lists predecessor {} which does not list it as successor",
                        block_doc.id, func.cfg[pred].id
                    )));
                }
            }
        }

        debug!(
            "built function {} ({}): {} variables, {} blocks, {} edges",
            func.external_label,
            func.id,
            func.variables.len(),
            func.block_count(),
            func.edge_count()
        );
        Ok(func)
    }

    /// Builds an instruction of this function, resolving its variable references.
    pub fn build_instruction(&self, doc: &InstructionDoc) -> Result<Instruction> {
        let refs = ident::parse_list(&doc.ref_vars)?
            .iter()
            .map(|id| {
                self.variable_index(id)
                    .ok_or_else(|| Error::unresolved(RefKind::Variable, id))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Instruction {
            id: doc.id,
            kind: doc.statement_type,
            text: doc.text.trim().to_string(),
            poly_required: doc.poly_required,
            refs,
        })
    }

    /// Builds an instruction and appends it to `node`.
    ///
    /// The block is left untouched when construction fails.
    pub fn push_instruction(&mut self, node: NodeIndex, doc: &InstructionDoc) -> Result<()> {
        self.block(node)?;
        let inst = self.build_instruction(doc)?;
        self.claim(inst.id)?;
        self.block_mut(node)?.instructions.push(inst);
        Ok(())
    }

    /// Exports the function back into document form, blocks in layout order.
    pub fn to_document(&self) -> FunctionDoc {
        let group = |role: VarRole| {
            let pick = |provenance: Provenance| -> Vec<VariableDoc> {
                self.variables
                    .iter()
                    .filter(|v| v.role == role && v.provenance == provenance)
                    .map(|v| VariableDoc {
                        id: v.id,
                        name: v.name.clone(),
                        size: v.size,
                        pointer: v.pointer,
                        const_value_in_param: v.const_value,
                    })
                    .collect()
            };
            VariableGroupDoc {
                original: pick(Provenance::Original),
                fake: pick(Provenance::Fake),
            }
        };

        let basic_blocks = self
            .blocks()
            .map(|(node, block)| {
                let ids_of = |nodes: Vec<NodeIndex>| -> Vec<Ident> {
                    nodes.into_iter().map(|n| self.cfg[n].id).collect()
                };
                let preds = self.predecessors(node).unwrap_or_default();
                let succs = self
                    .successors(node)
                    .map(|edges| edges.into_iter().map(|(_, target)| target).collect())
                    .unwrap_or_default();
                BasicBlockDoc {
                    id: block.id,
                    predecessors: ident::join_list(&ids_of(preds)),
                    successors: ident::join_list(&ids_of(succs)),
                    dead: block.dead,
                    instructions: block
                        .instructions
                        .iter()
                        .map(|inst| InstructionDoc {
                            id: inst.id,
                            statement_type: inst.kind,
                            text: inst.text.clone(),
                            poly_required: inst.poly_required,
                            ref_vars: ident::join_list(
                                inst.refs
                                    .iter()
                                    .filter_map(|r| self.variable(*r))
                                    .map(|v| &v.id),
                            ),
                        })
                        .collect(),
                }
            })
            .collect();

        FunctionDoc {
            id: self.id,
            external_label: self.external_label.clone(),
            called_from: self.called_from,
            inputs: group(VarRole::Input),
            outputs: group(VarRole::Output),
            locals: group(VarRole::Local),
            basic_blocks,
        }
    }

    /// Records an identifier as taken by an entity of this function.
    pub(crate) fn claim(&mut self, id: Ident) -> Result<()> {
        if self.used_ids.insert(id) {
            Ok(())
        } else {
            Err(Error::InvalidBlockStructure(format!(
                "identifier {id} is used by more than one entity"
            )))
        }
    }

    fn resolve_blocks(&self, list: &str) -> Result<Vec<NodeIndex>> {
        ident::parse_list(list)?
            .iter()
            .map(|id| {
                self.node_of(id)
                    .ok_or_else(|| Error::unresolved(RefKind::Block, id))
            })
            .collect()
    }

    /// Derives edge kinds for a block's document successor list from its terminal.
    fn edge_kinds(
        &self,
        node: NodeIndex,
        targets: &[NodeIndex],
    ) -> Result<Vec<(EdgeKind, NodeIndex)>> {
        let block = self.block(node)?;
        let bad = |expected: &str| {
            Error::InvalidBlockStructure(format!(
                "block {} has {} successors, expected {expected}",
                block.id,
                targets.len()
            ))
        };
        match (block.terminal_kind(), targets) {
            (Some(StatementType::ConditionalJump), [taken, not_taken]) => Ok(vec![
                (EdgeKind::BranchTrue, *taken),
                (EdgeKind::BranchFalse, *not_taken),
            ]),
            (Some(StatementType::ConditionalJump), [both]) => Ok(vec![
                (EdgeKind::BranchTrue, *both),
                (EdgeKind::BranchFalse, *both),
            ]),
            (Some(StatementType::ConditionalJump), _) => Err(bad("one or two")),
            (Some(StatementType::UnconditionalJump), [target]) => {
                Ok(vec![(EdgeKind::Jump, *target)])
            }
            (Some(StatementType::UnconditionalJump), _) => Err(bad("exactly one")),
            (_, []) => Ok(Vec::new()),
            (_, [next]) => Ok(vec![(EdgeKind::Fallthrough, *next)]),
            (_, _) => Err(bad("at most one")),
        }
    }
}
