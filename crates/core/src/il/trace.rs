use super::EdgeKind;
use crate::ident::Ident;
use serde::{Deserialize, Serialize};

/// One graph mutation, as recorded by the mutation primitives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationKind {
    AddBlock {
        block: Ident,
        dead: bool,
    },
    Split {
        block: Ident,
        new_block: Ident,
        after: usize,
    },
    Clone {
        source: Ident,
        clone: Ident,
        deep: bool,
    },
    Link {
        source: Ident,
        target: Ident,
        kind: EdgeKind,
        exclusive: bool,
    },
    MakeConditional {
        block: Ident,
        true_target: Ident,
        false_target: Ident,
    },
    MakeUnconditional {
        block: Ident,
        target: Ident,
    },
    AddVariable {
        variable: Ident,
    },
    ReplaceTerminal {
        block: Ident,
        instruction: Ident,
    },
}

/// A recorded mutation together with the graph size it left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(flatten)]
    pub operation: OperationKind,
    pub blocks: usize,
    pub edges: usize,
}
