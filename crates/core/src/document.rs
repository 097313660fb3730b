//! JSON exchange document describing one routine.
//!
//! The document is a plain serde mirror of the on-disk format. [`Routine::from_document`]
//! turns it into the graph model; [`Routine::to_document`] writes a (possibly meshed) graph
//! back out so that it can be stored or re-ingested.
//!
//! [`Routine::from_document`]: crate::il::Routine::from_document
//! [`Routine::to_document`]: crate::il::Routine::to_document

use crate::ident::Ident;
use crate::il::{CalledFrom, SizeClass, StatementType};
use crate::result::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineDoc {
    #[serde(default)]
    pub description: String,
    pub functions: Vec<FunctionDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDoc {
    pub id: Ident,
    pub external_label: String,
    pub called_from: CalledFrom,
    #[serde(default)]
    pub inputs: VariableGroupDoc,
    #[serde(default)]
    pub outputs: VariableGroupDoc,
    #[serde(default)]
    pub locals: VariableGroupDoc,
    pub basic_blocks: Vec<BasicBlockDoc>,
}

/// Variables of one role, split by provenance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableGroupDoc {
    #[serde(default)]
    pub original: Vec<VariableDoc>,
    #[serde(default)]
    pub fake: Vec<VariableDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDoc {
    pub id: Ident,
    pub name: String,
    pub size: SizeClass,
    #[serde(default)]
    pub pointer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub const_value_in_param: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlockDoc {
    pub id: Ident,
    /// Space-separated predecessor identifiers.
    #[serde(default)]
    pub predecessors: String,
    /// Space-separated successor identifiers; a conditional block lists its true successor
    /// first and its false successor last.
    #[serde(default)]
    pub successors: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dead: bool,
    pub instructions: Vec<InstructionDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionDoc {
    pub id: Ident,
    pub statement_type: StatementType,
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub poly_required: bool,
    /// Space-separated identifiers of referenced variables.
    #[serde(default)]
    pub ref_vars: String,
}

impl RoutineDoc {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| Error::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
