//! Core results and error types

use crate::il::StatementType;
use thiserror::Error;

/// What kind of entity an unresolved identifier was expected to name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Block,
    Variable,
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefKind::Block => f.write_str("basic block"),
            RefKind::Variable => f.write_str("variable"),
        }
    }
}

/// Core error type encompassing all core module errors.
#[derive(Debug, Error)]
pub enum Error {
    /// An identifier-based reference does not match any entity of the owning function.
    #[error("unresolved {kind} reference: {id}")]
    UnresolvedReference {
        /// The kind of entity the identifier should name.
        kind: RefKind,
        /// The offending identifier (or graph index) in textual form.
        id: String,
    },

    /// An identifier does not follow the `ID_<guid>` format.
    #[error("malformed identifier '{0}': expected ID_ followed by a 36-character GUID")]
    MalformedIdentifier(String),

    /// The emitter has no translation for the statement type.
    #[error("unsupported statement type {kind:?} in instruction {instruction}")]
    UnsupportedStatementType {
        /// Identifier of the instruction being translated.
        instruction: String,
        /// The untranslatable statement type.
        kind: StatementType,
    },

    /// The instruction text does not match the operand pattern of its statement type.
    #[error("invalid instruction shape in {instruction}: {reason}")]
    InvalidInstructionShape {
        /// Identifier of the offending instruction.
        instruction: String,
        /// What the decoder expected to find.
        reason: String,
    },

    /// A graph mutation was requested on a block that cannot support it.
    #[error("invalid block structure: {0}")]
    InvalidBlockStructure(String),

    /// The input document could not be deserialized.
    #[error("document error: {0}")]
    Document(#[from] serde_json::Error),

    /// Failed to read file at the specified path.
    #[error("could not read file '{path}': {source}")]
    FileRead {
        /// The path to the file that could not be read.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid hexadecimal in seed.
    #[error("invalid hexadecimal in seed")]
    InvalidSeedHex,

    /// Invalid seed length.
    #[error("invalid seed length: expected 64 hex chars, got {0}")]
    InvalidSeedLength(usize),
}

impl Error {
    pub(crate) fn unresolved(kind: RefKind, id: impl ToString) -> Self {
        Error::UnresolvedReference {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn shape(instruction: impl ToString, reason: impl Into<String>) -> Self {
        Error::InvalidInstructionShape {
            instruction: instruction.to_string(),
            reason: reason.into(),
        }
    }
}

/// Core result type
pub type Result<T> = std::result::Result<T, Error>;
