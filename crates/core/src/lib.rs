//! Core of the TAC control-flow mesher: identifiers, the IL graph model and its mutation
//! primitives, document ingestion, the instruction decoder, seeded choice, and the x86
//! emitter.

pub mod choice;
pub mod decoder;
pub mod document;
pub mod emitter;
pub mod ident;
pub mod il;
pub mod result;
pub mod seed;

pub use ident::Ident;
pub use result::{Error, Result};
