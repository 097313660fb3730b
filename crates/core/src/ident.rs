//! Opaque entity identifiers of the form `ID_<GUID>`.
//!
//! Identifiers are the only way the input document cross-references entities. Inside a
//! [`Function`](crate::il::Function) they are resolved to graph indices once, at build time;
//! afterwards they survive as names for labels and for exporting the graph back out.

use crate::result::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const PREFIX: &str = "ID_";
const GUID_LEN: usize = 36;

/// A globally unique entity identifier.
///
/// Two identifiers are equal iff their GUIDs are equal; the textual prefix and the GUID
/// digits are matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(Uuid);

impl Ident {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derives a stable identifier from a parent identifier and a serial number.
    ///
    /// Used for entities created by graph mutations so that a seeded meshing pass produces
    /// the same identifiers on every run.
    pub fn derive(parent: &Ident, serial: u64) -> Self {
        Self(Uuid::new_v5(&parent.0, &serial.to_le_bytes()))
    }

    /// Returns the underlying GUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns a form usable as an assembler label (`L_` plus the GUID with underscores).
    pub fn label(&self) -> String {
        let mut buf = Uuid::encode_buffer();
        let guid = self.0.hyphenated().encode_upper(&mut buf);
        format!("L_{}", guid.replace('-', "_"))
    }
}

impl FromStr for Ident {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let malformed = || Error::MalformedIdentifier(s.to_string());

        if text.len() != PREFIX.len() + GUID_LEN {
            return Err(malformed());
        }
        let (prefix, guid) = text.split_at_checked(PREFIX.len()).ok_or_else(malformed)?;
        if !prefix.eq_ignore_ascii_case(PREFIX) {
            return Err(malformed());
        }
        // Uuid::try_parse also accepts braced/urn/simple forms; their lengths differ from 36.
        Uuid::try_parse(guid).map(Self).map_err(|_| malformed())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = Uuid::encode_buffer();
        write!(f, "{PREFIX}{}", self.0.hyphenated().encode_upper(&mut buf))
    }
}

impl Serialize for Ident {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ident {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses a space-separated identifier list as used by the document format.
pub fn parse_list(list: &str) -> Result<Vec<Ident>> {
    list.split_whitespace().map(str::parse).collect()
}

/// Joins identifiers back into the space-separated document form.
pub fn join_list<'a>(ids: impl IntoIterator<Item = &'a Ident>) -> String {
    ids.into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
