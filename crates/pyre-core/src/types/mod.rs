//! Data type representations for stored values.
//!
//! Every value carries a type tag (the enum variant) and an encoding
//! tag describing its in-memory representation. Encodings only ever
//! promote (packed hash to table hash); they never demote.

pub mod hash;
pub mod list;

use bytes::Bytes;

pub use hash::{HashValue, SetOutcome};
pub use list::ListValue;

/// A stored value in the keyspace.
#[derive(Debug)]
pub enum Value {
    /// Binary-safe string data.
    Str(Bytes),

    /// Ordered list of binary-safe elements, backed by a quicklist.
    List(ListValue),

    /// Field/value map with a packed small encoding and a hash-table
    /// large encoding.
    Hash(HashValue),
}

/// In-memory representation tags, exposed so the persistence
/// collaborator can serialise packed and table forms without
/// re-encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Plain byte string.
    Raw,
    /// Segmented chunked list.
    QuickList,
    /// Compact alternating field/value sequence.
    Packed,
    /// Incrementally-rehashed hash table.
    Table,
}

impl Value {
    /// Returns the type name, matching the classic TYPE command output.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Value::Str(_) => Encoding::Raw,
            Value::List(_) => Encoding::QuickList,
            Value::Hash(h) => h.encoding(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }
}
