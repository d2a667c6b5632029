//! Error types for the core engine.

use thiserror::Error;

/// Error returned when a command is used against a key holding the wrong type.
/// For example, running a list command against a string key.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
pub struct WrongType;

/// Errors returned by dict structural operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    /// The key is already present in the table.
    #[error("key already exists")]
    KeyExists,

    /// The requested expand or resize is not applicable: a rehash is in
    /// progress, the target is smaller than the live entry count, or the
    /// target rounds to the current size.
    #[error("invalid expand or resize request")]
    Invalid,
}

/// Errors from integer field updates (HINCRBY).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IncrError {
    /// The stored value is not a valid signed 64-bit decimal.
    #[error("hash value is not an integer")]
    NotANumber,

    /// Increment or decrement would overflow i64. The field is not mutated.
    #[error("increment or decrement would overflow")]
    Overflow,
}

/// Errors from float field updates (HINCRBYFLOAT).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IncrFloatError {
    /// The stored value is not a valid float.
    #[error("hash value is not a float")]
    NotAFloat,

    /// The increment would produce NaN or Infinity. The field is not mutated.
    #[error("increment would produce NaN or Infinity")]
    NanOrInfinity,
}
