//! Buffer, layout and codec error types.

use serde_json::Value;
use thiserror::Error;

/// A composite schema that cannot be compiled into a struct layout.
///
/// Each variant carries the path of the offending node (`$.field[]`).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("{0}: not an object or fixed-size array")]
    NotComposite(String),

    #[error("{0}: array has no item schema")]
    MissingItems(String),

    #[error("{0}: array length must be fixed (minItems == maxItems)")]
    VariableLength(String),

    #[error("{0}: array must have at least one element")]
    ZeroLength(String),

    #[error("{0}: object has no properties")]
    EmptyObject(String),

    #[error("{0}: not a 32-bit primitive or composite")]
    UnsupportedField(String),

    /// Nesting exceeded the compiler's bound; the schema is malformed.
    #[error("schema nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// Buffer construction and access errors.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum BufferError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Only number and struct buffers expose a typed numeric view.
    #[error("{0} buffer has no typed numeric view")]
    NoTypedView(&'static str),

    #[error("expected a numeric value, found {0}")]
    NotNumeric(Value),

    #[error("schema does not describe a number")]
    NonNumericSchema,

    #[error("byte payload has length {actual}, expected {expected}")]
    ByteLength { expected: usize, actual: usize },
}

/// Codec registry errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec `{0}` is already registered")]
    Duplicate(String),

    #[error("unknown codec `{0}`")]
    Unknown(String),

    #[error("no registered codec accepts this {0} payload")]
    Unsupported(&'static str),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for buffer operations.
pub type BufferResult<T> = Result<T, BufferError>;
