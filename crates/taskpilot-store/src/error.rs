//! Store error types.

use thiserror::Error;

/// Errors raised by the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A tracked handle was used after its transaction ended (or before one
    /// started). This is a programming error in the caller, fatal to the
    /// call but not to the process.
    #[error("document accessed outside of an active transaction")]
    InactiveTransaction,
    /// Sequence index past the end.
    #[error("sequence index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    /// Failed to read or write a document file.
    #[error("document file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Document file is not valid JSON.
    #[error("document parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    /// Document JSON is well-formed but not decodable into the value model
    /// (bad timestamp encoding, unknown type tag, non-object root).
    #[error("document value not decodable: {0}")]
    Codec(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
