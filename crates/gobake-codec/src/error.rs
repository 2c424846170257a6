//! Codec error types.

use thiserror::Error;

/// Errors that can occur while decoding or encoding a module.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input bytes are not a well-formed module.
    #[error("malformed module: {0}")]
    Parse(#[from] wasmparser::BinaryReaderError),

    /// The module uses a feature outside the supported subset.
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// The encoded module failed validation.
    #[error("WASM validation failed: {0}")]
    ValidationFailed(String),
}

/// Codec result type alias.
pub type CodecResult<T> = Result<T, CodecError>;
