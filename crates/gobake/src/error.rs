//! Error types for baking.

use gobake_codec::CodecError;
use gobake_host::HostError;
use gobake_interp::ExecError;
use thiserror::Error;

/// Errors that abort a bake. No output is produced for any of them.
#[derive(Debug, Error)]
pub enum BakeError {
    /// A well-known function is missing from the name section.
    #[error("required function {0} not found in the name section")]
    MissingFunction(&'static str),

    /// There is no `run` function export to start from.
    #[error("module does not export a `run` function")]
    MissingRunExport,

    /// The module declares no memory to snapshot.
    #[error("module has no linear memory")]
    MissingMemory,

    /// The program finished without ever calling `main.main`.
    #[error("program returned before reaching main.main")]
    NeverReachedEntry,

    /// The break happened somewhere other than `_rt0_wasm_js` -> `runtime.main`.
    #[error("invalid call stack at break, not inside runtime.main: {found:?}")]
    UnexpectedCallStack { found: Vec<u32> },

    /// `runtime.main` still had operands on its stack at the break.
    #[error("operand stack expected to be empty at break, found {0} values")]
    NonEmptyOperandStack(usize),

    /// Interpreting the module failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Setting up the host failed before the run.
    #[error(transparent)]
    Host(#[from] HostError),

    /// The rewritten module could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Result alias for baking.
pub type BakeResult<T> = Result<T, BakeError>;
