//! Error types for host emulation.

use gobake_interp::ExecError;
use thiserror::Error;

/// Errors raised while servicing a host call.
#[derive(Debug, Error)]
pub enum HostError {
    /// The module imports something outside the `go` namespace's known set.
    #[error("unknown import {module}.{field}")]
    UnknownImport { module: String, field: String },

    /// A host operation this emulator does not provide.
    #[error("unimplemented host operation: {0}")]
    Unimplemented(&'static str),

    /// `runtime.wasmWrite` to a stream other than stderr.
    #[error("only fd 2 supported on write, got {0}")]
    UnsupportedStream(i64),

    /// A property lookup on a value that is not an object.
    #[error("value #{0} is not an object")]
    NotAnObject(u32),

    /// `valueNew` on a value that cannot be constructed.
    #[error("value is not callable: {0}")]
    NotCallable(String),

    /// `valueGet` of a property the object does not have.
    #[error("no value for property {0:?}")]
    MissingProperty(String),

    /// A boxed reference to a value-table slot that does not exist.
    #[error("no value #{0} in the value table")]
    BadValueIndex(u32),

    /// An operand read from the Go stack is out of range or ill-formed.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// An operand or result address fell outside linear memory.
    #[error("memory access failed: {0}")]
    Memory(#[from] ExecError),

    /// A Go string operand was not UTF-8.
    #[error("invalid UTF-8 in string argument")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Writing program output to the configured sink failed.
    #[error("write to stream failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for host operations.
pub type HostResult<T> = Result<T, HostError>;
