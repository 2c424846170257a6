//! Runtime error types for the interpreter.

use thiserror::Error;

/// A WebAssembly trap: the program itself did something the machine refuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Trap {
    /// `unreachable` was executed.
    #[error("unreachable executed")]
    Unreachable,

    /// Integer division or remainder by zero.
    #[error("integer divide by zero")]
    IntegerDivideByZero,

    /// Signed division of the minimum value by -1.
    #[error("integer overflow")]
    IntegerOverflow,

    /// A trapping float-to-int conversion got NaN or an out-of-range value.
    #[error("invalid conversion to integer")]
    InvalidConversion,

    /// A load, store or bulk operation touched bytes past the end of memory.
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,

    /// `call_indirect` used an index past the end of the table.
    #[error("out of bounds table access")]
    TableOutOfBounds,

    /// `call_indirect` hit a table slot no element segment filled.
    #[error("uninitialized table element")]
    UninitializedElement,

    /// `call_indirect` found a callee whose type differs from the expected one.
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,

    /// The frame stack grew past its limit.
    #[error("call stack exhausted")]
    CallStackExhausted,
}

/// Errors raised while instantiating or running a module.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The program trapped.
    #[error("trap: {0}")]
    Trap(#[from] Trap),

    /// The module is not valid (stack underflow, type mismatch, bad index).
    #[error("malformed module: {0}")]
    Malformed(String),

    /// No function export by this name.
    #[error("unknown export: {0}")]
    UnknownExport(String),

    /// A construct the interpreter does not run, such as a second table.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The import handler failed.
    #[error("host call {module}.{field} failed: {source}")]
    Host {
        /// Import module name.
        module: String,
        /// Import field name.
        field: String,
        /// The handler's own error, recoverable with `downcast_ref`.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result alias for interpreter operations.
pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traps_render_through_exec_error() {
        assert_eq!(Trap::MemoryOutOfBounds.to_string(), "out of bounds memory access");
        let err = ExecError::from(Trap::CallStackExhausted);
        assert_eq!(err.to_string(), "trap: call stack exhausted");
        assert!(std::error::Error::source(&err).is_some());
    }
}
