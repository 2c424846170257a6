//! gobake host emulation.
//!
//! Stands in for the JavaScript embedding a Go `js/wasm` program expects:
//!
//! - [`HostValue`] and [`ValueTable`]: the values the program can reference,
//!   addressed by small integer slots that are stored NaN-boxed in memory.
//! - [`GoRuntime`]: the `go` import namespace (runtime clock/exit/write/random
//!   and the `syscall/js` value bridge), recording every property read and
//!   construction as a [`HostCall`].

pub mod boxing;
pub mod error;
pub mod globals;
pub mod runtime;
pub mod value;

pub use error::{HostError, HostResult};
pub use runtime::{layout_args, ArgRef, GoRuntime, HostCall, ARGS_OFFSET, IMPORT_MODULE};
pub use value::{Callable, HostObject, HostValue, Identity, ValueTable};
