//! gobake interpreter.
//!
//! Executes a [`gobake_types::Module`] one instruction at a time on an
//! explicit call stack, so a driver can stop at any instruction boundary and
//! inspect frames, globals and memory afterwards.
//!
//! Two seams let callers steer a run:
//! - [`ExecHooks`] fires before every instruction and before every call and
//!   answers [`Flow::Continue`] or [`Flow::Break`] (or an error).
//! - [`Imports`] services calls to imported functions with access to linear
//!   memory.

pub mod control;
pub mod error;
pub mod hooks;
pub mod instance;
pub mod memory;
pub mod numeric;
pub mod value;

pub use error::{ExecError, ExecResult, Trap};
pub use hooks::{ExecHooks, Flow, Imports, NoHooks, Outcome, StepView};
pub use instance::{Frame, Instance, DEFAULT_MAX_MEMORY_PAGES};
pub use memory::Memory;
pub use value::Value;
