//! The seams through which a driver observes and steers execution.

use gobake_types::Instr;

use crate::error::ExecResult;
use crate::memory::Memory;
use crate::value::Value;

/// What the interpreter should do after a hook returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop before the instruction (or call) the hook was asked about. The
    /// call stack is left in place for inspection. When stopping at a call,
    /// the callee's operands have already been popped and the caller's pc
    /// still points at the call instruction.
    Break,
}

/// The interpreter state visible to [`ExecHooks::on_step`].
#[derive(Debug)]
pub struct StepView<'a> {
    /// Absolute index of the function being executed.
    pub func_index: u32,
    pub pc: usize,
    /// The instruction about to execute.
    pub instr: &'a Instr,
    /// The current frame's operand stack, top last.
    pub stack: &'a [Value],
}

impl StepView<'_> {
    /// Top of the operand stack.
    pub fn peek(&self) -> Option<&Value> {
        self.stack.last()
    }
}

/// Observer of a run.
pub trait ExecHooks {
    /// Called before every instruction.
    fn on_step(&mut self, view: &StepView<'_>) -> ExecResult<Flow> {
        let _ = view;
        Ok(Flow::Continue)
    }

    /// Called before a direct or indirect call, with the resolved callee,
    /// once the call's operands are off the caller's stack.
    fn on_call(&mut self, func_index: u32) -> ExecResult<Flow> {
        let _ = func_index;
        Ok(Flow::Continue)
    }
}

/// Hooks that never interfere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ExecHooks for NoHooks {}

/// Handler for imported functions.
pub trait Imports {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Service a call to the import `module.field`.
    fn call(
        &mut self,
        module: &str,
        field: &str,
        args: &[Value],
        memory: &mut Memory,
    ) -> Result<Vec<Value>, Self::Error>;
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The function returned with these results.
    Returned(Vec<Value>),
    /// A hook answered [`Flow::Break`]; the frames remain on the call stack.
    Halted,
}
