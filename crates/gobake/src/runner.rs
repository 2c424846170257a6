//! Interpret a module until the runtime is about to call `main.main`.

use std::collections::BTreeSet;

use gobake_host::{layout_args, GoRuntime, HostCall};
use gobake_interp::{
    ExecError, ExecHooks, ExecResult, Flow, Instance, NoHooks, Outcome, StepView, Value,
};
use gobake_types::{Instr, Module};

use crate::error::{BakeError, BakeResult};
use crate::options::BakeOptions;

/// Name of the startup trampoline the `run` export calls.
pub const START_FUNC: &str = "_rt0_wasm_js";
/// Name of the scheduler's dispatch loop.
pub const MAIN_LOOP_FUNC: &str = "runtime.main";
pub const PAUSE_FUNC: &str = "runtime.pause";
/// Name of the user entry point; reaching a call to it ends the run.
pub const ENTRY_FUNC: &str = "main.main";
/// Suffix of package initializer names.
pub const INIT_SUFFIX: &str = ".init";

/// Global holding the scheduler's resume point (`PC_B`).
pub const RESUME_GLOBAL: u32 = 1;

/// The four functions a bake depends on, by absolute index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellKnown {
    pub start: u32,
    pub main_loop: u32,
    pub pause: u32,
    pub entry: u32,
}

impl WellKnown {
    /// Find the well-known functions and the initializer candidates in the
    /// name section.
    pub fn discover(module: &Module) -> BakeResult<(Self, BTreeSet<u32>)> {
        let (mut start, mut main_loop, mut pause, mut entry) = (None, None, None, None);
        let mut inits = BTreeSet::new();
        for (index, name) in module.func_names.iter().flatten() {
            match name.as_str() {
                START_FUNC => start = Some(*index),
                MAIN_LOOP_FUNC => main_loop = Some(*index),
                PAUSE_FUNC => pause = Some(*index),
                ENTRY_FUNC => entry = Some(*index),
                other if other.ends_with(INIT_SUFFIX) => {
                    inits.insert(*index);
                }
                _ => {}
            }
        }
        let functions = WellKnown {
            start: start.ok_or(BakeError::MissingFunction(START_FUNC))?,
            main_loop: main_loop.ok_or(BakeError::MissingFunction(MAIN_LOOP_FUNC))?,
            pause: pause.ok_or(BakeError::MissingFunction(PAUSE_FUNC))?,
            entry: entry.ok_or(BakeError::MissingFunction(ENTRY_FUNC))?,
        };
        Ok((functions, inits))
    }
}

/// Counters and records accumulated by the hooks during a run.
#[derive(Debug)]
struct TraceContext {
    functions: WellKnown,
    init_candidates: BTreeSet<u32>,
    inits_invoked: BTreeSet<u32>,
    resume_marker: Option<i32>,
    instruction_count: u64,
}

impl ExecHooks for TraceContext {
    fn on_step(&mut self, view: &StepView<'_>) -> ExecResult<Flow> {
        self.instruction_count += 1;
        if view.func_index == self.functions.main_loop && *view.instr == Instr::GlobalSet(RESUME_GLOBAL) {
            if let Some(Value::I32(marker)) = view.peek() {
                if *marker > 0 {
                    self.resume_marker = Some(*marker);
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn on_call(&mut self, func_index: u32) -> ExecResult<Flow> {
        if func_index == self.functions.entry {
            return Ok(Flow::Break);
        }
        if self.init_candidates.contains(&func_index) {
            self.inits_invoked.insert(func_index);
        }
        Ok(Flow::Continue)
    }
}

/// The frozen state at the break point.
pub struct BreakInfo {
    /// The paused instance: live globals, memory and value table.
    pub instance: Instance<GoRuntime>,
    /// Value-bridge calls in the order they were made.
    pub calls: Vec<HostCall>,
    /// Absolute indices of the initializers that were called.
    pub inits_invoked: BTreeSet<u32>,
    pub functions: WellKnown,
    /// Table slot holding `runtime.main`, when it is in an element segment.
    pub main_loop_elem_slot: Option<u32>,
    /// Last positive value written to the resume global in `runtime.main`.
    pub resume_marker: Option<i32>,
    /// Instructions executed up to the break.
    pub instruction_count: u64,
}

/// Run `module` from its `run` export until `main.main` is about to be
/// called, then run `runtime.pause`.
pub fn run_until_break(module: Module, options: &BakeOptions, runtime: GoRuntime) -> BakeResult<BreakInfo> {
    let (functions, init_candidates) = WellKnown::discover(&module)?;
    if module.memories.is_empty() {
        return Err(BakeError::MissingMemory);
    }
    let mut instance = Instance::new(module, runtime, options.max_memory_pages)?;
    let run = instance.export_func("run").map_err(|err| match err {
        ExecError::UnknownExport(_) => BakeError::MissingRunExport,
        other => other.into(),
    })?;
    let main_loop_elem_slot = find_elem_slot(&instance, functions.main_loop)?;
    if main_loop_elem_slot.is_none() {
        tracing::warn!(target: "gobake::runner", "runtime.main is not in any element segment");
    }

    let (argc, argv) = layout_args(instance.memory_mut(), &options.args, &options.env)?;
    let mut trace = TraceContext {
        functions,
        init_candidates,
        inits_invoked: BTreeSet::new(),
        resume_marker: None,
        instruction_count: 0,
    };
    tracing::debug!(target: "gobake::runner", ?functions, argc, argv, "running until main.main");
    match instance.invoke(run, &[Value::I32(argc), Value::I32(argv)], &mut trace)? {
        Outcome::Halted => {}
        Outcome::Returned(_) => return Err(BakeError::NeverReachedEntry),
    }
    log_break_state(&instance);

    let found = instance.call_stack();
    if found != [functions.start, functions.main_loop] {
        return Err(BakeError::UnexpectedCallStack { found });
    }
    let depth = instance.frames().last().map_or(0, |frame| frame.stack().len());
    if depth != 0 {
        return Err(BakeError::NonEmptyOperandStack(depth));
    }

    let pause_args: Vec<Value> = instance
        .module()
        .func_type(functions.pause)
        .map(|ty| ty.params.iter().map(|ty| Value::default_for(*ty)).collect())
        .unwrap_or_default();
    instance.invoke(functions.pause, &pause_args, &mut NoHooks)?;

    let calls = instance.imports_mut().take_calls();
    tracing::info!(
        target: "gobake::runner",
        instructions = trace.instruction_count,
        host_calls = calls.len(),
        inits = trace.inits_invoked.len(),
        resume_marker = ?trace.resume_marker,
        "reached main.main"
    );
    Ok(BreakInfo {
        instance,
        calls,
        inits_invoked: trace.inits_invoked,
        functions,
        main_loop_elem_slot,
        resume_marker: trace.resume_marker,
        instruction_count: trace.instruction_count,
    })
}

/// Table slot of `func_index`: the first element segment listing it, at the
/// segment's base offset plus its position.
fn find_elem_slot(instance: &Instance<GoRuntime>, func_index: u32) -> BakeResult<Option<u32>> {
    for elem in &instance.module().elems {
        if let Some(position) = elem.funcs.iter().position(|f| *f == func_index) {
            let base = instance.eval_const(&elem.offset)?.as_i32()? as u32;
            return Ok(Some(base + position as u32));
        }
    }
    Ok(None)
}

fn log_break_state(instance: &Instance<GoRuntime>) {
    if !tracing::enabled!(target: "gobake::runner", tracing::Level::DEBUG) {
        return;
    }
    let module = instance.module();
    for frame in instance.frames() {
        tracing::debug!(
            target: "gobake::runner",
            func = frame.func_index(),
            name = module.func_name(frame.func_index()).unwrap_or("?"),
            pc = frame.pc(),
            "break call stack"
        );
    }
    if let Some(frame) = instance.frames().last() {
        tracing::debug!(target: "gobake::runner", stack = ?frame.stack(), "break operand stack");
    }
    let values = instance.imports().values();
    for (slot, value) in values.values().iter().enumerate() {
        tracing::debug!(target: "gobake::runner", slot, ?value, "break value table");
    }
    tracing::debug!(target: "gobake::runner", refs = ?values.identity_slots(), "break identity index");
}
