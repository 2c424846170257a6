//! An instantiated module and its execution loop.
//!
//! Calls never recurse on the native stack: each call pushes a [`Frame`] and
//! the loop in [`Instance::invoke`] steps the topmost frame until the
//! invocation's own frame returns. A hook answering [`Flow::Break`] leaves
//! every frame where it is. A break on a call happens after the call's
//! operands (arguments and table index) are popped.

use std::rc::Rc;

use gobake_types::{BlockType, ExportKind, ImportKind, Instr, Module, ValType};

use crate::control::ControlMap;
use crate::error::{ExecError, ExecResult, Trap};
use crate::hooks::{ExecHooks, Flow, Imports, NoHooks, Outcome, StepView};
use crate::memory::Memory;
use crate::numeric::{self, pop, pop_i32};
use crate::value::Value;

/// Memory cap used when a module declares no maximum: 16384 pages (1 GiB).
pub const DEFAULT_MAX_MEMORY_PAGES: u32 = 16_384;

/// Deepest call stack before [`Trap::CallStackExhausted`].
const MAX_CALL_DEPTH: usize = 16_384;

/// A defined function prepared for execution.
#[derive(Debug)]
struct Code {
    result_count: usize,
    locals: Vec<ValType>,
    body: Vec<Instr>,
    control: ControlMap,
}

#[derive(Debug, Clone, Copy)]
struct Label {
    /// Operand stack height below the block's parameters.
    height: usize,
    /// Values carried by a branch to this label.
    arity: usize,
    /// Where a branch continues.
    target: usize,
    is_loop: bool,
}

/// One activation on the call stack.
#[derive(Debug, Clone)]
pub struct Frame {
    func_index: u32,
    pc: usize,
    locals: Vec<Value>,
    stack: Vec<Value>,
    labels: Vec<Label>,
    result_count: usize,
}

impl Frame {
    /// Absolute index of the function this frame runs.
    pub fn func_index(&self) -> u32 {
        self.func_index
    }

    /// Position of the next instruction in the body.
    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn locals(&self) -> &[Value] {
        &self.locals
    }

    /// Operand stack, top last.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }
}

/// A module with its runtime state.
pub struct Instance<I> {
    module: Module,
    import_count: u32,
    code: Vec<Rc<Code>>,
    globals: Vec<Value>,
    memory: Memory,
    table: Vec<Option<u32>>,
    frames: Vec<Frame>,
    /// Frame depth at which the current invocation started.
    base: usize,
    returned: Vec<Value>,
    imports: I,
}

impl<I: Imports> Instance<I> {
    /// Instantiate `module`: evaluate globals, lay out memory and table from
    /// the active segments, then run the start function if there is one.
    ///
    /// `max_memory_pages` caps memory when the module declares no maximum.
    pub fn new(module: Module, imports: I, max_memory_pages: u32) -> ExecResult<Self> {
        for import in &module.imports {
            if !matches!(import.kind, ImportKind::Func(_)) {
                return Err(ExecError::Unsupported(format!(
                    "non-function import {}.{}",
                    import.module, import.name
                )));
            }
        }
        let import_count = module.import_func_count();

        let mut globals = Vec::with_capacity(module.globals.len());
        for global in &module.globals {
            let value = eval_const(&global.init, &globals)?;
            globals.push(value);
        }

        let memory = match module.memories.first() {
            Some(ty) => Memory::new(ty.minimum, ty.maximum.unwrap_or(max_memory_pages)),
            None => Memory::new(0, 0),
        };
        let table = match module.tables.first() {
            Some(ty) => vec![None; ty.minimum as usize],
            None => Vec::new(),
        };

        let mut code = Vec::with_capacity(module.funcs.len());
        for func in &module.funcs {
            let ty = module
                .types
                .get(func.type_index as usize)
                .ok_or_else(|| ExecError::Malformed(format!("unknown type {}", func.type_index)))?;
            code.push(Rc::new(Code {
                result_count: ty.results.len(),
                locals: func.locals.clone(),
                body: func.body.clone(),
                control: ControlMap::build(&func.body)?,
            }));
        }

        let mut instance = Self {
            module,
            import_count,
            code,
            globals,
            memory,
            table,
            frames: Vec::new(),
            base: 0,
            returned: Vec::new(),
            imports,
        };
        instance.init_segments()?;
        if let Some(start) = instance.module.start {
            instance.invoke(start, &[], &mut NoHooks)?;
        }
        tracing::debug!(
            target: "gobake::interp",
            funcs = instance.module.func_count(),
            memory_pages = instance.memory.size_pages(),
            table = instance.table.len(),
            "instantiated module"
        );
        Ok(instance)
    }

    fn init_segments(&mut self) -> ExecResult<()> {
        for elem in &self.module.elems {
            let offset = eval_const(&elem.offset, &self.globals)?.as_i32()? as u32 as usize;
            let end = offset
                .checked_add(elem.funcs.len())
                .filter(|end| *end <= self.table.len())
                .ok_or(Trap::TableOutOfBounds)?;
            for (slot, func) in self.table[offset..end].iter_mut().zip(&elem.funcs) {
                *slot = Some(*func);
            }
        }
        for data in &self.module.data {
            let offset = eval_const(&data.offset, &self.globals)?.as_i32()? as u32;
            self.memory.write(u64::from(offset), &data.bytes)?;
        }
        Ok(())
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Function indices stored in table 0.
    pub fn table(&self) -> &[Option<u32>] {
        &self.table
    }

    pub fn imports(&self) -> &I {
        &self.imports
    }

    pub fn imports_mut(&mut self) -> &mut I {
        &mut self.imports
    }

    /// Live frames, outermost first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Function indices of the live frames, outermost first.
    pub fn call_stack(&self) -> Vec<u32> {
        self.frames.iter().map(Frame::func_index).collect()
    }

    /// Index of the exported function `name`.
    pub fn export_func(&self, name: &str) -> ExecResult<u32> {
        self.module
            .export(name, ExportKind::Func)
            .ok_or_else(|| ExecError::UnknownExport(name.to_string()))
    }

    /// Evaluate a constant expression against the current globals.
    pub fn eval_const(&self, instr: &Instr) -> ExecResult<Value> {
        eval_const(instr, &self.globals)
    }

    // ── Invocation ──────────────────────────────────────────────────────────

    /// Call the export `name` with `args`.
    pub fn invoke_export<H: ExecHooks + ?Sized>(
        &mut self,
        name: &str,
        args: &[Value],
        hooks: &mut H,
    ) -> ExecResult<Outcome> {
        let func_index = self.export_func(name)?;
        self.invoke(func_index, args, hooks)
    }

    /// Call the function at absolute index `func_index` on top of whatever
    /// frames are already live, and run until it returns or a hook breaks.
    pub fn invoke<H: ExecHooks + ?Sized>(
        &mut self,
        func_index: u32,
        args: &[Value],
        hooks: &mut H,
    ) -> ExecResult<Outcome> {
        let ty = self
            .module
            .func_type(func_index)
            .ok_or_else(|| ExecError::Malformed(format!("unknown function {func_index}")))?;
        let arg_types: Vec<ValType> = args.iter().map(Value::ty).collect();
        if arg_types != ty.params {
            return Err(ExecError::Malformed(format!(
                "function {func_index} expects {:?}, got {arg_types:?}",
                ty.params
            )));
        }
        let saved = std::mem::replace(&mut self.base, self.frames.len());
        let outcome = self.run(func_index, args.to_vec(), hooks);
        self.base = saved;
        outcome
    }

    fn run<H: ExecHooks + ?Sized>(
        &mut self,
        func_index: u32,
        args: Vec<Value>,
        hooks: &mut H,
    ) -> ExecResult<Outcome> {
        self.enter(func_index, args)?;
        while self.frames.len() > self.base {
            if self.step(hooks)? == Flow::Break {
                return Ok(Outcome::Halted);
            }
        }
        Ok(Outcome::Returned(std::mem::take(&mut self.returned)))
    }

    fn top(&self) -> ExecResult<&Frame> {
        self.frames.last().ok_or_else(no_frame)
    }

    fn top_mut(&mut self) -> ExecResult<&mut Frame> {
        self.frames.last_mut().ok_or_else(no_frame)
    }

    fn code_for(&self, func_index: u32) -> ExecResult<Rc<Code>> {
        func_index
            .checked_sub(self.import_count)
            .and_then(|local| self.code.get(local as usize))
            .cloned()
            .ok_or_else(|| ExecError::Malformed(format!("no body for function {func_index}")))
    }

    /// Start executing `func_index`: push a frame for a defined function, or
    /// service an import immediately.
    fn enter(&mut self, func_index: u32, args: Vec<Value>) -> ExecResult<()> {
        if func_index < self.import_count {
            let results = self.call_import(func_index, &args)?;
            return self.deliver(results);
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(Trap::CallStackExhausted.into());
        }
        let code = self.code_for(func_index)?;
        let mut locals = args;
        locals.extend(code.locals.iter().map(|ty| Value::default_for(*ty)));
        self.frames.push(Frame {
            func_index,
            pc: 0,
            locals,
            stack: Vec::new(),
            labels: Vec::new(),
            result_count: code.result_count,
        });
        Ok(())
    }

    fn call_import(&mut self, func_index: u32, args: &[Value]) -> ExecResult<Vec<Value>> {
        let import = self
            .module
            .func_import(func_index)
            .ok_or_else(|| ExecError::Malformed(format!("no import {func_index}")))?;
        tracing::trace!(target: "gobake::interp", module = %import.module, field = %import.name, "host call");
        self.imports
            .call(&import.module, &import.name, args, &mut self.memory)
            .map_err(|source| ExecError::Host {
                module: import.module.clone(),
                field: import.name.clone(),
                source: Box::new(source),
            })
    }

    /// Hand results to the caller's frame, or to the invocation when its
    /// outermost frame is the one returning.
    fn deliver(&mut self, results: Vec<Value>) -> ExecResult<()> {
        if self.frames.len() > self.base {
            self.top_mut()?.stack.extend(results);
        } else {
            self.returned = results;
        }
        Ok(())
    }

    fn do_return(&mut self) -> ExecResult<()> {
        let mut frame = self.frames.pop().ok_or_else(no_frame)?;
        let results = split_top(&mut frame.stack, frame.result_count)?;
        self.deliver(results)
    }

    fn step<H: ExecHooks + ?Sized>(&mut self, hooks: &mut H) -> ExecResult<Flow> {
        let (func_index, pc) = {
            let frame = self.top()?;
            (frame.func_index, frame.pc)
        };
        let code = self.code_for(func_index)?;
        let Some(instr) = code.body.get(pc) else {
            // Fell off the end of the body.
            self.do_return()?;
            return Ok(Flow::Continue);
        };
        let view = StepView {
            func_index,
            pc,
            instr,
            stack: &self.top()?.stack,
        };
        if hooks.on_step(&view)? == Flow::Break {
            return Ok(Flow::Break);
        }
        self.execute(&code, pc, instr, hooks)
    }

    /// Pops the callee's arguments, then consults the hook. On a break the
    /// arguments stay consumed and the pc stays on the call instruction.
    fn call<H: ExecHooks + ?Sized>(&mut self, target: u32, hooks: &mut H) -> ExecResult<Flow> {
        let params = self
            .module
            .func_type(target)
            .ok_or_else(|| ExecError::Malformed(format!("unknown function {target}")))?
            .params
            .len();
        let args = split_top(&mut self.top_mut()?.stack, params)?;
        if hooks.on_call(target)? == Flow::Break {
            return Ok(Flow::Break);
        }
        self.top_mut()?.pc += 1;
        self.enter(target, args)?;
        Ok(Flow::Continue)
    }

    fn branch(&mut self, depth: u32) -> ExecResult<()> {
        let depth = depth as usize;
        if depth == self.top()?.labels.len() {
            return self.do_return();
        }
        let frame = self.top_mut()?;
        let index = frame
            .labels
            .len()
            .checked_sub(depth + 1)
            .ok_or_else(|| ExecError::Malformed(format!("branch depth {depth} out of range")))?;
        let label = frame.labels[index];
        let carried = split_top(&mut frame.stack, label.arity)?;
        frame.stack.truncate(label.height);
        frame.stack.extend(carried);
        frame.labels.truncate(if label.is_loop { index + 1 } else { index });
        frame.pc = label.target;
        Ok(())
    }

    fn block_arity(&self, ty: BlockType) -> ExecResult<(usize, usize)> {
        Ok(match ty {
            BlockType::Empty => (0, 0),
            BlockType::Value(_) => (0, 1),
            BlockType::Func(index) => {
                let ty = self
                    .module
                    .types
                    .get(index as usize)
                    .ok_or_else(|| ExecError::Malformed(format!("unknown block type {index}")))?;
                (ty.params.len(), ty.results.len())
            }
        })
    }

    fn execute<H: ExecHooks + ?Sized>(
        &mut self,
        code: &Code,
        pc: usize,
        instr: &Instr,
        hooks: &mut H,
    ) -> ExecResult<Flow> {
        // Control flow first: these move the pc themselves.
        match instr {
            Instr::Call(target) => return self.call(*target, hooks),
            Instr::CallIndirect {
                type_index,
                table_index,
            } => {
                if *table_index != 0 {
                    return Err(ExecError::Unsupported(format!("table {table_index}")));
                }
                let slot = pop_i32(&mut self.top_mut()?.stack)? as u32 as usize;
                let target = self
                    .table
                    .get(slot)
                    .ok_or(Trap::TableOutOfBounds)?
                    .ok_or(Trap::UninitializedElement)?;
                let expected = self.module.types.get(*type_index as usize);
                if expected.is_none() || self.module.func_type(target) != expected {
                    return Err(Trap::IndirectCallTypeMismatch.into());
                }
                return self.call(target, hooks);
            }
            Instr::Return => {
                self.do_return()?;
                return Ok(Flow::Continue);
            }
            Instr::Br(depth) => {
                self.branch(*depth)?;
                return Ok(Flow::Continue);
            }
            Instr::BrIf(depth) => {
                if pop_i32(&mut self.top_mut()?.stack)? != 0 {
                    self.branch(*depth)?;
                } else {
                    self.top_mut()?.pc += 1;
                }
                return Ok(Flow::Continue);
            }
            Instr::BrTable { targets, default } => {
                let index = pop_i32(&mut self.top_mut()?.stack)? as u32 as usize;
                let depth = targets.get(index).copied().unwrap_or(*default);
                self.branch(depth)?;
                return Ok(Flow::Continue);
            }
            Instr::Block(ty) | Instr::Loop(ty) | Instr::If(ty) => {
                let (params, results) = self.block_arity(*ty)?;
                let end = code.control.end_of(pc)?;
                let is_loop = matches!(instr, Instr::Loop(_));
                let frame = self.top_mut()?;
                if let Instr::If(_) = instr {
                    if pop_i32(&mut frame.stack)? == 0 {
                        match code.control.else_of(pc) {
                            Some(else_pc) => frame.pc = else_pc + 1,
                            None => {
                                frame.pc = end + 1;
                                return Ok(Flow::Continue);
                            }
                        }
                    } else {
                        frame.pc = pc + 1;
                    }
                } else {
                    frame.pc = pc + 1;
                }
                let height = frame.stack.len().checked_sub(params).ok_or_else(|| {
                    ExecError::Malformed("block parameters missing from the stack".into())
                })?;
                frame.labels.push(Label {
                    height,
                    arity: if is_loop { params } else { results },
                    target: if is_loop { pc + 1 } else { end + 1 },
                    is_loop,
                });
                return Ok(Flow::Continue);
            }
            Instr::Else => {
                // The then-arm finished: leave the `if`.
                let end = code.control.end_of(pc)?;
                let frame = self.top_mut()?;
                frame.labels.pop();
                frame.pc = end + 1;
                return Ok(Flow::Continue);
            }
            Instr::End => {
                let frame = self.top_mut()?;
                frame.labels.pop();
                frame.pc += 1;
                return Ok(Flow::Continue);
            }
            _ => {}
        }

        let Self {
            frames,
            globals,
            memory,
            ..
        } = self;
        let frame = frames.last_mut().ok_or_else(no_frame)?;
        frame.pc += 1;
        let stack = &mut frame.stack;
        match instr {
            Instr::Unreachable => return Err(Trap::Unreachable.into()),
            Instr::Nop => {}
            Instr::Drop => {
                pop(stack)?;
            }
            Instr::Select => {
                let cond = pop_i32(stack)?;
                let b = pop(stack)?;
                let a = pop(stack)?;
                stack.push(if cond != 0 { a } else { b });
            }
            Instr::LocalGet(index) => {
                let value = *frame
                    .locals
                    .get(*index as usize)
                    .ok_or_else(|| bad_index("local", *index))?;
                stack.push(value);
            }
            Instr::LocalSet(index) => {
                let value = pop(stack)?;
                *frame
                    .locals
                    .get_mut(*index as usize)
                    .ok_or_else(|| bad_index("local", *index))? = value;
            }
            Instr::LocalTee(index) => {
                let value = *stack
                    .last()
                    .ok_or_else(|| ExecError::Malformed("operand stack underflow".into()))?;
                *frame
                    .locals
                    .get_mut(*index as usize)
                    .ok_or_else(|| bad_index("local", *index))? = value;
            }
            Instr::GlobalGet(index) => {
                let value = *globals
                    .get(*index as usize)
                    .ok_or_else(|| bad_index("global", *index))?;
                stack.push(value);
            }
            Instr::GlobalSet(index) => {
                let value = pop(stack)?;
                *globals
                    .get_mut(*index as usize)
                    .ok_or_else(|| bad_index("global", *index))? = value;
            }
            Instr::MemorySize => stack.push(Value::I32(memory.size_pages() as i32)),
            Instr::MemoryGrow => {
                let delta = pop_i32(stack)? as u32;
                let old = memory.grow(delta).map_or(-1, |old| old as i32);
                stack.push(Value::I32(old));
            }
            Instr::MemoryCopy => {
                let len = pop_i32(stack)? as u32;
                let src = pop_i32(stack)? as u32;
                let dst = pop_i32(stack)? as u32;
                memory.copy_within(u64::from(dst), u64::from(src), len as usize)?;
            }
            Instr::MemoryFill => {
                let len = pop_i32(stack)? as u32;
                let byte = pop_i32(stack)? as u8;
                let dst = pop_i32(stack)? as u32;
                memory.fill(u64::from(dst), byte, len as usize)?;
            }
            other => {
                if !load_store(other, stack, memory)? && !numeric::apply(other, stack)? {
                    return Err(ExecError::Unsupported(format!("instruction {other:?}")));
                }
            }
        }
        Ok(Flow::Continue)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn no_frame() -> ExecError {
    ExecError::Malformed("no active frame".into())
}

fn bad_index(what: &str, index: u32) -> ExecError {
    ExecError::Malformed(format!("{what} index {index} out of range"))
}

/// Remove and return the top `n` values, preserving their order.
fn split_top(stack: &mut Vec<Value>, n: usize) -> ExecResult<Vec<Value>> {
    let at = stack
        .len()
        .checked_sub(n)
        .ok_or_else(|| ExecError::Malformed("operand stack underflow".into()))?;
    Ok(stack.split_off(at))
}

fn eval_const(instr: &Instr, globals: &[Value]) -> ExecResult<Value> {
    match instr {
        Instr::GlobalGet(index) => globals
            .get(*index as usize)
            .copied()
            .ok_or_else(|| bad_index("global", *index)),
        Instr::I32Const(v) => Ok(Value::I32(*v)),
        Instr::I64Const(v) => Ok(Value::I64(*v)),
        Instr::F32Const(bits) => Ok(Value::F32(f32::from_bits(*bits))),
        Instr::F64Const(bits) => Ok(Value::F64(f64::from_bits(*bits))),
        other => Err(ExecError::Unsupported(format!("constant expression {other:?}"))),
    }
}

/// Execute `instr` if it is a load or store.
fn load_store(instr: &Instr, stack: &mut Vec<Value>, memory: &mut Memory) -> ExecResult<bool> {
    fn address(stack: &mut Vec<Value>, offset: u64) -> ExecResult<u64> {
        Ok(u64::from(pop_i32(stack)? as u32) + offset)
    }

    macro_rules! load {
        ($arg:expr, $n:literal, |$b:ident| $conv:expr) => {{
            let addr = address(stack, $arg.offset)?;
            let $b = memory.load::<$n>(addr)?;
            stack.push($conv);
        }};
    }
    macro_rules! store {
        ($arg:expr, $pop:expr, |$v:ident| $bytes:expr) => {{
            let $v = $pop;
            let addr = address(stack, $arg.offset)?;
            memory.write(addr, &$bytes)?;
        }};
    }

    match instr {
        Instr::I32Load(arg) => load!(arg, 4, |b| Value::I32(i32::from_le_bytes(b))),
        Instr::I64Load(arg) => load!(arg, 8, |b| Value::I64(i64::from_le_bytes(b))),
        Instr::F32Load(arg) => load!(arg, 4, |b| Value::F32(f32::from_le_bytes(b))),
        Instr::F64Load(arg) => load!(arg, 8, |b| Value::F64(f64::from_le_bytes(b))),
        Instr::I32Load8S(arg) => load!(arg, 1, |b| Value::I32(b[0] as i8 as i32)),
        Instr::I32Load8U(arg) => load!(arg, 1, |b| Value::I32(b[0] as i32)),
        Instr::I32Load16S(arg) => load!(arg, 2, |b| Value::I32(i16::from_le_bytes(b) as i32)),
        Instr::I32Load16U(arg) => load!(arg, 2, |b| Value::I32(u16::from_le_bytes(b) as i32)),
        Instr::I64Load8S(arg) => load!(arg, 1, |b| Value::I64(b[0] as i8 as i64)),
        Instr::I64Load8U(arg) => load!(arg, 1, |b| Value::I64(b[0] as i64)),
        Instr::I64Load16S(arg) => load!(arg, 2, |b| Value::I64(i16::from_le_bytes(b) as i64)),
        Instr::I64Load16U(arg) => load!(arg, 2, |b| Value::I64(u16::from_le_bytes(b) as i64)),
        Instr::I64Load32S(arg) => load!(arg, 4, |b| Value::I64(i32::from_le_bytes(b) as i64)),
        Instr::I64Load32U(arg) => load!(arg, 4, |b| Value::I64(u32::from_le_bytes(b) as i64)),
        Instr::I32Store(arg) => store!(arg, pop_i32(stack)?, |v| v.to_le_bytes()),
        Instr::I64Store(arg) => store!(arg, pop(stack)?.as_i64()?, |v| v.to_le_bytes()),
        Instr::F32Store(arg) => store!(arg, pop(stack)?.as_f32()?, |v| v.to_le_bytes()),
        Instr::F64Store(arg) => store!(arg, pop(stack)?.as_f64()?, |v| v.to_le_bytes()),
        Instr::I32Store8(arg) => store!(arg, pop_i32(stack)?, |v| [v as u8]),
        Instr::I32Store16(arg) => store!(arg, pop_i32(stack)?, |v| (v as u16).to_le_bytes()),
        Instr::I64Store8(arg) => store!(arg, pop(stack)?.as_i64()?, |v| [v as u8]),
        Instr::I64Store16(arg) => store!(arg, pop(stack)?.as_i64()?, |v| (v as u16).to_le_bytes()),
        Instr::I64Store32(arg) => store!(arg, pop(stack)?.as_i64()?, |v| (v as u32).to_le_bytes()),
        _ => return Ok(false),
    }
    Ok(true)
}
