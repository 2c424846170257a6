//! Integration tests for the gobake interpreter.
//!
//! Tests validate:
//! - Structured control flow, calls and memory behave like a reference engine
//!   (`wasmi`) on the same encoded module
//! - Hooks see every instruction and can halt before a call, leaving frames
//! - Imports receive arguments and linear memory
//! - Traps surface as errors

use std::convert::Infallible;

use gobake_interp::{
    ExecError, ExecHooks, ExecResult, Flow, Imports, Instance, Memory, NoHooks, Outcome, StepView,
    Trap, Value, DEFAULT_MAX_MEMORY_PAGES,
};
use gobake_types::{
    BlockType, Elem, Export, ExportKind, Func, FuncType, Import, ImportKind, Instr, MemArg,
    MemoryType, Module, TableType, ValType,
};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

/// Imports that reject every call.
struct NoImports;

impl Imports for NoImports {
    type Error = Infallible;

    fn call(&mut self, module: &str, field: &str, _: &[Value], _: &mut Memory) -> Result<Vec<Value>, Infallible> {
        panic!("unexpected import {module}.{field}");
    }
}

/// Module with one memory page and the given exported functions.
fn module_with(funcs: Vec<(&str, FuncType, Vec<ValType>, Vec<Instr>)>) -> Module {
    let mut module = Module {
        memories: vec![MemoryType {
            minimum: 1,
            maximum: Some(4),
        }],
        ..Module::default()
    };
    for (index, (name, ty, locals, body)) in funcs.into_iter().enumerate() {
        let type_index = module.intern_type(ty);
        module.funcs.push(Func {
            type_index,
            locals,
            body,
        });
        if !name.is_empty() {
            module.exports.push(Export {
                name: name.to_string(),
                kind: ExportKind::Func,
                index: index as u32,
            });
        }
    }
    module
}

fn instantiate(module: Module) -> Instance<NoImports> {
    Instance::new(module, NoImports, DEFAULT_MAX_MEMORY_PAGES).expect("instantiation failed")
}

fn call(instance: &mut Instance<NoImports>, name: &str, args: &[Value]) -> ExecResult<Vec<Value>> {
    match instance.invoke_export(name, args, &mut NoHooks)? {
        Outcome::Returned(values) => Ok(values),
        Outcome::Halted => panic!("halted without hooks"),
    }
}

/// Run `name(arg)` on wasmi against the encoded module.
fn reference_i64(module: &Module, name: &str, arg: i64) -> i64 {
    let bytes = gobake_codec::encode(module).expect("encode");
    let engine = wasmi::Engine::default();
    let wasm = wasmi::Module::new(&engine, &bytes[..]).expect("wasmi parse");
    let mut store = wasmi::Store::new(&engine, ());
    let linker = <wasmi::Linker<()>>::new(&engine);
    let instance = linker
        .instantiate(&mut store, &wasm)
        .expect("instantiate")
        .start(&mut store)
        .expect("start");
    let func = instance
        .get_typed_func::<i64, i64>(&store, name)
        .expect("typed func");
    func.call(&mut store, arg).expect("wasmi call")
}

/// `fact(n)`: iterative factorial with a loop and `br_if`.
fn factorial() -> (&'static str, FuncType, Vec<ValType>, Vec<Instr>) {
    (
        "fact",
        FuncType::new(vec![ValType::I64], vec![ValType::I64]),
        vec![ValType::I64],
        vec![
            Instr::I64Const(1),
            Instr::LocalSet(1),
            Instr::Block(BlockType::Empty),
            Instr::Loop(BlockType::Empty),
            Instr::LocalGet(0),
            Instr::I64Eqz,
            Instr::BrIf(1),
            Instr::LocalGet(1),
            Instr::LocalGet(0),
            Instr::I64Mul,
            Instr::LocalSet(1),
            Instr::LocalGet(0),
            Instr::I64Const(1),
            Instr::I64Sub,
            Instr::LocalSet(0),
            Instr::Br(0),
            Instr::End,
            Instr::End,
            Instr::LocalGet(1),
        ],
    )
}

/// `classify(n)`: `br_table` over three arms yielding 10, 20, or 30.
fn classify() -> (&'static str, FuncType, Vec<ValType>, Vec<Instr>) {
    (
        "classify",
        FuncType::new(vec![ValType::I64], vec![ValType::I64]),
        vec![],
        vec![
            Instr::Block(BlockType::Empty),
            Instr::Block(BlockType::Empty),
            Instr::Block(BlockType::Empty),
            Instr::LocalGet(0),
            Instr::I32WrapI64,
            Instr::BrTable {
                targets: vec![0, 1],
                default: 2,
            },
            Instr::End,
            Instr::I64Const(10),
            Instr::Return,
            Instr::End,
            Instr::I64Const(20),
            Instr::Return,
            Instr::End,
            Instr::I64Const(30),
        ],
    )
}

// ══════════════════════════════════════════════════════════════════════════════
// Control flow
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn loop_and_branch_match_reference_engine() {
    let module = module_with(vec![factorial()]);
    let mut instance = instantiate(module.clone());
    for n in [0, 1, 5, 20] {
        let ours = call(&mut instance, "fact", &[Value::I64(n)]).unwrap();
        assert_eq!(ours, vec![Value::I64(reference_i64(&module, "fact", n))]);
    }
}

#[test]
fn br_table_selects_arm_and_clamps_to_default() {
    let module = module_with(vec![classify()]);
    let mut instance = instantiate(module.clone());
    for n in [0, 1, 2, 99] {
        let ours = call(&mut instance, "classify", &[Value::I64(n)]).unwrap();
        assert_eq!(ours, vec![Value::I64(reference_i64(&module, "classify", n))]);
    }
}

#[test]
fn if_else_with_result() {
    let module = module_with(vec![(
        "sign",
        FuncType::new(vec![ValType::I32], vec![ValType::I32]),
        vec![],
        vec![
            Instr::LocalGet(0),
            Instr::I32Const(0),
            Instr::I32LtS,
            Instr::If(BlockType::Value(ValType::I32)),
            Instr::I32Const(-1),
            Instr::Else,
            Instr::I32Const(1),
            Instr::End,
        ],
    )]);
    let mut instance = instantiate(module);
    assert_eq!(call(&mut instance, "sign", &[Value::I32(-7)]).unwrap(), vec![Value::I32(-1)]);
    assert_eq!(call(&mut instance, "sign", &[Value::I32(3)]).unwrap(), vec![Value::I32(1)]);
}

#[test]
fn call_indirect_through_table() {
    let mut module = module_with(vec![
        factorial(),
        (
            "via_table",
            FuncType::new(vec![ValType::I64], vec![ValType::I64]),
            vec![],
            vec![Instr::LocalGet(0), Instr::I32Const(3), Instr::CallIndirect {
                type_index: 0,
                table_index: 0,
            }],
        ),
    ]);
    module.tables.push(TableType {
        minimum: 4,
        maximum: None,
    });
    module.elems.push(Elem {
        table: 0,
        offset: Instr::I32Const(3),
        funcs: vec![0],
    });
    let mut instance = instantiate(module.clone());
    assert_eq!(instance.table()[3], Some(0));
    let ours = call(&mut instance, "via_table", &[Value::I64(6)]).unwrap();
    assert_eq!(ours, vec![Value::I64(reference_i64(&module, "via_table", 6))]);
}

// ══════════════════════════════════════════════════════════════════════════════
// Memory
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn stores_loads_and_grow() {
    let module = module_with(vec![(
        "poke",
        FuncType::new(vec![], vec![ValType::I32]),
        vec![],
        vec![
            Instr::I32Const(16),
            Instr::I64Const(-2),
            Instr::I64Store(MemArg::new(3, 8)),
            Instr::I32Const(1),
            Instr::MemoryGrow,
            Instr::Drop,
            Instr::I32Const(24),
            Instr::I32Load8U(MemArg::new(0, 0)),
        ],
    )]);
    let mut instance = instantiate(module);
    assert_eq!(call(&mut instance, "poke", &[]).unwrap(), vec![Value::I32(0xFE)]);
    assert_eq!(instance.memory().read_i64(24).unwrap(), -2);
    assert_eq!(instance.memory().size_pages(), 2);
}

#[test]
fn out_of_bounds_access_traps() {
    let module = module_with(vec![(
        "oob",
        FuncType::new(vec![], vec![ValType::I32]),
        vec![],
        vec![Instr::I32Const(65_534), Instr::I32Load(MemArg::new(2, 0))],
    )]);
    let mut instance = instantiate(module);
    let err = call(&mut instance, "oob", &[]).unwrap_err();
    assert!(matches!(err, ExecError::Trap(Trap::MemoryOutOfBounds)));
}

#[test]
fn unreachable_traps() {
    let module = module_with(vec![(
        "boom",
        FuncType::default(),
        vec![],
        vec![Instr::Unreachable],
    )]);
    let mut instance = instantiate(module);
    let err = call(&mut instance, "boom", &[]).unwrap_err();
    assert!(matches!(err, ExecError::Trap(Trap::Unreachable)));
}

// ══════════════════════════════════════════════════════════════════════════════
// Hooks and imports
// ══════════════════════════════════════════════════════════════════════════════

/// Counts steps and halts before calling `stop_at`.
struct Recorder {
    steps: usize,
    stop_at: u32,
    global_sets: Vec<(u32, Option<Value>)>,
}

impl ExecHooks for Recorder {
    fn on_step(&mut self, view: &StepView<'_>) -> ExecResult<Flow> {
        self.steps += 1;
        if let Instr::GlobalSet(_) = view.instr {
            self.global_sets.push((view.func_index, view.peek().copied()));
        }
        Ok(Flow::Continue)
    }

    fn on_call(&mut self, func_index: u32) -> ExecResult<Flow> {
        Ok(if func_index == self.stop_at {
            Flow::Break
        } else {
            Flow::Continue
        })
    }
}

#[test]
fn break_before_call_leaves_frames_in_place() {
    let mut module = module_with(vec![
        (
            "outer",
            FuncType::default(),
            vec![],
            vec![Instr::Call(1)],
        ),
        (
            "",
            FuncType::default(),
            vec![],
            vec![
                Instr::I32Const(7),
                Instr::GlobalSet(0),
                Instr::I32Const(9),
                Instr::Call(2),
            ],
        ),
        (
            "target",
            FuncType::new(vec![ValType::I32], vec![]),
            vec![],
            vec![Instr::LocalGet(0), Instr::GlobalSet(0)],
        ),
    ]);
    module.globals.push(gobake_types::Global {
        ty: gobake_types::GlobalType {
            val_type: ValType::I32,
            mutable: true,
        },
        init: Instr::I32Const(0),
    });
    let mut instance = instantiate(module);
    let mut hooks = Recorder {
        steps: 0,
        stop_at: 2,
        global_sets: Vec::new(),
    };
    let outcome = instance.invoke_export("outer", &[], &mut hooks).unwrap();
    assert_eq!(outcome, Outcome::Halted);
    assert_eq!(instance.call_stack(), vec![0, 1]);
    // The pc stays on the call; its argument is already popped.
    assert_eq!(instance.frames()[1].pc(), 3);
    assert!(instance.frames()[1].stack().is_empty());
    assert_eq!(hooks.steps, 5);
    assert_eq!(hooks.global_sets, vec![(1, Some(Value::I32(7)))]);
    assert_eq!(instance.globals()[0], Value::I32(7));

    // Another invocation runs on top of the halted frames.
    let outcome = instance
        .invoke_export("target", &[Value::I32(9)], &mut NoHooks)
        .unwrap();
    assert_eq!(outcome, Outcome::Returned(vec![]));
    assert_eq!(instance.call_stack(), vec![0, 1]);
    assert_eq!(instance.globals()[0], Value::I32(9));
}

#[test]
fn break_before_indirect_call_pops_table_index_and_arguments() {
    let mut module = module_with(vec![
        (
            "outer",
            FuncType::default(),
            vec![],
            vec![
                Instr::I32Const(4),
                Instr::I32Const(0),
                Instr::CallIndirect {
                    type_index: 1,
                    table_index: 0,
                },
            ],
        ),
        (
            "target",
            FuncType::new(vec![ValType::I32], vec![]),
            vec![],
            vec![],
        ),
    ]);
    module.tables.push(TableType {
        minimum: 1,
        maximum: None,
    });
    module.elems.push(Elem {
        table: 0,
        offset: Instr::I32Const(0),
        funcs: vec![1],
    });
    let mut instance = instantiate(module);
    let mut hooks = Recorder {
        steps: 0,
        stop_at: 1,
        global_sets: Vec::new(),
    };
    let outcome = instance.invoke_export("outer", &[], &mut hooks).unwrap();
    assert_eq!(outcome, Outcome::Halted);
    assert_eq!(instance.call_stack(), vec![0]);
    assert_eq!(instance.frames()[0].pc(), 2);
    assert!(instance.frames()[0].stack().is_empty());
}

/// Records calls and writes the argument into memory.
#[derive(Default)]
struct CallLog {
    calls: Vec<(String, Vec<Value>)>,
}

impl Imports for CallLog {
    type Error = ExecError;

    fn call(&mut self, module: &str, field: &str, args: &[Value], memory: &mut Memory) -> ExecResult<Vec<Value>> {
        self.calls.push((format!("{module}.{field}"), args.to_vec()));
        let sp = args[0].as_i32()?;
        memory.write_i64(u64::from(sp as u32) + 8, 42)?;
        Ok(vec![])
    }
}

#[test]
fn imports_receive_arguments_and_memory() {
    let mut module = module_with(vec![]);
    let ty = module.intern_type(FuncType::new(vec![ValType::I32], vec![]));
    module.imports.push(Import {
        module: "go".into(),
        name: "runtime.nanotime".into(),
        kind: ImportKind::Func(ty),
    });
    let run_ty = module.intern_type(FuncType::new(vec![], vec![ValType::I64]));
    module.funcs.push(Func {
        type_index: run_ty,
        locals: vec![],
        body: vec![
            Instr::I32Const(100),
            Instr::Call(0),
            Instr::I32Const(108),
            Instr::I64Load(MemArg::new(3, 0)),
        ],
    });
    module.exports.push(Export {
        name: "run".into(),
        kind: ExportKind::Func,
        index: 1,
    });

    let mut instance = Instance::new(module, CallLog::default(), DEFAULT_MAX_MEMORY_PAGES).unwrap();
    let outcome = instance.invoke_export("run", &[], &mut NoHooks).unwrap();
    assert_eq!(outcome, Outcome::Returned(vec![Value::I64(42)]));
    assert_eq!(
        instance.imports().calls,
        vec![("go.runtime.nanotime".to_string(), vec![Value::I32(100)])]
    );
}

#[test]
fn failing_import_names_the_call() {
    struct Refuse;
    impl Imports for Refuse {
        type Error = ExecError;
        fn call(&mut self, _: &str, field: &str, _: &[Value], _: &mut Memory) -> ExecResult<Vec<Value>> {
            Err(ExecError::Unsupported(field.to_string()))
        }
    }

    let mut module = module_with(vec![]);
    let ty = module.intern_type(FuncType::new(vec![ValType::I32], vec![]));
    module.imports.push(Import {
        module: "go".into(),
        name: "syscall/js.valueCall".into(),
        kind: ImportKind::Func(ty),
    });
    module.exports.push(Export {
        name: "call".into(),
        kind: ExportKind::Func,
        index: 0,
    });
    let mut instance = Instance::new(module, Refuse, DEFAULT_MAX_MEMORY_PAGES).unwrap();
    let err = instance
        .invoke_export("call", &[Value::I32(0)], &mut NoHooks)
        .unwrap_err();
    assert!(matches!(&err, ExecError::Host { field, .. } if field == "syscall/js.valueCall"));
}

#[test]
fn unknown_export_and_bad_arguments_are_rejected() {
    let mut instance = instantiate(module_with(vec![factorial()]));
    assert!(matches!(
        call(&mut instance, "missing", &[]),
        Err(ExecError::UnknownExport(_))
    ));
    assert!(matches!(
        call(&mut instance, "fact", &[Value::I32(1)]),
        Err(ExecError::Malformed(_))
    ));
}
