//! Integration tests for the gobake module codec.
//!
//! Tests validate:
//! - Encoded modules validate and decode back to the same AST
//! - Locals, name section and unknown custom sections survive a round trip
//! - Output is deterministic
//! - Constructs outside the supported subset are rejected, not dropped

use std::collections::BTreeMap;

use gobake_codec::{decode, encode, CodecError};
use gobake_types::{
    BlockType, Custom, Data, Elem, Export, ExportKind, Func, FuncType, Global, GlobalType, Import,
    ImportKind, Instr, MemArg, MemoryType, Module, TableType, ValType,
};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

/// A module touching every section the codec handles.
fn sample_module() -> Module {
    Module {
        types: vec![
            FuncType::new(vec![ValType::I32], vec![]),
            FuncType::new(vec![ValType::I32, ValType::I32], vec![]),
            FuncType::new(vec![ValType::I64], vec![ValType::F64]),
        ],
        imports: vec![Import {
            module: "go".into(),
            name: "debug".into(),
            kind: ImportKind::Func(0),
        }],
        funcs: vec![
            Func {
                type_index: 1,
                locals: vec![ValType::I32, ValType::I32, ValType::I64, ValType::I32],
                body: vec![
                    Instr::Block(BlockType::Empty),
                    Instr::LocalGet(0),
                    Instr::BrTable {
                        targets: vec![0, 0],
                        default: 0,
                    },
                    Instr::End,
                    Instr::LocalGet(1),
                    Instr::If(BlockType::Empty),
                    Instr::I32Const(8),
                    Instr::Call(0),
                    Instr::Else,
                    Instr::I32Const(16),
                    Instr::I32Const(-1),
                    Instr::I32Store(MemArg::new(2, 4)),
                    Instr::End,
                    Instr::GlobalGet(0),
                    Instr::I32Const(1),
                    Instr::I32Add,
                    Instr::GlobalSet(0),
                ],
            },
            Func {
                type_index: 2,
                locals: vec![],
                body: vec![
                    Instr::LocalGet(0),
                    Instr::F64ConvertI64S,
                    Instr::f64_const(0.5),
                    Instr::F64Mul,
                ],
            },
        ],
        tables: vec![TableType {
            minimum: 4,
            maximum: Some(4),
        }],
        memories: vec![MemoryType {
            minimum: 1,
            maximum: Some(16),
        }],
        globals: vec![
            Global {
                ty: GlobalType {
                    val_type: ValType::I32,
                    mutable: true,
                },
                init: Instr::I32Const(4096),
            },
            Global {
                ty: GlobalType {
                    val_type: ValType::F64,
                    mutable: false,
                },
                init: Instr::f64_const(-2.25),
            },
        ],
        exports: vec![
            Export {
                name: "run".into(),
                kind: ExportKind::Func,
                index: 1,
            },
            Export {
                name: "mem".into(),
                kind: ExportKind::Memory,
                index: 0,
            },
        ],
        start: None,
        elems: vec![Elem {
            table: 0,
            offset: Instr::I32Const(1),
            funcs: vec![1, 2],
        }],
        data: vec![
            Data {
                offset: Instr::I32Const(0),
                bytes: b"hello".to_vec(),
            },
            Data {
                offset: Instr::I32Const(1024),
                bytes: vec![1, 0, 0, 2],
            },
        ],
        func_names: Some(BTreeMap::from([
            (0, "go.debug".to_string()),
            (1, "_rt0_wasm_js".to_string()),
            (2, "math.scale".to_string()),
        ])),
        customs: vec![Custom {
            name: "producers".into(),
            data: vec![0],
        }],
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Round trip
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn round_trip_preserves_module() {
    let module = sample_module();
    let bytes = encode(&module).unwrap();
    wasmparser::validate(&bytes).expect("encoder output validates");
    assert_eq!(decode(&bytes).unwrap(), module);
}

#[test]
fn locals_are_expanded_one_per_slot() {
    let bytes = encode(&sample_module()).unwrap();
    let decoded = decode(&bytes).unwrap();
    assert_eq!(
        decoded.funcs[0].locals,
        vec![ValType::I32, ValType::I32, ValType::I64, ValType::I32]
    );
}

#[test]
fn module_without_names_has_no_name_section() {
    let module = Module {
        func_names: None,
        ..sample_module()
    };
    let decoded = decode(&encode(&module).unwrap()).unwrap();
    assert_eq!(decoded.func_names, None);
    assert_eq!(decoded.func_name(1), None);
}

#[test]
fn encoding_is_deterministic() {
    let module = sample_module();
    assert_eq!(encode(&module).unwrap(), encode(&module).unwrap());
}

// ══════════════════════════════════════════════════════════════════════════════
// Rejections
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn garbage_bytes_fail_to_parse() {
    let err = decode(b"not wasm").unwrap_err();
    assert!(matches!(err, CodecError::Parse(_)));
}

#[test]
fn passive_data_is_unsupported() {
    let mut out = wasm_encoder::Module::new();
    let mut memories = wasm_encoder::MemorySection::new();
    memories.memory(wasm_encoder::MemoryType {
        minimum: 1,
        maximum: None,
        memory64: false,
        shared: false,
        page_size_log2: None,
    });
    out.section(&memories);
    out.section(&wasm_encoder::DataCountSection { count: 1 });
    let mut data = wasm_encoder::DataSection::new();
    data.passive([1u8, 2, 3]);
    out.section(&data);
    let err = decode(&out.finish()).unwrap_err();
    assert!(matches!(err, CodecError::Unsupported(_)));
}

#[test]
fn invalid_modules_fail_validation() {
    let mut module = sample_module();
    module.funcs[1].body.push(Instr::Call(99));
    let err = encode(&module).unwrap_err();
    assert!(matches!(err, CodecError::ValidationFailed(_)));
}

#[test]
fn non_constant_initializers_are_unsupported() {
    let mut module = sample_module();
    module.globals[0].init = Instr::I32Add;
    let err = encode(&module).unwrap_err();
    assert!(matches!(err, CodecError::Unsupported(_)));
}
