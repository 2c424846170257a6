//! `.wasm` bytes → [`Module`].

use std::collections::BTreeMap;

use gobake_types::{
    BlockType, Custom, Data, Elem, Export, ExportKind, Func, FuncType, Global, GlobalType,
    Import, ImportKind, Instr, MemArg, MemoryType, Module, TableType, ValType,
};
use wasmparser::{
    ConstExpr, DataKind, ElementItems, ElementKind, ExternalKind, FunctionBody, KnownCustom,
    Name, Operator, Parser, Payload, TableInit, TypeRef,
};

use crate::error::{CodecError, CodecResult};

/// Decode a binary module into the AST.
pub fn decode(bytes: &[u8]) -> CodecResult<Module> {
    let mut module = Module::default();
    let mut declared_types: Vec<u32> = Vec::new();
    let mut bodies: Vec<(Vec<ValType>, Vec<Instr>)> = Vec::new();

    for payload in Parser::new(0).parse_all(bytes) {
        match payload? {
            Payload::TypeSection(reader) => {
                for ty in reader.into_iter_err_on_gc_types() {
                    let ty = ty?;
                    module.types.push(FuncType::new(
                        val_types(ty.params())?,
                        val_types(ty.results())?,
                    ));
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import?;
                    let kind = match import.ty {
                        TypeRef::Func(type_index) => ImportKind::Func(type_index),
                        TypeRef::Table(ty) => ImportKind::Table(table_type(&ty)?),
                        TypeRef::Memory(ty) => ImportKind::Memory(memory_type(&ty)?),
                        TypeRef::Global(ty) => ImportKind::Global(GlobalType {
                            val_type: val_type(ty.content_type)?,
                            mutable: ty.mutable,
                        }),
                        _ => {
                            return Err(CodecError::Unsupported(format!(
                                "import {}.{} of unsupported kind",
                                import.module, import.name
                            )))
                        }
                    };
                    module.imports.push(Import {
                        module: import.module.to_string(),
                        name: import.name.to_string(),
                        kind,
                    });
                }
            }
            Payload::FunctionSection(reader) => {
                for type_index in reader {
                    declared_types.push(type_index?);
                }
            }
            Payload::TableSection(reader) => {
                for table in reader {
                    let table = table?;
                    if !matches!(table.init, TableInit::RefNull) {
                        return Err(CodecError::Unsupported(
                            "table with an initializer expression".into(),
                        ));
                    }
                    module.tables.push(table_type(&table.ty)?);
                }
            }
            Payload::MemorySection(reader) => {
                for memory in reader {
                    module.memories.push(memory_type(&memory?)?);
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global?;
                    module.globals.push(Global {
                        ty: GlobalType {
                            val_type: val_type(global.ty.content_type)?,
                            mutable: global.ty.mutable,
                        },
                        init: const_instr(&global.init_expr)?,
                    });
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export?;
                    let kind = match export.kind {
                        ExternalKind::Func => ExportKind::Func,
                        ExternalKind::Table => ExportKind::Table,
                        ExternalKind::Memory => ExportKind::Memory,
                        ExternalKind::Global => ExportKind::Global,
                        _ => {
                            return Err(CodecError::Unsupported(format!(
                                "export {} of unsupported kind",
                                export.name
                            )))
                        }
                    };
                    module.exports.push(Export {
                        name: export.name.to_string(),
                        kind,
                        index: export.index,
                    });
                }
            }
            Payload::StartSection { func, .. } => module.start = Some(func),
            Payload::ElementSection(reader) => {
                for element in reader {
                    let element = element?;
                    let (table, offset) = match element.kind {
                        ElementKind::Active {
                            table_index,
                            offset_expr,
                        } => (table_index.unwrap_or(0), const_instr(&offset_expr)?),
                        _ => {
                            return Err(CodecError::Unsupported(
                                "passive or declared element segment".into(),
                            ))
                        }
                    };
                    let funcs = match element.items {
                        ElementItems::Functions(indices) => {
                            indices.into_iter().collect::<Result<Vec<u32>, _>>()?
                        }
                        ElementItems::Expressions(..) => {
                            return Err(CodecError::Unsupported(
                                "element segment of expressions".into(),
                            ))
                        }
                    };
                    module.elems.push(Elem {
                        table,
                        offset,
                        funcs,
                    });
                }
            }
            Payload::DataSection(reader) => {
                for data in reader {
                    let data = data?;
                    match data.kind {
                        DataKind::Active {
                            memory_index: 0,
                            offset_expr,
                        } => module.data.push(Data {
                            offset: const_instr(&offset_expr)?,
                            bytes: data.data.to_vec(),
                        }),
                        _ => {
                            return Err(CodecError::Unsupported(
                                "passive data segment or non-zero memory".into(),
                            ))
                        }
                    }
                }
            }
            Payload::CodeSectionEntry(body) => bodies.push(decode_body(body)?),
            Payload::CustomSection(reader) => match reader.as_known() {
                KnownCustom::Name(names) => {
                    let mut func_names = BTreeMap::new();
                    for name in names {
                        if let Name::Function(map) = name? {
                            for naming in map {
                                let naming = naming?;
                                func_names.insert(naming.index, naming.name.to_string());
                            }
                        }
                    }
                    module.func_names = Some(func_names);
                }
                _ => module.customs.push(Custom {
                    name: reader.name().to_string(),
                    data: reader.data().to_vec(),
                }),
            },
            _ => {}
        }
    }

    if declared_types.len() != bodies.len() {
        return Err(CodecError::Unsupported(format!(
            "{} declared functions but {} bodies",
            declared_types.len(),
            bodies.len()
        )));
    }
    module.funcs = declared_types
        .into_iter()
        .zip(bodies)
        .map(|(type_index, (locals, body))| Func {
            type_index,
            locals,
            body,
        })
        .collect();

    tracing::debug!(
        target: "gobake::codec",
        types = module.types.len(),
        imports = module.imports.len(),
        funcs = module.funcs.len(),
        globals = module.globals.len(),
        data = module.data.len(),
        "decoded module"
    );
    Ok(module)
}

// ── Function bodies ──────────────────────────────────────────────────────────

fn decode_body(body: FunctionBody<'_>) -> CodecResult<(Vec<ValType>, Vec<Instr>)> {
    let mut locals = Vec::new();
    for entry in body.get_locals_reader()? {
        let (count, ty) = entry?;
        let ty = val_type(ty)?;
        locals.extend(std::iter::repeat(ty).take(count as usize));
    }

    let mut instrs = Vec::new();
    let mut reader = body.get_operators_reader()?;
    while !reader.eof() {
        instrs.push(decode_operator(&reader.read()?)?);
    }
    // The closing `end` of the body is implicit in the AST.
    if instrs.pop() != Some(Instr::End) {
        return Err(CodecError::Unsupported(
            "function body does not end with `end`".into(),
        ));
    }
    Ok((locals, instrs))
}

macro_rules! define_decode_simple {
    (plain { $($plain:ident)* } memory { $($mem:ident)* }) => {
        /// Map an operator without control-flow or index immediates.
        fn decode_simple(op: &Operator<'_>) -> CodecResult<Option<Instr>> {
            Ok(Some(match op {
                $(Operator::$plain => Instr::$plain,)*
                $(Operator::$mem { memarg } => Instr::$mem(mem_arg(memarg)?),)*
                _ => return Ok(None),
            }))
        }
    };
}

gobake_types::for_each_simple_instr!(define_decode_simple);

fn decode_operator(op: &Operator<'_>) -> CodecResult<Instr> {
    if let Some(instr) = decode_simple(op)? {
        return Ok(instr);
    }
    Ok(match op {
        Operator::Block { blockty } => Instr::Block(block_type(blockty)?),
        Operator::Loop { blockty } => Instr::Loop(block_type(blockty)?),
        Operator::If { blockty } => Instr::If(block_type(blockty)?),
        Operator::Br { relative_depth } => Instr::Br(*relative_depth),
        Operator::BrIf { relative_depth } => Instr::BrIf(*relative_depth),
        Operator::BrTable { targets } => Instr::BrTable {
            targets: targets.targets().collect::<Result<Vec<u32>, _>>()?,
            default: targets.default(),
        },
        Operator::Call { function_index } => Instr::Call(*function_index),
        Operator::CallIndirect {
            type_index,
            table_index,
        } => Instr::CallIndirect {
            type_index: *type_index,
            table_index: *table_index,
        },
        Operator::TypedSelect { ty } => {
            val_type(*ty)?;
            Instr::Select
        }
        Operator::LocalGet { local_index } => Instr::LocalGet(*local_index),
        Operator::LocalSet { local_index } => Instr::LocalSet(*local_index),
        Operator::LocalTee { local_index } => Instr::LocalTee(*local_index),
        Operator::GlobalGet { global_index } => Instr::GlobalGet(*global_index),
        Operator::GlobalSet { global_index } => Instr::GlobalSet(*global_index),
        Operator::MemorySize { mem: 0 } => Instr::MemorySize,
        Operator::MemoryGrow { mem: 0 } => Instr::MemoryGrow,
        Operator::MemoryCopy {
            dst_mem: 0,
            src_mem: 0,
        } => Instr::MemoryCopy,
        Operator::MemoryFill { mem: 0 } => Instr::MemoryFill,
        Operator::I32Const { value } => Instr::I32Const(*value),
        Operator::I64Const { value } => Instr::I64Const(*value),
        Operator::F32Const { value } => Instr::F32Const(value.bits()),
        Operator::F64Const { value } => Instr::F64Const(value.bits()),
        other => {
            return Err(CodecError::Unsupported(format!(
                "instruction {other:?}"
            )))
        }
    })
}

// ── Immediates and types ─────────────────────────────────────────────────────

fn mem_arg(arg: &wasmparser::MemArg) -> CodecResult<MemArg> {
    if arg.memory != 0 {
        return Err(CodecError::Unsupported(format!(
            "access to memory {}",
            arg.memory
        )));
    }
    Ok(MemArg::new(u32::from(arg.align), arg.offset))
}

fn block_type(ty: &wasmparser::BlockType) -> CodecResult<BlockType> {
    Ok(match ty {
        wasmparser::BlockType::Empty => BlockType::Empty,
        wasmparser::BlockType::Type(ty) => BlockType::Value(val_type(*ty)?),
        wasmparser::BlockType::FuncType(index) => BlockType::Func(*index),
    })
}

fn val_type(ty: wasmparser::ValType) -> CodecResult<ValType> {
    match ty {
        wasmparser::ValType::I32 => Ok(ValType::I32),
        wasmparser::ValType::I64 => Ok(ValType::I64),
        wasmparser::ValType::F32 => Ok(ValType::F32),
        wasmparser::ValType::F64 => Ok(ValType::F64),
        other => Err(CodecError::Unsupported(format!("value type {other:?}"))),
    }
}

fn val_types(types: &[wasmparser::ValType]) -> CodecResult<Vec<ValType>> {
    types.iter().copied().map(val_type).collect()
}

fn table_type(ty: &wasmparser::TableType) -> CodecResult<TableType> {
    if !ty.element_type.is_func_ref() || ty.table64 {
        return Err(CodecError::Unsupported(format!("table type {ty:?}")));
    }
    Ok(TableType {
        minimum: limit(ty.initial)?,
        maximum: ty.maximum.map(limit).transpose()?,
    })
}

fn memory_type(ty: &wasmparser::MemoryType) -> CodecResult<MemoryType> {
    if ty.memory64 || ty.shared {
        return Err(CodecError::Unsupported(format!("memory type {ty:?}")));
    }
    Ok(MemoryType {
        minimum: limit(ty.initial)?,
        maximum: ty.maximum.map(limit).transpose()?,
    })
}

fn limit(value: u64) -> CodecResult<u32> {
    u32::try_from(value).map_err(|_| CodecError::Unsupported(format!("limit {value}")))
}

/// A constant expression of exactly one instruction.
fn const_instr(expr: &ConstExpr<'_>) -> CodecResult<Instr> {
    let mut reader = expr.get_operators_reader();
    let instr = match reader.read()? {
        Operator::I32Const { value } => Instr::I32Const(value),
        Operator::I64Const { value } => Instr::I64Const(value),
        Operator::F32Const { value } => Instr::F32Const(value.bits()),
        Operator::F64Const { value } => Instr::F64Const(value.bits()),
        Operator::GlobalGet { global_index } => Instr::GlobalGet(global_index),
        other => {
            return Err(CodecError::Unsupported(format!(
                "constant expression {other:?}"
            )))
        }
    };
    match reader.read()? {
        Operator::End => Ok(instr),
        _ => Err(CodecError::Unsupported(
            "constant expression longer than one instruction".into(),
        )),
    }
}
