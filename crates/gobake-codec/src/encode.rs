//! [`Module`] → `.wasm` bytes.
//!
//! Sections are emitted in the order the binary format requires and the
//! result is validated with `wasmparser` before it is handed back.

use std::borrow::Cow;

use gobake_types::{BlockType, ExportKind, ImportKind, Instr, MemArg, Module, ValType};
use wasm_encoder::{
    CodeSection, ConstExpr, CustomSection, DataSection, ElementSection, Elements, EntityType,
    ExportSection, Function, FunctionSection, GlobalSection, ImportSection, Instruction,
    MemorySection, NameMap, NameSection, StartSection, TableSection, TypeSection,
};

use crate::error::{CodecError, CodecResult};

/// Encode the AST into a validated binary module.
pub fn encode(module: &Module) -> CodecResult<Vec<u8>> {
    let mut out = wasm_encoder::Module::new();

    // 1. Type section
    let mut types = TypeSection::new();
    for ty in &module.types {
        types.ty().function(
            ty.params.iter().copied().map(val_type),
            ty.results.iter().copied().map(val_type),
        );
    }
    out.section(&types);

    // 2. Import section
    let mut imports = ImportSection::new();
    for import in &module.imports {
        let entity = match &import.kind {
            ImportKind::Func(type_index) => EntityType::Function(*type_index),
            ImportKind::Table(ty) => EntityType::Table(table_type(ty)),
            ImportKind::Memory(ty) => EntityType::Memory(memory_type(ty)),
            ImportKind::Global(ty) => EntityType::Global(global_type(ty)),
        };
        imports.import(&import.module, &import.name, entity);
    }
    out.section(&imports);

    // 3. Function section
    let mut functions = FunctionSection::new();
    for func in &module.funcs {
        functions.function(func.type_index);
    }
    out.section(&functions);

    // 4. Table section
    let mut tables = TableSection::new();
    for ty in &module.tables {
        tables.table(table_type(ty));
    }
    out.section(&tables);

    // 5. Memory section
    let mut memories = MemorySection::new();
    for ty in &module.memories {
        memories.memory(memory_type(ty));
    }
    out.section(&memories);

    // 6. Global section
    let mut globals = GlobalSection::new();
    for global in &module.globals {
        globals.global(global_type(&global.ty), &const_expr(&global.init)?);
    }
    out.section(&globals);

    // 7. Export section
    let mut exports = ExportSection::new();
    for export in &module.exports {
        let kind = match export.kind {
            ExportKind::Func => wasm_encoder::ExportKind::Func,
            ExportKind::Table => wasm_encoder::ExportKind::Table,
            ExportKind::Memory => wasm_encoder::ExportKind::Memory,
            ExportKind::Global => wasm_encoder::ExportKind::Global,
        };
        exports.export(&export.name, kind, export.index);
    }
    out.section(&exports);

    // 8. Start section
    if let Some(function_index) = module.start {
        out.section(&StartSection { function_index });
    }

    // 9. Element section
    let mut elements = ElementSection::new();
    for elem in &module.elems {
        let table = (elem.table != 0).then_some(elem.table);
        elements.active(
            table,
            &const_expr(&elem.offset)?,
            Elements::Functions(Cow::Borrowed(&elem.funcs)),
        );
    }
    out.section(&elements);

    // 10. Code section
    let mut code = CodeSection::new();
    for func in &module.funcs {
        let mut function = Function::new(compress_locals(&func.locals));
        for instr in &func.body {
            function.instruction(&encode_instr(instr));
        }
        function.instruction(&Instruction::End);
        code.function(&function);
    }
    out.section(&code);

    // 11. Data section
    let mut data = DataSection::new();
    for segment in &module.data {
        data.active(0, &const_expr(&segment.offset)?, segment.bytes.iter().copied());
    }
    out.section(&data);

    // 12. Name section, then any other custom sections
    if let Some(func_names) = &module.func_names {
        let mut map = NameMap::new();
        for (index, name) in func_names {
            map.append(*index, name);
        }
        let mut names = NameSection::new();
        names.functions(&map);
        out.section(&names);
    }
    for custom in &module.customs {
        out.section(&CustomSection {
            name: Cow::Borrowed(custom.name.as_str()),
            data: Cow::Borrowed(custom.data.as_slice()),
        });
    }

    let bytes = out.finish();
    wasmparser::validate(&bytes).map_err(|e| CodecError::ValidationFailed(format!("{e}")))?;
    tracing::debug!(target: "gobake::codec", size = bytes.len(), "encoded module");
    Ok(bytes)
}

/// Collapse one-entry-per-slot locals into `(count, type)` runs.
fn compress_locals(locals: &[ValType]) -> Vec<(u32, wasm_encoder::ValType)> {
    let mut runs: Vec<(u32, wasm_encoder::ValType)> = Vec::new();
    for ty in locals.iter().copied().map(val_type) {
        match runs.last_mut() {
            Some((count, last)) if *last == ty => *count += 1,
            _ => runs.push((1, ty)),
        }
    }
    runs
}

// ── Instructions ─────────────────────────────────────────────────────────────

macro_rules! define_encode_simple {
    (plain { $($plain:ident)* } memory { $($mem:ident)* }) => {
        /// Map an instruction that has a same-named `wasm_encoder` counterpart.
        fn encode_simple(instr: &Instr) -> Option<Instruction<'static>> {
            Some(match instr {
                $(Instr::$plain => Instruction::$plain,)*
                $(Instr::$mem(arg) => Instruction::$mem(mem_arg(*arg)),)*
                _ => return None,
            })
        }
    };
}

gobake_types::for_each_simple_instr!(define_encode_simple);

fn encode_instr(instr: &Instr) -> Instruction<'_> {
    if let Some(simple) = encode_simple(instr) {
        return simple;
    }
    match instr {
        Instr::Block(ty) => Instruction::Block(block_type(*ty)),
        Instr::Loop(ty) => Instruction::Loop(block_type(*ty)),
        Instr::If(ty) => Instruction::If(block_type(*ty)),
        Instr::Br(depth) => Instruction::Br(*depth),
        Instr::BrIf(depth) => Instruction::BrIf(*depth),
        Instr::BrTable { targets, default } => {
            Instruction::BrTable(Cow::Borrowed(targets.as_slice()), *default)
        }
        Instr::Call(index) => Instruction::Call(*index),
        Instr::CallIndirect {
            type_index,
            table_index,
        } => Instruction::CallIndirect {
            type_index: *type_index,
            table_index: *table_index,
        },
        Instr::LocalGet(index) => Instruction::LocalGet(*index),
        Instr::LocalSet(index) => Instruction::LocalSet(*index),
        Instr::LocalTee(index) => Instruction::LocalTee(*index),
        Instr::GlobalGet(index) => Instruction::GlobalGet(*index),
        Instr::GlobalSet(index) => Instruction::GlobalSet(*index),
        Instr::MemorySize => Instruction::MemorySize(0),
        Instr::MemoryGrow => Instruction::MemoryGrow(0),
        Instr::MemoryCopy => Instruction::MemoryCopy {
            src_mem: 0,
            dst_mem: 0,
        },
        Instr::MemoryFill => Instruction::MemoryFill(0),
        Instr::I32Const(value) => Instruction::I32Const(*value),
        Instr::I64Const(value) => Instruction::I64Const(*value),
        Instr::F32Const(bits) => Instruction::F32Const(f32::from_bits(*bits)),
        Instr::F64Const(bits) => Instruction::F64Const(f64::from_bits(*bits)),
        // Every remaining variant is covered by `encode_simple`.
        _ => Instruction::Unreachable,
    }
}

fn const_expr(instr: &Instr) -> CodecResult<ConstExpr> {
    Ok(match instr {
        Instr::I32Const(value) => ConstExpr::i32_const(*value),
        Instr::I64Const(value) => ConstExpr::i64_const(*value),
        Instr::F32Const(bits) => ConstExpr::f32_const(f32::from_bits(*bits)),
        Instr::F64Const(bits) => ConstExpr::f64_const(f64::from_bits(*bits)),
        Instr::GlobalGet(index) => ConstExpr::global_get(*index),
        other => {
            return Err(CodecError::Unsupported(format!(
                "constant expression {other:?}"
            )))
        }
    })
}

// ── Types ────────────────────────────────────────────────────────────────────

fn val_type(ty: ValType) -> wasm_encoder::ValType {
    match ty {
        ValType::I32 => wasm_encoder::ValType::I32,
        ValType::I64 => wasm_encoder::ValType::I64,
        ValType::F32 => wasm_encoder::ValType::F32,
        ValType::F64 => wasm_encoder::ValType::F64,
    }
}

fn block_type(ty: BlockType) -> wasm_encoder::BlockType {
    match ty {
        BlockType::Empty => wasm_encoder::BlockType::Empty,
        BlockType::Value(ty) => wasm_encoder::BlockType::Result(val_type(ty)),
        BlockType::Func(index) => wasm_encoder::BlockType::FunctionType(index),
    }
}

fn mem_arg(arg: MemArg) -> wasm_encoder::MemArg {
    wasm_encoder::MemArg {
        offset: arg.offset,
        align: arg.align,
        memory_index: 0,
    }
}

fn global_type(ty: &gobake_types::GlobalType) -> wasm_encoder::GlobalType {
    wasm_encoder::GlobalType {
        val_type: val_type(ty.val_type),
        mutable: ty.mutable,
        shared: false,
    }
}

fn memory_type(ty: &gobake_types::MemoryType) -> wasm_encoder::MemoryType {
    wasm_encoder::MemoryType {
        minimum: u64::from(ty.minimum),
        maximum: ty.maximum.map(u64::from),
        memory64: false,
        shared: false,
        page_size_log2: None,
    }
}

fn table_type(ty: &gobake_types::TableType) -> wasm_encoder::TableType {
    wasm_encoder::TableType {
        element_type: wasm_encoder::RefType::FUNCREF,
        table64: false,
        minimum: u64::from(ty.minimum),
        maximum: ty.maximum.map(u64::from),
        shared: false,
    }
}
