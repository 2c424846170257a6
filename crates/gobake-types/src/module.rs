//! Module-level AST nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::instr::Instr;

/// Size of one linear-memory page in bytes.
pub const PAGE_SIZE: usize = 65_536;

/// A numeric value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
}

/// A function signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: Vec<ValType>, results: Vec<ValType>) -> Self {
        Self { params, results }
    }
}

/// A function defined in the module (imports are listed separately).
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub type_index: u32,
    /// Declared locals beyond the parameters, one entry per slot.
    pub locals: Vec<ValType>,
    /// Instruction sequence without the closing `end`.
    pub body: Vec<Instr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub val_type: ValType,
    pub mutable: bool,
}

/// A global with its constant initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub ty: GlobalType,
    pub init: Instr,
}

/// Limits of a linear memory, in pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub minimum: u32,
    pub maximum: Option<u32>,
}

/// A funcref table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub minimum: u32,
    pub maximum: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    /// Index into the type section.
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

/// An active element segment of function indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Elem {
    pub table: u32,
    pub offset: Instr,
    pub funcs: Vec<u32>,
}

/// An active data segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub offset: Instr,
    pub bytes: Vec<u8>,
}

/// A custom section other than `name`, kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Custom {
    pub name: String,
    pub data: Vec<u8>,
}

/// A whole module.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    pub funcs: Vec<Func>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elems: Vec<Elem>,
    pub data: Vec<Data>,
    /// Function names from the `name` custom section, keyed by absolute index.
    /// `None` when the module carries no name section.
    pub func_names: Option<BTreeMap<u32, String>>,
    pub customs: Vec<Custom>,
}

impl Module {
    /// Number of imported functions; defined functions are numbered after them.
    pub fn import_func_count(&self) -> u32 {
        self.imports
            .iter()
            .filter(|import| matches!(import.kind, ImportKind::Func(_)))
            .count() as u32
    }

    /// Total number of functions in the index space.
    pub fn func_count(&self) -> u32 {
        self.import_func_count() + self.funcs.len() as u32
    }

    /// The imported function at absolute index `func_index`, if it is one.
    pub fn func_import(&self, func_index: u32) -> Option<&Import> {
        self.imports
            .iter()
            .filter(|import| matches!(import.kind, ImportKind::Func(_)))
            .nth(func_index as usize)
    }

    /// The defined function at absolute index `func_index`, if it is one.
    pub fn defined_func(&self, func_index: u32) -> Option<&Func> {
        let imported = self.import_func_count();
        func_index
            .checked_sub(imported)
            .and_then(|local| self.funcs.get(local as usize))
    }

    /// Signature of the function at absolute index `func_index`.
    pub fn func_type(&self, func_index: u32) -> Option<&FuncType> {
        let type_index = match self.func_import(func_index) {
            Some(Import {
                kind: ImportKind::Func(type_index),
                ..
            }) => *type_index,
            _ => self.defined_func(func_index)?.type_index,
        };
        self.types.get(type_index as usize)
    }

    /// Look up an export by name and kind.
    pub fn export(&self, name: &str, kind: ExportKind) -> Option<u32> {
        self.exports
            .iter()
            .find(|export| export.name == name && export.kind == kind)
            .map(|export| export.index)
    }

    /// Name of the function at absolute index `func_index`, if recorded.
    pub fn func_name(&self, func_index: u32) -> Option<&str> {
        self.func_names
            .as_ref()
            .and_then(|names| names.get(&func_index))
            .map(String::as_str)
    }

    /// Index of `ty` in the type section, appending it when absent.
    pub fn intern_type(&mut self, ty: FuncType) -> u32 {
        if let Some(index) = self.types.iter().position(|existing| *existing == ty) {
            return index as u32;
        }
        self.types.push(ty);
        (self.types.len() - 1) as u32
    }
}
