//! Shared types for gobake.
//!
//! This crate defines the structured WebAssembly module model every other
//! stage works on: value and function types, the instruction set, globals,
//! element and data segments, imports, exports and the function-name map.
//! Decoding and encoding live in `gobake-codec`; execution lives in
//! `gobake-interp`.

pub mod instr;
pub mod module;

pub use instr::{BlockType, Instr, MemArg};
pub use module::{
    Custom, Data, Elem, Export, ExportKind, Func, FuncType, Global, GlobalType, Import,
    ImportKind, MemoryType, Module, TableType, ValType, PAGE_SIZE,
};
