//! The instruction set.
//!
//! Covers the WebAssembly MVP plus sign-extension, non-trapping float-to-int
//! conversion and `memory.copy` / `memory.fill`. Variant names follow the
//! operator names used by `wasmparser` and `wasm-encoder`, which lets the codec
//! map the operand-free instructions with a single macro table instead of a
//! hand-written arm per opcode.
//!
//! Float constants are stored as raw bits: two instructions compare equal only
//! when they are bit-for-bit identical, which is what idiom matching needs.

use crate::module::ValType;

/// Invoke `$m!` with the two families of instructions the codec maps by name:
/// `plain` instructions carry no immediates, `memory` instructions carry a
/// single [`MemArg`].
///
/// The same identifiers name the variant in [`Instr`], in
/// `wasmparser::Operator` and in `wasm_encoder::Instruction`.
#[macro_export]
macro_rules! for_each_simple_instr {
    ($m:ident) => {
        $m! {
            plain {
                Unreachable Nop Else End Return Drop Select
                I32Eqz I32Eq I32Ne I32LtS I32LtU I32GtS I32GtU I32LeS I32LeU I32GeS I32GeU
                I64Eqz I64Eq I64Ne I64LtS I64LtU I64GtS I64GtU I64LeS I64LeU I64GeS I64GeU
                F32Eq F32Ne F32Lt F32Gt F32Le F32Ge
                F64Eq F64Ne F64Lt F64Gt F64Le F64Ge
                I32Clz I32Ctz I32Popcnt I32Add I32Sub I32Mul I32DivS I32DivU I32RemS I32RemU
                I32And I32Or I32Xor I32Shl I32ShrS I32ShrU I32Rotl I32Rotr
                I64Clz I64Ctz I64Popcnt I64Add I64Sub I64Mul I64DivS I64DivU I64RemS I64RemU
                I64And I64Or I64Xor I64Shl I64ShrS I64ShrU I64Rotl I64Rotr
                F32Abs F32Neg F32Ceil F32Floor F32Trunc F32Nearest F32Sqrt
                F32Add F32Sub F32Mul F32Div F32Min F32Max F32Copysign
                F64Abs F64Neg F64Ceil F64Floor F64Trunc F64Nearest F64Sqrt
                F64Add F64Sub F64Mul F64Div F64Min F64Max F64Copysign
                I32WrapI64 I32TruncF32S I32TruncF32U I32TruncF64S I32TruncF64U
                I64ExtendI32S I64ExtendI32U I64TruncF32S I64TruncF32U I64TruncF64S I64TruncF64U
                F32ConvertI32S F32ConvertI32U F32ConvertI64S F32ConvertI64U F32DemoteF64
                F64ConvertI32S F64ConvertI32U F64ConvertI64S F64ConvertI64U F64PromoteF32
                I32ReinterpretF32 I64ReinterpretF64 F32ReinterpretI32 F64ReinterpretI64
                I32Extend8S I32Extend16S I64Extend8S I64Extend16S I64Extend32S
                I32TruncSatF32S I32TruncSatF32U I32TruncSatF64S I32TruncSatF64U
                I64TruncSatF32S I64TruncSatF32U I64TruncSatF64S I64TruncSatF64U
            }
            memory {
                I32Load I64Load F32Load F64Load
                I32Load8S I32Load8U I32Load16S I32Load16U
                I64Load8S I64Load8U I64Load16S I64Load16U I64Load32S I64Load32U
                I32Store I64Store F32Store F64Store
                I32Store8 I32Store16 I64Store8 I64Store16 I64Store32
            }
        }
    };
}

/// Type of a structured control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Empty,
    Value(ValType),
    /// Index into the module's type section (multi-value blocks).
    Func(u32),
}

/// Immediate of a load or store. Only memory 0 exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemArg {
    /// Alignment hint as a power of two.
    pub align: u32,
    pub offset: u64,
}

impl MemArg {
    pub const fn new(align: u32, offset: u64) -> Self {
        Self { align, offset }
    }
}

macro_rules! define_instr {
    (plain { $($plain:ident)* } memory { $($mem:ident)* }) => {
        /// A single instruction.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum Instr {
            Block(BlockType),
            Loop(BlockType),
            If(BlockType),
            Br(u32),
            BrIf(u32),
            BrTable { targets: Vec<u32>, default: u32 },
            Call(u32),
            CallIndirect { type_index: u32, table_index: u32 },
            LocalGet(u32),
            LocalSet(u32),
            LocalTee(u32),
            GlobalGet(u32),
            GlobalSet(u32),
            MemorySize,
            MemoryGrow,
            MemoryCopy,
            MemoryFill,
            I32Const(i32),
            I64Const(i64),
            /// Raw IEEE-754 bits.
            F32Const(u32),
            /// Raw IEEE-754 bits.
            F64Const(u64),
            $($mem(MemArg),)*
            $($plain,)*
        }
    };
}

for_each_simple_instr!(define_instr);

impl Instr {
    /// `f32.const` from a float value.
    pub fn f32_const(value: f32) -> Self {
        Instr::F32Const(value.to_bits())
    }

    /// `f64.const` from a float value.
    pub fn f64_const(value: f64) -> Self {
        Instr::F64Const(value.to_bits())
    }

    /// The zero constant of `ty`.
    pub fn zero(ty: ValType) -> Self {
        match ty {
            ValType::I32 => Instr::I32Const(0),
            ValType::I64 => Instr::I64Const(0),
            ValType::F32 => Instr::F32Const(0),
            ValType::F64 => Instr::F64Const(0),
        }
    }

    /// Local slot touched by `local.get`, `local.set` or `local.tee`.
    pub fn local_index(&self) -> Option<u32> {
        match self {
            Instr::LocalGet(index) | Instr::LocalSet(index) | Instr::LocalTee(index) => {
                Some(*index)
            }
            _ => None,
        }
    }

    /// Whether this instruction opens a block that a later `end` closes.
    pub fn opens_block(&self) -> bool {
        matches!(self, Instr::Block(_) | Instr::Loop(_) | Instr::If(_))
    }
}
