//! Numeric instructions: constants, comparisons, arithmetic and conversions.
//!
//! Each operation pops its operands from the operand stack and pushes its
//! result. Integer arithmetic wraps; float `min`/`max`/`nearest` and the
//! trapping float-to-int conversions follow WebAssembly semantics rather than
//! Rust's.

use gobake_types::Instr;

use crate::error::{ExecError, ExecResult, Trap};
use crate::value::Value;

// ── Stack access ─────────────────────────────────────────────────────────────

pub(crate) fn pop(stack: &mut Vec<Value>) -> ExecResult<Value> {
    stack
        .pop()
        .ok_or_else(|| ExecError::Malformed("operand stack underflow".into()))
}

pub(crate) fn pop_i32(stack: &mut Vec<Value>) -> ExecResult<i32> {
    pop(stack)?.as_i32()
}

pub(crate) fn pop_i64(stack: &mut Vec<Value>) -> ExecResult<i64> {
    pop(stack)?.as_i64()
}

fn pop_f32(stack: &mut Vec<Value>) -> ExecResult<f32> {
    pop(stack)?.as_f32()
}

fn pop_f64(stack: &mut Vec<Value>) -> ExecResult<f64> {
    pop(stack)?.as_f64()
}

fn i32_unop(stack: &mut Vec<Value>, op: impl Fn(i32) -> Value) -> ExecResult<()> {
    let a = pop_i32(stack)?;
    stack.push(op(a));
    Ok(())
}

fn i32_binop(stack: &mut Vec<Value>, op: impl Fn(i32, i32) -> ExecResult<Value>) -> ExecResult<()> {
    let b = pop_i32(stack)?;
    let a = pop_i32(stack)?;
    stack.push(op(a, b)?);
    Ok(())
}

fn i64_unop(stack: &mut Vec<Value>, op: impl Fn(i64) -> Value) -> ExecResult<()> {
    let a = pop_i64(stack)?;
    stack.push(op(a));
    Ok(())
}

fn i64_binop(stack: &mut Vec<Value>, op: impl Fn(i64, i64) -> ExecResult<Value>) -> ExecResult<()> {
    let b = pop_i64(stack)?;
    let a = pop_i64(stack)?;
    stack.push(op(a, b)?);
    Ok(())
}

fn f32_unop(stack: &mut Vec<Value>, op: impl Fn(f32) -> ExecResult<Value>) -> ExecResult<()> {
    let a = pop_f32(stack)?;
    stack.push(op(a)?);
    Ok(())
}

fn f32_binop(stack: &mut Vec<Value>, op: impl Fn(f32, f32) -> Value) -> ExecResult<()> {
    let b = pop_f32(stack)?;
    let a = pop_f32(stack)?;
    stack.push(op(a, b));
    Ok(())
}

fn f64_unop(stack: &mut Vec<Value>, op: impl Fn(f64) -> ExecResult<Value>) -> ExecResult<()> {
    let a = pop_f64(stack)?;
    stack.push(op(a)?);
    Ok(())
}

fn f64_binop(stack: &mut Vec<Value>, op: impl Fn(f64, f64) -> Value) -> ExecResult<()> {
    let b = pop_f64(stack)?;
    let a = pop_f64(stack)?;
    stack.push(op(a, b));
    Ok(())
}

fn bool_value(b: bool) -> Value {
    Value::I32(b as i32)
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// Execute `instr` if it is a numeric instruction. Returns `false` (touching
/// nothing) for anything else.
pub(crate) fn apply(instr: &Instr, stack: &mut Vec<Value>) -> ExecResult<bool> {
    use Instr::*;
    use Value::{F32 as VF32, F64 as VF64, I32 as VI32, I64 as VI64};

    match instr {
        I32Const(v) => stack.push(VI32(*v)),
        I64Const(v) => stack.push(VI64(*v)),
        F32Const(bits) => stack.push(VF32(f32::from_bits(*bits))),
        F64Const(bits) => stack.push(VF64(f64::from_bits(*bits))),

        // i32 comparisons
        I32Eqz => i32_unop(stack, |a| bool_value(a == 0))?,
        I32Eq => i32_binop(stack, |a, b| Ok(bool_value(a == b)))?,
        I32Ne => i32_binop(stack, |a, b| Ok(bool_value(a != b)))?,
        I32LtS => i32_binop(stack, |a, b| Ok(bool_value(a < b)))?,
        I32LtU => i32_binop(stack, |a, b| Ok(bool_value((a as u32) < (b as u32))))?,
        I32GtS => i32_binop(stack, |a, b| Ok(bool_value(a > b)))?,
        I32GtU => i32_binop(stack, |a, b| Ok(bool_value((a as u32) > (b as u32))))?,
        I32LeS => i32_binop(stack, |a, b| Ok(bool_value(a <= b)))?,
        I32LeU => i32_binop(stack, |a, b| Ok(bool_value((a as u32) <= (b as u32))))?,
        I32GeS => i32_binop(stack, |a, b| Ok(bool_value(a >= b)))?,
        I32GeU => i32_binop(stack, |a, b| Ok(bool_value((a as u32) >= (b as u32))))?,

        // i64 comparisons
        I64Eqz => {
            let a = pop_i64(stack)?;
            stack.push(bool_value(a == 0));
        }
        I64Eq => i64_binop(stack, |a, b| Ok(bool_value(a == b)))?,
        I64Ne => i64_binop(stack, |a, b| Ok(bool_value(a != b)))?,
        I64LtS => i64_binop(stack, |a, b| Ok(bool_value(a < b)))?,
        I64LtU => i64_binop(stack, |a, b| Ok(bool_value((a as u64) < (b as u64))))?,
        I64GtS => i64_binop(stack, |a, b| Ok(bool_value(a > b)))?,
        I64GtU => i64_binop(stack, |a, b| Ok(bool_value((a as u64) > (b as u64))))?,
        I64LeS => i64_binop(stack, |a, b| Ok(bool_value(a <= b)))?,
        I64LeU => i64_binop(stack, |a, b| Ok(bool_value((a as u64) <= (b as u64))))?,
        I64GeS => i64_binop(stack, |a, b| Ok(bool_value(a >= b)))?,
        I64GeU => i64_binop(stack, |a, b| Ok(bool_value((a as u64) >= (b as u64))))?,

        // float comparisons
        F32Eq => f32_binop(stack, |a, b| bool_value(a == b))?,
        F32Ne => f32_binop(stack, |a, b| bool_value(a != b))?,
        F32Lt => f32_binop(stack, |a, b| bool_value(a < b))?,
        F32Gt => f32_binop(stack, |a, b| bool_value(a > b))?,
        F32Le => f32_binop(stack, |a, b| bool_value(a <= b))?,
        F32Ge => f32_binop(stack, |a, b| bool_value(a >= b))?,
        F64Eq => f64_binop(stack, |a, b| bool_value(a == b))?,
        F64Ne => f64_binop(stack, |a, b| bool_value(a != b))?,
        F64Lt => f64_binop(stack, |a, b| bool_value(a < b))?,
        F64Gt => f64_binop(stack, |a, b| bool_value(a > b))?,
        F64Le => f64_binop(stack, |a, b| bool_value(a <= b))?,
        F64Ge => f64_binop(stack, |a, b| bool_value(a >= b))?,

        // i32 arithmetic
        I32Clz => i32_unop(stack, |a| VI32(a.leading_zeros() as i32))?,
        I32Ctz => i32_unop(stack, |a| VI32(a.trailing_zeros() as i32))?,
        I32Popcnt => i32_unop(stack, |a| VI32(a.count_ones() as i32))?,
        I32Add => i32_binop(stack, |a, b| Ok(VI32(a.wrapping_add(b))))?,
        I32Sub => i32_binop(stack, |a, b| Ok(VI32(a.wrapping_sub(b))))?,
        I32Mul => i32_binop(stack, |a, b| Ok(VI32(a.wrapping_mul(b))))?,
        I32DivS => i32_binop(stack, |a, b| {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero.into());
            }
            a.checked_div(b)
                .map(VI32)
                .ok_or_else(|| Trap::IntegerOverflow.into())
        })?,
        I32DivU => i32_binop(stack, |a, b| {
            (a as u32)
                .checked_div(b as u32)
                .map(|q| VI32(q as i32))
                .ok_or_else(|| Trap::IntegerDivideByZero.into())
        })?,
        I32RemS => i32_binop(stack, |a, b| {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero.into());
            }
            Ok(VI32(a.wrapping_rem(b)))
        })?,
        I32RemU => i32_binop(stack, |a, b| {
            (a as u32)
                .checked_rem(b as u32)
                .map(|r| VI32(r as i32))
                .ok_or_else(|| Trap::IntegerDivideByZero.into())
        })?,
        I32And => i32_binop(stack, |a, b| Ok(VI32(a & b)))?,
        I32Or => i32_binop(stack, |a, b| Ok(VI32(a | b)))?,
        I32Xor => i32_binop(stack, |a, b| Ok(VI32(a ^ b)))?,
        I32Shl => i32_binop(stack, |a, b| Ok(VI32(a.wrapping_shl(b as u32))))?,
        I32ShrS => i32_binop(stack, |a, b| Ok(VI32(a.wrapping_shr(b as u32))))?,
        I32ShrU => i32_binop(stack, |a, b| {
            Ok(VI32((a as u32).wrapping_shr(b as u32) as i32))
        })?,
        I32Rotl => i32_binop(stack, |a, b| Ok(VI32(a.rotate_left(b as u32))))?,
        I32Rotr => i32_binop(stack, |a, b| Ok(VI32(a.rotate_right(b as u32))))?,

        // i64 arithmetic
        I64Clz => i64_unop(stack, |a| VI64(a.leading_zeros() as i64))?,
        I64Ctz => i64_unop(stack, |a| VI64(a.trailing_zeros() as i64))?,
        I64Popcnt => i64_unop(stack, |a| VI64(a.count_ones() as i64))?,
        I64Add => i64_binop(stack, |a, b| Ok(VI64(a.wrapping_add(b))))?,
        I64Sub => i64_binop(stack, |a, b| Ok(VI64(a.wrapping_sub(b))))?,
        I64Mul => i64_binop(stack, |a, b| Ok(VI64(a.wrapping_mul(b))))?,
        I64DivS => i64_binop(stack, |a, b| {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero.into());
            }
            a.checked_div(b)
                .map(VI64)
                .ok_or_else(|| Trap::IntegerOverflow.into())
        })?,
        I64DivU => i64_binop(stack, |a, b| {
            (a as u64)
                .checked_div(b as u64)
                .map(|q| VI64(q as i64))
                .ok_or_else(|| Trap::IntegerDivideByZero.into())
        })?,
        I64RemS => i64_binop(stack, |a, b| {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero.into());
            }
            Ok(VI64(a.wrapping_rem(b)))
        })?,
        I64RemU => i64_binop(stack, |a, b| {
            (a as u64)
                .checked_rem(b as u64)
                .map(|r| VI64(r as i64))
                .ok_or_else(|| Trap::IntegerDivideByZero.into())
        })?,
        I64And => i64_binop(stack, |a, b| Ok(VI64(a & b)))?,
        I64Or => i64_binop(stack, |a, b| Ok(VI64(a | b)))?,
        I64Xor => i64_binop(stack, |a, b| Ok(VI64(a ^ b)))?,
        I64Shl => i64_binop(stack, |a, b| Ok(VI64(a.wrapping_shl(b as u32))))?,
        I64ShrS => i64_binop(stack, |a, b| Ok(VI64(a.wrapping_shr(b as u32))))?,
        I64ShrU => i64_binop(stack, |a, b| {
            Ok(VI64((a as u64).wrapping_shr(b as u32) as i64))
        })?,
        I64Rotl => i64_binop(stack, |a, b| Ok(VI64(a.rotate_left((b & 63) as u32))))?,
        I64Rotr => i64_binop(stack, |a, b| Ok(VI64(a.rotate_right((b & 63) as u32))))?,

        // f32 arithmetic
        F32Abs => f32_unop(stack, |a| Ok(VF32(a.abs())))?,
        F32Neg => f32_unop(stack, |a| Ok(VF32(-a)))?,
        F32Ceil => f32_unop(stack, |a| Ok(VF32(a.ceil())))?,
        F32Floor => f32_unop(stack, |a| Ok(VF32(a.floor())))?,
        F32Trunc => f32_unop(stack, |a| Ok(VF32(a.trunc())))?,
        F32Nearest => f32_unop(stack, |a| Ok(VF32(a.round_ties_even())))?,
        F32Sqrt => f32_unop(stack, |a| Ok(VF32(a.sqrt())))?,
        F32Add => f32_binop(stack, |a, b| VF32(a + b))?,
        F32Sub => f32_binop(stack, |a, b| VF32(a - b))?,
        F32Mul => f32_binop(stack, |a, b| VF32(a * b))?,
        F32Div => f32_binop(stack, |a, b| VF32(a / b))?,
        F32Min => f32_binop(stack, |a, b| VF32(wasm_min_f32(a, b)))?,
        F32Max => f32_binop(stack, |a, b| VF32(wasm_max_f32(a, b)))?,
        F32Copysign => f32_binop(stack, |a, b| VF32(a.copysign(b)))?,

        // f64 arithmetic
        F64Abs => f64_unop(stack, |a| Ok(VF64(a.abs())))?,
        F64Neg => f64_unop(stack, |a| Ok(VF64(-a)))?,
        F64Ceil => f64_unop(stack, |a| Ok(VF64(a.ceil())))?,
        F64Floor => f64_unop(stack, |a| Ok(VF64(a.floor())))?,
        F64Trunc => f64_unop(stack, |a| Ok(VF64(a.trunc())))?,
        F64Nearest => f64_unop(stack, |a| Ok(VF64(a.round_ties_even())))?,
        F64Sqrt => f64_unop(stack, |a| Ok(VF64(a.sqrt())))?,
        F64Add => f64_binop(stack, |a, b| VF64(a + b))?,
        F64Sub => f64_binop(stack, |a, b| VF64(a - b))?,
        F64Mul => f64_binop(stack, |a, b| VF64(a * b))?,
        F64Div => f64_binop(stack, |a, b| VF64(a / b))?,
        F64Min => f64_binop(stack, |a, b| VF64(wasm_min_f64(a, b)))?,
        F64Max => f64_binop(stack, |a, b| VF64(wasm_max_f64(a, b)))?,
        F64Copysign => f64_binop(stack, |a, b| VF64(a.copysign(b)))?,

        // integer width changes
        I32WrapI64 => i64_unop(stack, |a| VI32(a as i32))?,
        I64ExtendI32S => i32_unop(stack, |a| VI64(a as i64))?,
        I64ExtendI32U => i32_unop(stack, |a| VI64(a as u32 as i64))?,
        I32Extend8S => i32_unop(stack, |a| VI32(a as i8 as i32))?,
        I32Extend16S => i32_unop(stack, |a| VI32(a as i16 as i32))?,
        I64Extend8S => i64_unop(stack, |a| VI64(a as i8 as i64))?,
        I64Extend16S => i64_unop(stack, |a| VI64(a as i16 as i64))?,
        I64Extend32S => i64_unop(stack, |a| VI64(a as i32 as i64))?,

        // trapping float-to-int
        I32TruncF32S => f32_unop(stack, |a| Ok(VI32(trunc_signed(a as f64, 32)? as i32)))?,
        I32TruncF32U => f32_unop(stack, |a| Ok(VI32(trunc_unsigned(a as f64, 32)? as u32 as i32)))?,
        I32TruncF64S => f64_unop(stack, |a| Ok(VI32(trunc_signed(a, 32)? as i32)))?,
        I32TruncF64U => f64_unop(stack, |a| Ok(VI32(trunc_unsigned(a, 32)? as u32 as i32)))?,
        I64TruncF32S => f32_unop(stack, |a| Ok(VI64(trunc_signed(a as f64, 64)? as i64)))?,
        I64TruncF32U => f32_unop(stack, |a| Ok(VI64(trunc_unsigned(a as f64, 64)? as u64 as i64)))?,
        I64TruncF64S => f64_unop(stack, |a| Ok(VI64(trunc_signed(a, 64)? as i64)))?,
        I64TruncF64U => f64_unop(stack, |a| Ok(VI64(trunc_unsigned(a, 64)? as u64 as i64)))?,

        // saturating float-to-int (`as` already saturates and maps NaN to 0)
        I32TruncSatF32S => f32_unop(stack, |a| Ok(VI32(a as i32)))?,
        I32TruncSatF32U => f32_unop(stack, |a| Ok(VI32(a as u32 as i32)))?,
        I32TruncSatF64S => f64_unop(stack, |a| Ok(VI32(a as i32)))?,
        I32TruncSatF64U => f64_unop(stack, |a| Ok(VI32(a as u32 as i32)))?,
        I64TruncSatF32S => f32_unop(stack, |a| Ok(VI64(a as i64)))?,
        I64TruncSatF32U => f32_unop(stack, |a| Ok(VI64(a as u64 as i64)))?,
        I64TruncSatF64S => f64_unop(stack, |a| Ok(VI64(a as i64)))?,
        I64TruncSatF64U => f64_unop(stack, |a| Ok(VI64(a as u64 as i64)))?,

        // int-to-float and float width changes
        F32ConvertI32S => i32_unop(stack, |a| VF32(a as f32))?,
        F32ConvertI32U => i32_unop(stack, |a| VF32(a as u32 as f32))?,
        F32ConvertI64S => i64_unop(stack, |a| VF32(a as f32))?,
        F32ConvertI64U => i64_unop(stack, |a| VF32(a as u64 as f32))?,
        F64ConvertI32S => i32_unop(stack, |a| VF64(a as f64))?,
        F64ConvertI32U => i32_unop(stack, |a| VF64(a as u32 as f64))?,
        F64ConvertI64S => i64_unop(stack, |a| VF64(a as f64))?,
        F64ConvertI64U => i64_unop(stack, |a| VF64(a as u64 as f64))?,
        F32DemoteF64 => f64_unop(stack, |a| Ok(VF32(a as f32)))?,
        F64PromoteF32 => f32_unop(stack, |a| Ok(VF64(a as f64)))?,

        // reinterpretations
        I32ReinterpretF32 => f32_unop(stack, |a| Ok(VI32(a.to_bits() as i32)))?,
        I64ReinterpretF64 => f64_unop(stack, |a| Ok(VI64(a.to_bits() as i64)))?,
        F32ReinterpretI32 => i32_unop(stack, |a| VF32(f32::from_bits(a as u32)))?,
        F64ReinterpretI64 => i64_unop(stack, |a| VF64(f64::from_bits(a as u64)))?,

        _ => return Ok(false),
    }
    Ok(true)
}

// ── Float helpers ────────────────────────────────────────────────────────────

fn wasm_min_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == 0.0 && b == 0.0 {
        if a.is_sign_negative() { a } else { b }
    } else {
        a.min(b)
    }
}

fn wasm_max_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == 0.0 && b == 0.0 {
        if a.is_sign_positive() { a } else { b }
    } else {
        a.max(b)
    }
}

fn wasm_min_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == 0.0 && b == 0.0 {
        if a.is_sign_negative() { a } else { b }
    } else {
        a.min(b)
    }
}

fn wasm_max_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == 0.0 && b == 0.0 {
        if a.is_sign_positive() { a } else { b }
    } else {
        a.max(b)
    }
}

/// Truncate toward zero, trapping when the result does not fit a signed
/// integer of `bits` width.
fn trunc_signed(x: f64, bits: u32) -> ExecResult<f64> {
    if x.is_nan() {
        return Err(Trap::InvalidConversion.into());
    }
    let t = x.trunc();
    let limit = 2f64.powi(bits as i32 - 1);
    if t < -limit || t >= limit {
        return Err(Trap::IntegerOverflow.into());
    }
    Ok(t)
}

/// Unsigned counterpart of [`trunc_signed`].
fn trunc_unsigned(x: f64, bits: u32) -> ExecResult<f64> {
    if x.is_nan() {
        return Err(Trap::InvalidConversion.into());
    }
    let t = x.trunc();
    if t <= -1.0 || t >= 2f64.powi(bits as i32) {
        return Err(Trap::IntegerOverflow.into());
    }
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(instrs: &[Instr]) -> ExecResult<Vec<Value>> {
        let mut stack = Vec::new();
        for instr in instrs {
            assert!(apply(instr, &mut stack)?, "{instr:?} is numeric");
        }
        Ok(stack)
    }

    #[test]
    fn integer_arithmetic_wraps() {
        let stack = run(&[Instr::I32Const(i32::MAX), Instr::I32Const(1), Instr::I32Add]).unwrap();
        assert_eq!(stack, vec![Value::I32(i32::MIN)]);
        let stack = run(&[Instr::I64Const(1), Instr::I64Const(65), Instr::I64Shl]).unwrap();
        assert_eq!(stack, vec![Value::I64(2)]);
    }

    #[test]
    fn division_traps() {
        let err = run(&[Instr::I32Const(1), Instr::I32Const(0), Instr::I32DivU]).unwrap_err();
        assert!(matches!(err, ExecError::Trap(Trap::IntegerDivideByZero)));
        let err = run(&[Instr::I32Const(i32::MIN), Instr::I32Const(-1), Instr::I32DivS]).unwrap_err();
        assert!(matches!(err, ExecError::Trap(Trap::IntegerOverflow)));
        let stack = run(&[Instr::I32Const(i32::MIN), Instr::I32Const(-1), Instr::I32RemS]).unwrap();
        assert_eq!(stack, vec![Value::I32(0)]);
    }

    #[test]
    fn unsigned_comparisons_reinterpret_bits() {
        let stack = run(&[Instr::I32Const(-1), Instr::I32Const(1), Instr::I32GtU]).unwrap();
        assert_eq!(stack, vec![Value::I32(1)]);
    }

    #[test]
    fn float_min_max_and_nearest() {
        let stack = run(&[Instr::f64_const(0.0), Instr::f64_const(-0.0), Instr::F64Min]).unwrap();
        assert!(matches!(stack[0], Value::F64(v) if v == 0.0 && v.is_sign_negative()));
        let stack = run(&[Instr::f32_const(f32::NAN), Instr::f32_const(1.0), Instr::F32Max]).unwrap();
        assert!(matches!(stack[0], Value::F32(v) if v.is_nan()));
        let stack = run(&[Instr::f64_const(2.5), Instr::F64Nearest]).unwrap();
        assert_eq!(stack, vec![Value::F64(2.0)]);
    }

    #[test]
    fn trapping_and_saturating_truncation() {
        let err = run(&[Instr::f64_const(f64::NAN), Instr::I32TruncF64S]).unwrap_err();
        assert!(matches!(err, ExecError::Trap(Trap::InvalidConversion)));
        let err = run(&[Instr::f64_const(2147483648.0), Instr::I32TruncF64S]).unwrap_err();
        assert!(matches!(err, ExecError::Trap(Trap::IntegerOverflow)));
        let stack = run(&[Instr::f64_const(-0.9), Instr::I32TruncF64U]).unwrap();
        assert_eq!(stack, vec![Value::I32(0)]);
        let stack = run(&[Instr::f64_const(1e20), Instr::I32TruncSatF64S]).unwrap();
        assert_eq!(stack, vec![Value::I32(i32::MAX)]);
    }

    #[test]
    fn non_numeric_instructions_are_left_alone() {
        let mut stack = vec![Value::I32(1)];
        assert!(!apply(&Instr::Drop, &mut stack).unwrap());
        assert_eq!(stack.len(), 1);
    }
}
