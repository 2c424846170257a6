//! Runtime values.

use gobake_types::{Instr, ValType};

use crate::error::{ExecError, ExecResult};

/// A value on the operand stack, in a local or in a global.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    /// The zero value of `ty`, used for fresh locals.
    pub fn default_for(ty: ValType) -> Self {
        match ty {
            ValType::I32 => Value::I32(0),
            ValType::I64 => Value::I64(0),
            ValType::F32 => Value::F32(0.0),
            ValType::F64 => Value::F64(0.0),
        }
    }

    pub fn ty(&self) -> ValType {
        match self {
            Value::I32(_) => ValType::I32,
            Value::I64(_) => ValType::I64,
            Value::F32(_) => ValType::F32,
            Value::F64(_) => ValType::F64,
        }
    }

    pub fn as_i32(&self) -> ExecResult<i32> {
        match self {
            Value::I32(v) => Ok(*v),
            other => Err(mismatch(ValType::I32, other)),
        }
    }

    pub fn as_i64(&self) -> ExecResult<i64> {
        match self {
            Value::I64(v) => Ok(*v),
            other => Err(mismatch(ValType::I64, other)),
        }
    }

    pub fn as_f32(&self) -> ExecResult<f32> {
        match self {
            Value::F32(v) => Ok(*v),
            other => Err(mismatch(ValType::F32, other)),
        }
    }

    pub fn as_f64(&self) -> ExecResult<f64> {
        match self {
            Value::F64(v) => Ok(*v),
            other => Err(mismatch(ValType::F64, other)),
        }
    }

    /// The constant instruction that produces this value, bit for bit.
    pub fn to_const(&self) -> Instr {
        match self {
            Value::I32(v) => Instr::I32Const(*v),
            Value::I64(v) => Instr::I64Const(*v),
            Value::F32(v) => Instr::F32Const(v.to_bits()),
            Value::F64(v) => Instr::F64Const(v.to_bits()),
        }
    }
}

fn mismatch(expected: ValType, found: &Value) -> ExecError {
    ExecError::Malformed(format!("expected {expected:?}, found {found:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_const_preserves_float_bits() {
        let nan = f64::from_bits(0x7FF8_0000_0000_0001);
        assert_eq!(
            Value::F64(nan).to_const(),
            Instr::F64Const(0x7FF8_0000_0000_0001)
        );
        assert_eq!(Value::F32(-0.0).to_const(), Instr::F32Const(0x8000_0000));
    }

    #[test]
    fn accessors_reject_the_wrong_type() {
        assert_eq!(Value::I32(4).as_i32().ok(), Some(4));
        assert!(matches!(
            Value::I64(4).as_i32(),
            Err(ExecError::Malformed(_))
        ));
    }
}
