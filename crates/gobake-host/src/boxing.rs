//! The 8-byte NaN-boxed value encoding shared with the Go runtime.
//!
//! A slot holding any float other than NaN is that number. Anything else is
//! boxed: the high word is [`NAN_HEAD`] ORed with a type flag and the low word
//! is a value table slot.

use gobake_interp::Memory;

use crate::error::{HostError, HostResult};
use crate::value::{slot, HostObject, HostValue, ValueTable};

/// High word of every boxed value.
pub const NAN_HEAD: u32 = 0x7FF8_0000;

const FLAG_STRING: u32 = 1;
const FLAG_OBJECT: u32 = 2;
const FLAG_FUNCTION: u32 = 3;

/// Encode `value` at `addr`, interning reference values. Returns whether a
/// new table slot was allocated.
pub fn store_value(
    memory: &mut Memory,
    addr: u64,
    value: &HostValue,
    table: &mut ValueTable,
) -> HostResult<bool> {
    let (flag, slot) = match value {
        HostValue::Number(n) if !n.is_nan() => {
            memory.write_f64(addr, *n)?;
            return Ok(false);
        }
        HostValue::Number(_) => (0, slot::NAN),
        HostValue::Undefined => (0, slot::UNDEFINED),
        HostValue::Null => (0, slot::NULL),
        HostValue::Bool(true) => (0, slot::TRUE),
        HostValue::Bool(false) => (0, slot::FALSE),
        HostValue::String(_) | HostValue::Object(_) | HostValue::Array(_) => {
            let (slot, is_new) = table.intern(value)?;
            let flag = match value {
                HostValue::String(_) => FLAG_STRING,
                HostValue::Object(obj) if matches!(obj.as_ref(), HostObject::Callable(_)) => {
                    FLAG_FUNCTION
                }
                _ => FLAG_OBJECT,
            };
            tracing::debug!(target: "gobake::host", slot, ?value, "storing value");
            memory.write_u32(addr + 4, NAN_HEAD | flag)?;
            memory.write_u32(addr, slot)?;
            return Ok(is_new);
        }
    };
    memory.write_u32(addr + 4, NAN_HEAD | flag)?;
    memory.write_u32(addr, slot)?;
    Ok(false)
}

/// Decode the value at `addr`. Boxed values also return their slot.
pub fn load_value(memory: &Memory, addr: u64, table: &ValueTable) -> HostResult<(HostValue, Option<u32>)> {
    let n = memory.read_f64(addr)?;
    if !n.is_nan() {
        return Ok((HostValue::Number(n), None));
    }
    let slot = memory.read_u32(addr)?;
    tracing::trace!(target: "gobake::host", slot, "loading value");
    Ok((table.get(slot)?.clone(), Some(slot)))
}

/// Decode a Go slice of boxed values: pointer at `addr`, length at `addr + 8`.
pub fn load_slice_of_values(
    memory: &Memory,
    addr: u64,
    table: &ValueTable,
) -> HostResult<Vec<(HostValue, Option<u32>)>> {
    let (ptr, len) = load_slice_header(memory, addr)?;
    (0..len)
        .map(|i| load_value(memory, ptr + i * 8, table))
        .collect()
}

/// Decode a Go string: pointer at `addr`, length at `addr + 8`.
pub fn load_string(memory: &Memory, addr: u64) -> HostResult<String> {
    let (ptr, len) = load_slice_header(memory, addr)?;
    let len = usize::try_from(len).map_err(|_| HostError::BadArgument(format!("string length {len}")))?;
    Ok(String::from_utf8(memory.read(ptr, len)?.to_vec())?)
}

fn load_slice_header(memory: &Memory, addr: u64) -> HostResult<(u64, u64)> {
    let ptr = memory.read_i64(addr)?;
    let len = memory.read_i64(addr + 8)?;
    let ptr = u64::try_from(ptr).map_err(|_| HostError::BadArgument(format!("pointer {ptr}")))?;
    let len = u64::try_from(len).map_err(|_| HostError::BadArgument(format!("length {len}")))?;
    Ok((ptr, len))
}
