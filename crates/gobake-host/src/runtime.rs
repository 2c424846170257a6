//! The `go` import namespace.
//!
//! Every import receives a single argument, the Go stack pointer `sp`; its
//! operands and results live at fixed offsets from `sp` in linear memory.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::io::Write;
use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use gobake_interp::{Imports, Memory, Value};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::boxing::{load_slice_of_values, load_string, load_value, store_value};
use crate::error::{HostError, HostResult};
use crate::globals::global_object;
use crate::value::{HostValue, ValueTable};

/// Namespace all runtime imports live under.
pub const IMPORT_MODULE: &str = "go";

/// Where [`layout_args`] starts writing argument strings.
pub const ARGS_OFFSET: u64 = 4096;

/// A value-bridge call observed during a run, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    /// `syscall/js.valueGet`: property `property` of slot `value_index`.
    Get {
        sp: u32,
        value_index: u32,
        property: String,
        result_is_new: bool,
    },
    /// `syscall/js.valueNew`: construct slot `value_index` with `args`.
    New {
        sp: u32,
        value_index: u32,
        args: Vec<ArgRef>,
        result_is_new: bool,
    },
}

impl HostCall {
    pub fn result_is_new(&self) -> bool {
        match self {
            HostCall::Get { result_is_new, .. } | HostCall::New { result_is_new, .. } => {
                *result_is_new
            }
        }
    }
}

/// A constructor argument: an inline number or a value table slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgRef {
    Number(f64),
    Slot(u32),
}

/// Emulated Go `js/wasm` host.
pub struct GoRuntime {
    values: ValueTable,
    calls: Vec<HostCall>,
    exit_code: Option<i32>,
    callback_pending: Rc<Cell<bool>>,
    stderr: Box<dyn Write>,
    started: Instant,
}

impl Default for GoRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl GoRuntime {
    /// A runtime writing the program's stderr to the process's stderr.
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stderr()))
    }

    /// A runtime writing the program's stderr to `stderr`.
    pub fn with_writer(stderr: Box<dyn Write>) -> Self {
        let callback_pending = Rc::new(Cell::new(false));
        Self {
            values: ValueTable::seeded(global_object(Rc::clone(&callback_pending))),
            calls: Vec::new(),
            exit_code: None,
            callback_pending,
            stderr,
            started: Instant::now(),
        }
    }

    pub fn values(&self) -> &ValueTable {
        &self.values
    }

    /// Value-bridge calls recorded so far.
    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<HostCall> {
        std::mem::take(&mut self.calls)
    }

    /// Exit code passed to `runtime.wasmExit`, if the program exited.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Whether the program resolved its callback promise.
    pub fn callback_pending(&self) -> bool {
        self.callback_pending.get()
    }

    fn dispatch(&mut self, field: &str, sp: u64, memory: &mut Memory) -> HostResult<()> {
        match field {
            "debug" => {
                tracing::debug!(target: "gobake::host", value = sp, "wasm debug");
                Ok(())
            }
            "runtime.wasmExit" => {
                let code = memory.read_i32(sp + 8)?;
                self.exit_code = Some(code);
                Ok(())
            }
            "runtime.wasmWrite" => self.wasm_write(sp, memory),
            "runtime.nanotime" => {
                let nanos = self.started.elapsed().as_nanos() as i64;
                Ok(memory.write_i64(sp + 8, nanos)?)
            }
            "runtime.walltime" => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                memory.write_i64(sp + 8, now.as_secs() as i64)?;
                Ok(memory.write_i32(sp + 16, now.subsec_nanos() as i32)?)
            }
            "runtime.scheduleCallback" => Err(HostError::Unimplemented("runtime.scheduleCallback")),
            "runtime.clearScheduledCallback" => {
                Err(HostError::Unimplemented("runtime.clearScheduledCallback"))
            }
            "runtime.getRandomData" => {
                let ptr = read_len(memory, sp + 8)?;
                let len = read_len(memory, sp + 16)?;
                let len = usize::try_from(len)
                    .map_err(|_| HostError::BadArgument(format!("length {len} out of range")))?;
                OsRng.fill_bytes(memory.read_mut(ptr, len)?);
                Ok(())
            }
            "syscall/js.stringVal" => Err(HostError::Unimplemented("syscall/js.stringVal")),
            "syscall/js.valueGet" => self.value_get(sp, memory),
            "syscall/js.valueSet" => Err(HostError::Unimplemented("syscall/js.valueSet")),
            "syscall/js.valueSetIndex" => Err(HostError::Unimplemented("syscall/js.valueSetIndex")),
            "syscall/js.valueCall" => Err(HostError::Unimplemented("syscall/js.valueCall")),
            "syscall/js.valueInvoke" => Err(HostError::Unimplemented("syscall/js.valueInvoke")),
            "syscall/js.valueNew" => self.value_new(sp, memory),
            "syscall/js.valueLength" => Err(HostError::Unimplemented("syscall/js.valueLength")),
            "syscall/js.valuePrepareString" => {
                Err(HostError::Unimplemented("syscall/js.valuePrepareString"))
            }
            "syscall/js.valueLoadString" => {
                Err(HostError::Unimplemented("syscall/js.valueLoadString"))
            }
            "syscall/js.valueInstanceOf" => {
                Err(HostError::Unimplemented("syscall/js.valueInstanceOf"))
            }
            other => Err(HostError::UnknownImport {
                module: IMPORT_MODULE.to_string(),
                field: other.to_string(),
            }),
        }
    }

    fn wasm_write(&mut self, sp: u64, memory: &Memory) -> HostResult<()> {
        let fd = memory.read_i64(sp + 8)?;
        let ptr = read_len(memory, sp + 16)?;
        let len = memory.read_i32(sp + 24)? as u32;
        if fd != 2 {
            return Err(HostError::UnsupportedStream(fd));
        }
        self.stderr.write_all(memory.read(ptr, len as usize)?)?;
        Ok(())
    }

    fn value_get(&mut self, sp: u64, memory: &mut Memory) -> HostResult<()> {
        let (target, value_index) = load_value(memory, sp + 8, &self.values)?;
        let value_index = value_index.ok_or_else(|| not_an_object(&target))?;
        if !target.is_plain_object() {
            return Err(HostError::NotAnObject(value_index));
        }
        let property = load_string(memory, sp + 16)?;
        let result = target
            .get(&property)
            .ok_or_else(|| HostError::MissingProperty(property.clone()))?;
        let result_is_new = store_value(memory, sp + 32, &result, &mut self.values)?;
        tracing::debug!(target: "gobake::host", value_index, %property, result_is_new, "valueGet");
        self.calls.push(HostCall::Get {
            sp: sp as u32,
            value_index,
            property,
            result_is_new,
        });
        Ok(())
    }

    fn value_new(&mut self, sp: u64, memory: &mut Memory) -> HostResult<()> {
        let (target, value_index) = load_value(memory, sp + 8, &self.values)?;
        let value_index = value_index.ok_or_else(|| not_an_object(&target))?;
        let constructor = target
            .as_callable()
            .ok_or_else(|| HostError::NotCallable(format!("value #{value_index}")))?
            .clone();
        let loaded = load_slice_of_values(memory, sp + 16, &self.values)?;
        let args = loaded
            .iter()
            .map(|(value, slot)| match (value, slot) {
                (_, Some(slot)) => Ok(ArgRef::Slot(*slot)),
                (HostValue::Number(n), None) => Ok(ArgRef::Number(*n)),
                (other, None) => Err(HostError::BadArgument(format!("{other:?}"))),
            })
            .collect::<HostResult<Vec<_>>>()?;
        let values: Vec<HostValue> = loaded.into_iter().map(|(value, _)| value).collect();
        let result = constructor.call(&values)?;
        let result_is_new = store_value(memory, sp + 40, &result, &mut self.values)?;
        memory.write_u8(sp + 48, 1)?;
        tracing::debug!(target: "gobake::host", value_index, ?args, result_is_new, "valueNew");
        self.calls.push(HostCall::New {
            sp: sp as u32,
            value_index,
            args,
            result_is_new,
        });
        Ok(())
    }
}

impl Imports for GoRuntime {
    type Error = HostError;

    fn call(
        &mut self,
        module: &str,
        field: &str,
        args: &[Value],
        memory: &mut Memory,
    ) -> HostResult<Vec<Value>> {
        if module != IMPORT_MODULE {
            return Err(HostError::UnknownImport {
                module: module.to_string(),
                field: field.to_string(),
            });
        }
        let sp = match args {
            [Value::I32(sp)] => u64::from(*sp as u32),
            other => {
                return Err(HostError::BadArgument(format!(
                    "{module}.{field} expects a single i32, got {other:?}"
                )))
            }
        };
        tracing::trace!(target: "gobake::host", %field, sp, "invoking");
        self.dispatch(field, sp, memory)?;
        Ok(Vec::new())
    }
}

fn not_an_object(value: &HostValue) -> HostError {
    HostError::BadArgument(format!("expected a boxed value, got {value:?}"))
}

fn read_len(memory: &Memory, addr: u64) -> HostResult<u64> {
    let value = memory.read_i64(addr)?;
    u64::try_from(value).map_err(|_| HostError::BadArgument(format!("negative size {value}")))
}

/// Lay out `args` then `env` (as `key=value`) from [`ARGS_OFFSET`]: each
/// string NUL-terminated and padded to a multiple of 8, then an array of
/// 8-byte pointers to them. Returns `(argc, argv)` for the `run` export.
pub fn layout_args(
    memory: &mut Memory,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> HostResult<(i32, i32)> {
    let mut offset = ARGS_OFFSET;
    let mut pointers = Vec::with_capacity(args.len() + env.len());
    let strings = args
        .iter()
        .cloned()
        .chain(env.iter().map(|(key, value)| format!("{key}={value}")));
    for string in strings {
        pointers.push(offset);
        let mut bytes = string.into_bytes();
        bytes.push(0);
        memory.write(offset, &bytes)?;
        offset += (bytes.len() + (8 - bytes.len() % 8)) as u64;
    }
    let argv = offset;
    for pointer in pointers {
        memory.write_i64(offset, pointer as i64)?;
        offset += 8;
    }
    Ok((args.len() as i32, argv as i32))
}
