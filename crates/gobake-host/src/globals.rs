//! The global object a Go `js/wasm` program finds in slot 5.
//!
//! Only what the runtime touches during startup is functional: the `Array`
//! constructor without arguments and the `Go` callback helpers. Everything
//! else is present by name and fails when used.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::{HostError, HostResult};
use crate::value::{Callable, HostValue};

const TYPED_ARRAYS: [&str; 8] = [
    "Int8Array",
    "Int16Array",
    "Int32Array",
    "Uint8Array",
    "Uint16Array",
    "Uint32Array",
    "Float32Array",
    "Float64Array",
];

const FS_FLAGS: [&str; 6] = ["O_WRONLY", "O_RDWR", "O_CREAT", "O_TRUNC", "O_APPEND", "O_EXCL"];

/// Build the global object. `callback_pending` is raised whenever the
/// program resolves its callback promise.
pub fn global_object(callback_pending: Rc<Cell<bool>>) -> HostValue {
    let mut props: Vec<(&str, HostValue)> = vec![
        ("Array", HostValue::callable(Callable::new("Array", array_constructor))),
        ("Object", HostValue::callable(Callable::unimplemented("Object"))),
        ("Go", go_object(callback_pending)),
    ];
    props.extend(
        TYPED_ARRAYS
            .iter()
            .map(|name| (*name, HostValue::callable(Callable::unimplemented(*name)))),
    );
    props.push(("process", HostValue::object::<String>([])));
    props.push(("fs", fs_object()));
    HostValue::object(props)
}

fn array_constructor(args: &[HostValue]) -> HostResult<HostValue> {
    if !args.is_empty() {
        return Err(HostError::Unimplemented("Array with arguments"));
    }
    Ok(HostValue::array(Vec::new()))
}

fn go_object(callback_pending: Rc<Cell<bool>>) -> HostValue {
    HostValue::object([
        (
            "_makeCallbackHelper",
            HostValue::callable(Callable::new("_makeCallbackHelper", make_callback_helper)),
        ),
        (
            "_makeEventCallbackHelper",
            HostValue::callable(Callable::unimplemented("_makeEventCallbackHelper")),
        ),
        (
            "_resolveCallbackPromise",
            HostValue::callable(Callable::new("_resolveCallbackPromise", move |_| {
                callback_pending.set(true);
                Ok(HostValue::Undefined)
            })),
        ),
    ])
}

/// `_makeCallbackHelper(id, pendingCallbacks, go)`: returns a function that
/// queues `{id, args}` on `pendingCallbacks` and resolves `go`'s callback
/// promise.
fn make_callback_helper(args: &[HostValue]) -> HostResult<HostValue> {
    let [id, pending, go] = args else {
        return Err(HostError::BadArgument(format!(
            "_makeCallbackHelper takes 3 arguments, got {}",
            args.len()
        )));
    };
    let HostValue::Array(pending) = pending.clone() else {
        return Err(HostError::BadArgument("pending callbacks must be an array".into()));
    };
    if !go.is_plain_object() {
        return Err(HostError::BadArgument("go must be an object".into()));
    }
    let id = id.clone();
    let go = go.clone();
    Ok(HostValue::callable(Callable::new("callback", move |args| {
        pending.borrow_mut().push(HostValue::object([
            ("id", id.clone()),
            ("args", HostValue::array(args.to_vec())),
        ]));
        let resolve = go
            .get("_resolveCallbackPromise")
            .ok_or_else(|| HostError::MissingProperty("_resolveCallbackPromise".into()))?;
        resolve
            .as_callable()
            .ok_or_else(|| HostError::NotCallable("_resolveCallbackPromise".into()))?
            .call(&[])
    })))
}

fn fs_object() -> HostValue {
    let constants = HostValue::object(FS_FLAGS.iter().map(|flag| (*flag, HostValue::Number(-1.0))));
    HostValue::object([
        ("constants", constants),
        ("writeSync", HostValue::callable(Callable::unimplemented("fs.writeSync"))),
        ("openSync", HostValue::callable(Callable::unimplemented("fs.openSync"))),
    ])
}
