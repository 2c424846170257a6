//! JavaScript that replays recorded value-bridge calls.
//!
//! The snapshot bakes value table slots into memory, so before `go.run` the
//! embedding must rebuild the same table in the same order. The glue runs
//! with `this` bound to the `Go` instance.

use gobake_host::{ArgRef, HostCall};

/// Registers a value in `this._values` the way `storeValue` would, skipping
/// values that never get a slot of their own.
const PUT_REF: &str = "\
const putRef = (v) => {
  if (v === undefined || v === null || v === true || v === false || typeof v === 'number') return;
  if (!this._refs.has(v)) {
    const ref = this._values.length;
    this._values.push(v);
    this._refs.set(v, ref);
  }
};";

/// Render `calls` as a replay script.
pub fn glue_code(calls: &[HostCall]) -> String {
    let mut out = String::from(PUT_REF);
    for call in calls {
        out.push('\n');
        match call {
            HostCall::Get {
                value_index,
                property,
                ..
            } => {
                out.push_str(&format!(
                    "putRef(Reflect.get(this._values[{value_index}], {}));",
                    js_string(property)
                ));
            }
            HostCall::New {
                value_index, args, ..
            } => {
                let args: Vec<String> = args.iter().map(js_arg).collect();
                out.push_str(&format!(
                    "putRef(Reflect.construct(this._values[{value_index}], [{}]));",
                    args.join(", ")
                ));
            }
        }
    }
    out
}

fn js_string(s: &str) -> String {
    // A JSON string literal is a valid JavaScript string literal.
    serde_json::Value::String(s.to_string()).to_string()
}

fn js_arg(arg: &ArgRef) -> String {
    match arg {
        ArgRef::Slot(slot) => format!("this._values[{slot}]"),
        ArgRef::Number(n) if n.is_nan() => "NaN".to_string(),
        ArgRef::Number(n) if n.is_infinite() => {
            if *n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
        }
        ArgRef::Number(n) => format!("{n}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_gets_and_constructs_in_order() {
        let glue = glue_code(&[
            HostCall::Get {
                sp: 0,
                value_index: 5,
                property: "Array".into(),
                result_is_new: true,
            },
            HostCall::New {
                sp: 0,
                value_index: 8,
                args: vec![ArgRef::Number(1.5), ArgRef::Slot(6)],
                result_is_new: true,
            },
        ]);
        let lines: Vec<&str> = glue.lines().collect();
        assert!(lines[0].starts_with("const putRef"));
        assert_eq!(
            &lines[lines.len() - 2..],
            &[
                "putRef(Reflect.get(this._values[5], \"Array\"));",
                "putRef(Reflect.construct(this._values[8], [1.5, this._values[6]]));",
            ]
        );
    }

    #[test]
    fn property_names_are_escaped() {
        let glue = glue_code(&[HostCall::Get {
            sp: 0,
            value_index: 5,
            property: "it's \"odd\"".into(),
            result_is_new: false,
        }]);
        assert!(glue.ends_with(r#"this._values[5], "it's \"odd\""));"#));
    }

    #[test]
    fn empty_log_is_just_the_helper() {
        assert_eq!(glue_code(&[]), PUT_REF);
        assert_eq!(js_arg(&ArgRef::Number(f64::NEG_INFINITY)), "-Infinity");
        assert_eq!(js_arg(&ArgRef::Number(3.0)), "3");
    }
}
