//! Function-level rewrites applied after the snapshot.

use std::collections::BTreeSet;

use gobake_host::HostCall;
use gobake_types::{Func, FuncType, Instr, MemArg, Module, ValType};

/// Name given to the folded call preamble.
pub const PRE_CALL_FUNC: &str = "_preCall";

/// Length of the call preamble.
const PRE_CALL_LEN: usize = 9;
/// Position of the varying `i64.const` within the preamble.
const PRE_CALL_CONST_AT: usize = 5;

/// The preamble with `slot` in the varying position: push a 64-bit value on
/// the Go stack (global 2) and clear the resume global.
fn pre_call_body(slot: Instr) -> Vec<Instr> {
    vec![
        Instr::GlobalGet(2),
        Instr::I32Const(8),
        Instr::I32Sub,
        Instr::GlobalSet(2),
        Instr::GlobalGet(2),
        slot,
        Instr::I64Store(MemArg::new(3, 0)),
        Instr::I32Const(0),
        Instr::GlobalSet(1),
    ]
}

/// Replace the bodies of initializers that already ran with a body returning
/// the zero of their result type.
pub fn neuter_initializers(module: &mut Module, invoked: &BTreeSet<u32>) {
    let imported = module.import_func_count();
    let types = &module.types;
    for (local, func) in module.funcs.iter_mut().enumerate() {
        if !invoked.contains(&(imported + local as u32)) {
            continue;
        }
        let results = types
            .get(func.type_index as usize)
            .map(|ty| ty.results.as_slice())
            .unwrap_or_default();
        func.body = results.iter().map(|ty| Instr::zero(*ty)).collect();
    }
}

/// Compile recorded host calls into the module. Nothing is inlined yet: the
/// calls are replayed by the glue instead.
pub fn inline_host_calls(_module: &mut Module, _calls: &[HostCall]) {}

/// Drop declared locals past the highest one any instruction touches.
/// Parameters are never removed.
pub fn prune_locals(module: &mut Module) {
    let types = &module.types;
    for func in &mut module.funcs {
        let params = types
            .get(func.type_index as usize)
            .map_or(0, |ty| ty.params.len());
        let used = func
            .body
            .iter()
            .filter_map(Instr::local_index)
            .max()
            .map_or(0, |max| max as usize + 1);
        func.locals.truncate(used.saturating_sub(params));
    }
}

/// Whether `window` is the call preamble; returns its constant if so.
fn match_pre_call(window: &[Instr]) -> Option<i64> {
    if window.len() < PRE_CALL_LEN {
        return None;
    }
    let Instr::I64Const(value) = window[PRE_CALL_CONST_AT] else {
        return None;
    };
    let expected = pre_call_body(Instr::I64Const(value));
    (window[..PRE_CALL_LEN] == expected[..]).then_some(value)
}

/// Fold every occurrence of the call preamble into `i64.const x; call
/// _preCall`, appending `_preCall` when anything was folded. Returns the
/// number of folds; a module that already has `_preCall` is left alone.
pub fn fold_pre_calls(module: &mut Module) -> usize {
    let already = module
        .func_names
        .as_ref()
        .is_some_and(|names| names.values().any(|name| name == PRE_CALL_FUNC));
    if already {
        tracing::debug!(target: "gobake::rewrite", "skipping pre-call folding, function already present");
        return 0;
    }

    let pre_call_index = module.func_count();
    let mut count = 0;
    for func in &mut module.funcs {
        let mut body = Vec::with_capacity(func.body.len());
        let mut index = 0;
        while index < func.body.len() {
            match match_pre_call(&func.body[index..]) {
                Some(value) => {
                    body.push(Instr::I64Const(value));
                    body.push(Instr::Call(pre_call_index));
                    index += PRE_CALL_LEN;
                    count += 1;
                }
                None => {
                    body.push(func.body[index].clone());
                    index += 1;
                }
            }
        }
        func.body = body;
    }

    if count > 0 {
        let type_index = module.intern_type(FuncType::new(vec![ValType::I64], vec![]));
        module.funcs.push(Func {
            type_index,
            locals: Vec::new(),
            body: pre_call_body(Instr::LocalGet(0)),
        });
        if let Some(names) = module.func_names.as_mut() {
            names.insert(pre_call_index, PRE_CALL_FUNC.to_string());
        }
    }
    tracing::debug!(target: "gobake::rewrite", count, "folded pre-calls");
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn module_with_body(params: Vec<ValType>, locals: Vec<ValType>, body: Vec<Instr>) -> Module {
        Module {
            types: vec![FuncType::new(params, vec![ValType::I32])],
            funcs: vec![Func {
                type_index: 0,
                locals,
                body,
            }],
            func_names: Some(BTreeMap::from([(0, "f".to_string())])),
            ..Module::default()
        }
    }

    #[test]
    fn folds_non_overlapping_matches_and_appends_subroutine() {
        let mut body = pre_call_body(Instr::I64Const(40));
        body.push(Instr::Nop);
        body.extend(pre_call_body(Instr::I64Const(8)));
        let mut module = module_with_body(vec![], vec![], body);

        assert_eq!(fold_pre_calls(&mut module), 2);
        assert_eq!(
            module.funcs[0].body,
            vec![
                Instr::I64Const(40),
                Instr::Call(1),
                Instr::Nop,
                Instr::I64Const(8),
                Instr::Call(1),
            ]
        );
        assert_eq!(module.funcs.len(), 2);
        assert_eq!(module.funcs[1].body[5], Instr::LocalGet(0));
        assert_eq!(module.func_name(1), Some(PRE_CALL_FUNC));
        assert_eq!(
            module.func_type(1),
            Some(&FuncType::new(vec![ValType::I64], vec![]))
        );

        // A second pass finds `_preCall` and does nothing.
        assert_eq!(fold_pre_calls(&mut module), 0);
        assert_eq!(module.funcs.len(), 2);
    }

    #[test]
    fn near_misses_and_truncated_windows_are_kept() {
        let mut wrong_const = pre_call_body(Instr::I32Const(3));
        let mut wrong_store = pre_call_body(Instr::I64Const(3));
        wrong_store[6] = Instr::I64Store(MemArg::new(3, 8));
        let truncated = pre_call_body(Instr::I64Const(3))[..8].to_vec();
        wrong_const.extend(wrong_store);
        wrong_const.extend(truncated);
        let original = wrong_const.clone();
        let mut module = module_with_body(vec![], vec![], wrong_const);
        assert_eq!(fold_pre_calls(&mut module), 0);
        assert_eq!(module.funcs[0].body, original);
        assert_eq!(module.funcs.len(), 1);
    }

    #[test]
    fn prune_keeps_every_touched_local_and_all_params() {
        let mut module = module_with_body(
            vec![ValType::I32, ValType::I32],
            vec![ValType::I64, ValType::I64, ValType::F64, ValType::I32],
            vec![Instr::LocalTee(3), Instr::LocalGet(0)],
        );
        prune_locals(&mut module);
        assert_eq!(module.funcs[0].locals, vec![ValType::I64, ValType::I64]);

        let mut module = module_with_body(vec![ValType::I32, ValType::I32], vec![ValType::I64], vec![Instr::LocalGet(1)]);
        prune_locals(&mut module);
        assert!(module.funcs[0].locals.is_empty());
    }

    #[test]
    fn neutered_initializer_returns_zero_of_its_type() {
        let mut module = module_with_body(vec![], vec![ValType::I32], vec![Instr::Nop, Instr::I32Const(5)]);
        module.imports.push(gobake_types::Import {
            module: "go".into(),
            name: "debug".into(),
            kind: gobake_types::ImportKind::Func(0),
        });
        // Absolute index 1 is the first defined function.
        neuter_initializers(&mut module, &BTreeSet::from([0]));
        assert_eq!(module.funcs[0].body.len(), 2);
        neuter_initializers(&mut module, &BTreeSet::from([1]));
        assert_eq!(module.funcs[0].body, vec![Instr::I32Const(0)]);
    }
}
