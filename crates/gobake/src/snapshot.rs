//! Turn live instance state into module initializers.

use std::ops::Range;

use gobake_interp::Value;
use gobake_types::{Data, Instr, Module};

use crate::runner::RESUME_GLOBAL;

/// Longest run of zero bytes kept inside a data segment instead of splitting.
pub const MAX_ZEROS_IN_DATA: usize = 5;

/// Re-initialize every global to its live value. The resume global starts
/// at `resume_marker` instead, when one was observed.
pub fn bake_globals(module: &mut Module, live: &[Value], resume_marker: Option<i32>) {
    for (index, (global, value)) in module.globals.iter_mut().zip(live).enumerate() {
        let init = match resume_marker {
            Some(marker) if index as u32 == RESUME_GLOBAL => Instr::I32Const(marker),
            _ => value.to_const(),
        };
        tracing::debug!(target: "gobake::snapshot", index, ?init, "setting global");
        global.init = init;
    }
}

/// Non-zero byte ranges of `memory`, merging neighbours separated by at most
/// [`MAX_ZEROS_IN_DATA`] zero bytes.
pub fn nonzero_ranges(memory: &[u8]) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut index = 0;
    while index < memory.len() {
        while index < memory.len() && memory[index] == 0 {
            index += 1;
        }
        if index == memory.len() {
            break;
        }
        let start = index;
        while index < memory.len() && memory[index] != 0 {
            index += 1;
        }
        match ranges.last_mut() {
            Some(last) if start - last.end <= MAX_ZEROS_IN_DATA => last.end = index,
            _ => ranges.push(start..index),
        }
    }
    ranges
}

/// Replace the data segments with one per non-zero range of `memory`, and
/// raise the declared minimum so the segments fit.
pub fn bake_data(module: &mut Module, memory: &[u8], pages: u32) {
    module.data = nonzero_ranges(memory)
        .into_iter()
        .map(|range| {
            tracing::debug!(target: "gobake::snapshot", ?range, "setting byte range");
            Data {
                offset: Instr::I32Const(range.start as i32),
                bytes: memory[range].to_vec(),
            }
        })
        .collect();
    if let Some(memory_type) = module.memories.first_mut() {
        memory_type.minimum = memory_type.minimum.max(pages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gobake_types::{Global, GlobalType, MemoryType, ValType};

    #[test]
    fn gaps_of_five_merge_and_six_split() {
        let mut memory = vec![0u8; 40];
        memory[2] = 1;
        memory[3] = 2;
        memory[9] = 3; // five zeros after index 3
        memory[16] = 4; // six zeros after index 9
        memory[39] = 5;
        assert_eq!(nonzero_ranges(&memory), vec![2..10, 16..17, 39..40]);
    }

    #[test]
    fn all_zero_memory_has_no_ranges() {
        assert!(nonzero_ranges(&[0; 64]).is_empty());
        assert_eq!(nonzero_ranges(&[7]), vec![0..1]);
    }

    #[test]
    fn segments_start_and_end_non_zero() {
        let mut memory = vec![0u8; 100];
        for (i, b) in [(10, 1), (12, 1), (30, 9), (31, 9), (37, 1)] {
            memory[i] = b;
        }
        let mut module = Module {
            memories: vec![MemoryType {
                minimum: 1,
                maximum: None,
            }],
            ..Module::default()
        };
        bake_data(&mut module, &memory, 3);
        assert_eq!(module.memories[0].minimum, 3);
        let mut previous_end: Option<usize> = None;
        for data in &module.data {
            assert_ne!(data.bytes.first(), Some(&0));
            assert_ne!(data.bytes.last(), Some(&0));
            let Instr::I32Const(start) = data.offset else { panic!("offset") };
            let start = start as usize;
            if let Some(end) = previous_end {
                assert!(start - end > MAX_ZEROS_IN_DATA);
            }
            previous_end = Some(start + data.bytes.len());
        }
        assert_eq!(module.data.len(), 2);
    }

    #[test]
    fn globals_take_live_values_and_resume_marker() {
        let global = |val_type| Global {
            ty: GlobalType {
                val_type,
                mutable: true,
            },
            init: Instr::zero(val_type),
        };
        let mut module = Module {
            globals: vec![global(ValType::I64), global(ValType::I32), global(ValType::F64)],
            ..Module::default()
        };
        bake_globals(
            &mut module,
            &[Value::I64(-5), Value::I32(2), Value::F64(0.5)],
            Some(17),
        );
        assert_eq!(module.globals[0].init, Instr::I64Const(-5));
        assert_eq!(module.globals[1].init, Instr::I32Const(17));
        assert_eq!(module.globals[2].init, Instr::f64_const(0.5));
    }

    #[test]
    fn resume_global_keeps_live_value_without_marker() {
        let mut module = Module {
            globals: vec![
                Global {
                    ty: GlobalType {
                        val_type: ValType::I32,
                        mutable: true,
                    },
                    init: Instr::I32Const(0),
                };
                2
            ],
            ..Module::default()
        };
        bake_globals(&mut module, &[Value::I32(1), Value::I32(3)], None);
        assert_eq!(module.globals[1].init, Instr::I32Const(3));
    }
}
