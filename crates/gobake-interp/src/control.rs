//! Precomputed block structure of a function body.

use std::collections::HashMap;

use gobake_types::Instr;

use crate::error::{ExecError, ExecResult};

/// Matching `else`/`end` positions for every structured instruction.
#[derive(Debug, Clone, Default)]
pub struct ControlMap {
    /// `block`/`loop`/`if` position (and `else` position) to its `end`.
    ends: HashMap<usize, usize>,
    /// `if` position to its `else`, when it has one.
    elses: HashMap<usize, usize>,
}

impl ControlMap {
    pub fn build(body: &[Instr]) -> ExecResult<Self> {
        let mut map = ControlMap::default();
        let mut open: Vec<usize> = Vec::new();
        for (pc, instr) in body.iter().enumerate() {
            match instr {
                _ if instr.opens_block() => open.push(pc),
                Instr::Else => {
                    let start = *open
                        .last()
                        .ok_or_else(|| unbalanced(pc, "else outside a block"))?;
                    map.elses.insert(start, pc);
                }
                Instr::End => {
                    let start = open
                        .pop()
                        .ok_or_else(|| unbalanced(pc, "end without a block"))?;
                    map.ends.insert(start, pc);
                    if let Some(&else_pc) = map.elses.get(&start) {
                        map.ends.insert(else_pc, pc);
                    }
                }
                _ => {}
            }
        }
        if let Some(start) = open.pop() {
            return Err(unbalanced(start, "block never closed"));
        }
        Ok(map)
    }

    pub fn end_of(&self, pc: usize) -> ExecResult<usize> {
        self.ends
            .get(&pc)
            .copied()
            .ok_or_else(|| unbalanced(pc, "no matching end"))
    }

    pub fn else_of(&self, pc: usize) -> Option<usize> {
        self.elses.get(&pc).copied()
    }
}

fn unbalanced(pc: usize, what: &str) -> ExecError {
    ExecError::Malformed(format!("{what} at instruction {pc}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gobake_types::BlockType;

    #[test]
    fn nested_blocks_and_else() {
        let body = vec![
            Instr::Block(BlockType::Empty), // 0
            Instr::I32Const(1),             // 1
            Instr::If(BlockType::Empty),    // 2
            Instr::Nop,                     // 3
            Instr::Else,                    // 4
            Instr::Nop,                     // 5
            Instr::End,                     // 6
            Instr::End,                     // 7
        ];
        let map = ControlMap::build(&body).unwrap();
        assert_eq!(map.end_of(0).unwrap(), 7);
        assert_eq!(map.end_of(2).unwrap(), 6);
        assert_eq!(map.else_of(2), Some(4));
        assert_eq!(map.end_of(4).unwrap(), 6);
        assert!(map.else_of(0).is_none());
    }

    #[test]
    fn unbalanced_bodies_are_rejected() {
        assert!(ControlMap::build(&[Instr::End]).is_err());
        assert!(ControlMap::build(&[Instr::Loop(BlockType::Empty)]).is_err());
    }
}
