// Basic Block Partitioner
//
// Groups the instruction stream into maximal straight-line blocks. A block
// starts at offset 0, at every JUMPDEST and right after every JUMP/JUMPI.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::disassembler::Instruction;
use super::opcodes;

/// Contiguous half-open byte range `[start, end)` and the instructions in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Offset of the first byte
    pub start: usize,
    /// Offset one past the last byte
    pub end: usize,
    /// Instructions in offset order
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// Last instruction, the one that decides the outgoing edges
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// Whether the block begins with a JUMPDEST
    pub fn is_jumpdest(&self) -> bool {
        self.instructions
            .first()
            .map_or(false, |i| i.is(opcodes::JUMPDEST))
    }

    pub fn contains_offset(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Collect the sorted set of block start offsets
pub fn block_starts(instructions: &[Instruction]) -> BTreeSet<usize> {
    let mut starts = BTreeSet::new();
    starts.insert(0);

    for (i, instruction) in instructions.iter().enumerate() {
        if instruction.is(opcodes::JUMPDEST) {
            starts.insert(instruction.offset);
        }
        if opcodes::is_jump(instruction.opcode) {
            if let Some(next) = instructions.get(i + 1) {
                starts.insert(next.offset);
            }
        }
    }

    starts
}

/// Partition the instruction stream into basic blocks.
///
/// Blocks never overlap and together cover `[0, code_len)`. Empty code yields a
/// single empty block at offset 0.
pub fn partition(instructions: &[Instruction], code_len: usize) -> Vec<BasicBlock> {
    let starts: Vec<usize> = block_starts(instructions).into_iter().collect();
    let mut blocks = Vec::with_capacity(starts.len());
    let mut cursor = 0;

    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(code_len.max(start));

        // Instructions are sorted by offset, so each block takes the next run
        let first = cursor;
        while cursor < instructions.len() && instructions[cursor].offset < end {
            cursor += 1;
        }

        blocks.push(BasicBlock {
            start,
            end,
            instructions: instructions[first..cursor].to_vec(),
        });
    }

    blocks
}
