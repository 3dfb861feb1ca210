// Instruction Decoder
//
// Turns runtime bytecode into a typed instruction stream. Decoding never fails:
// malformed hex, truncated PUSH immediates and unassigned opcodes are kept as
// degraded instructions and reported through `DecodeDiagnostic`s.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use ethers::types::U256;
use log::warn;
use serde::{Deserialize, Serialize};

use super::opcodes;

/// Single disassembled EVM instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Byte offset in the code
    pub offset: usize,
    /// Raw opcode byte
    pub opcode: u8,
    /// Resolved mnemonic, `UNKNOWN_xx` for unassigned opcodes
    pub mnemonic: Cow<'static, str>,
    /// Immediate operand of PUSH1..PUSH32, possibly shorter than declared at end of code
    pub immediate: Option<Vec<u8>>,
}

impl Instruction {
    /// Decode the instruction starting at `offset`
    fn decode(code: &[u8], offset: usize) -> Self {
        let opcode = code[offset];
        let mnemonic = match opcodes::name(opcode) {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(format!("UNKNOWN_{opcode:02x}")),
        };
        let immediate = opcodes::push_size(opcode).map(|size| {
            let start = offset + 1;
            let end = (start + size).min(code.len());
            code[start..end].to_vec()
        });

        Self {
            offset,
            opcode,
            mnemonic,
            immediate,
        }
    }

    /// Bytes occupied in the code: the opcode plus whatever immediate bytes were present
    pub fn width(&self) -> usize {
        1 + self.immediate.as_ref().map_or(0, Vec::len)
    }

    /// Offset of the following instruction
    pub fn next_offset(&self) -> usize {
        self.offset + self.width()
    }

    /// Whether the immediate is shorter than the opcode declares
    pub fn is_truncated(&self) -> bool {
        match (opcodes::push_size(self.opcode), &self.immediate) {
            (Some(size), Some(imm)) => imm.len() < size,
            _ => false,
        }
    }

    /// Constant pushed by PUSH0..PUSH32, `None` for every other instruction
    pub fn push_value(&self) -> Option<U256> {
        if self.opcode == opcodes::PUSH0 {
            return Some(U256::zero());
        }
        self.immediate.as_deref().map(U256::from_big_endian)
    }

    pub fn is(&self, opcode: u8) -> bool {
        self.opcode == opcode
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.immediate {
            Some(imm) => write!(f, "{:06x}  {:<8} 0x{}", self.offset, self.mnemonic, hex::encode(imm)),
            None => write!(f, "{:06x}  {}", self.offset, self.mnemonic),
        }
    }
}

/// Degraded-input notes produced while decoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeDiagnostic {
    /// Nothing to decode
    EmptyInput,
    /// Hex input had an odd number of digits; the dangling digit was dropped
    OddLength { digits: usize },
    /// A non-hex character stopped hex decoding; only the preceding bytes were decoded
    InvalidHex { position: usize },
    /// PUSH immediate runs past the end of code
    TruncatedPush { offset: usize, declared: usize, available: usize },
    /// Opcode has no entry in the mnemonic table
    UnassignedOpcode { offset: usize, opcode: u8 },
}

/// Decoded instruction stream with an offset index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Disassembly {
    /// Instructions in offset order
    pub instructions: Vec<Instruction>,
    /// Length of the decoded code in bytes
    pub code_len: usize,
    /// Degraded-input notes
    pub diagnostics: Vec<DecodeDiagnostic>,
    #[serde(skip)]
    index: HashMap<usize, usize>,
}

impl Disassembly {
    /// Position of the instruction starting at `offset`
    pub fn index_of(&self, offset: usize) -> Option<usize> {
        self.index.get(&offset).copied()
    }

    /// Instruction starting at `offset`
    pub fn at(&self, offset: usize) -> Option<&Instruction> {
        self.index_of(offset).map(|i| &self.instructions[i])
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Decode a hex string (optionally `0x`-prefixed) into bytes.
///
/// Whitespace is ignored. An odd trailing digit is dropped and decoding stops
/// at the first non-hex character; both are reported, never rejected.
pub fn decode_hex(input: &str) -> (Vec<u8>, Vec<DecodeDiagnostic>) {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: Vec<char> = body.chars().filter(|c| !c.is_whitespace()).collect();

    let mut diagnostics = Vec::new();
    let valid = digits
        .iter()
        .position(|c| !c.is_ascii_hexdigit())
        .unwrap_or(digits.len());
    if valid < digits.len() {
        warn!("invalid hex character at position {}, decoding prefix only", valid);
        diagnostics.push(DecodeDiagnostic::InvalidHex { position: valid });
    }

    let mut usable = valid;
    if usable % 2 == 1 {
        warn!("odd number of hex digits ({}), dropping the last one", usable);
        diagnostics.push(DecodeDiagnostic::OddLength { digits: usable });
        usable -= 1;
    }

    let text: String = digits[..usable].iter().collect();
    // Only validated hex digits of even length reach this point
    let bytes = hex::decode(text).unwrap_or_default();
    (bytes, diagnostics)
}

/// Disassemble raw bytecode.
///
/// PUSH immediates are consumed so their bytes are never decoded as
/// instructions; the widths of all instructions add up to `code.len()`.
pub fn disassemble(code: &[u8]) -> Disassembly {
    let mut instructions = Vec::with_capacity(code.len());
    let mut diagnostics = Vec::new();
    let mut index = HashMap::with_capacity(code.len());

    if code.is_empty() {
        diagnostics.push(DecodeDiagnostic::EmptyInput);
    }

    let mut pc = 0;
    while pc < code.len() {
        let instruction = Instruction::decode(code, pc);

        if !opcodes::is_assigned(instruction.opcode) {
            diagnostics.push(DecodeDiagnostic::UnassignedOpcode {
                offset: pc,
                opcode: instruction.opcode,
            });
        }
        if instruction.is_truncated() {
            let declared = opcodes::push_size(instruction.opcode).unwrap_or(0);
            let available = instruction.width() - 1;
            warn!(
                "{} at 0x{:x} declares {} immediate bytes but only {} remain",
                instruction.mnemonic, pc, declared, available
            );
            diagnostics.push(DecodeDiagnostic::TruncatedPush {
                offset: pc,
                declared,
                available,
            });
        }

        pc = instruction.next_offset();
        index.insert(instruction.offset, instructions.len());
        instructions.push(instruction);
    }

    Disassembly {
        instructions,
        code_len: code.len(),
        diagnostics,
        index,
    }
}

/// Decode a hex string and disassemble it, merging the diagnostics of both steps
pub fn disassemble_hex(input: &str) -> Disassembly {
    let (bytes, mut diagnostics) = decode_hex(input);
    let mut disassembly = disassemble(&bytes);
    diagnostics.append(&mut disassembly.diagnostics);
    disassembly.diagnostics = diagnostics;
    disassembly
}

/// Producer of a stack item, as seen from a backward scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOrigin {
    /// Pushed as a constant
    Constant(U256),
    /// Result of the instruction at `offset`
    Computed { offset: usize },
    /// Produced before the scanned window
    Unknown,
}

/// Find what produced the stack item at `depth` (0 is the top) just before
/// `instructions[index]` executes.
///
/// The item is followed backwards through DUPn, SWAPn and the stack effect of
/// every other instruction, inspecting at most `lookback` instructions.
pub fn stack_origin(instructions: &[Instruction], index: usize, mut depth: usize, lookback: usize) -> StackOrigin {
    for back in 1..=lookback {
        let Some(i) = index.checked_sub(back) else {
            break;
        };
        let instruction = &instructions[i];
        let opcode = instruction.opcode;

        if let Some(value) = instruction.push_value() {
            if depth == 0 {
                return StackOrigin::Constant(value);
            }
            depth -= 1;
        } else if opcodes::is_dup(opcode) {
            let n = usize::from(opcode - opcodes::DUP1) + 1;
            depth = if depth == 0 { n - 1 } else { depth - 1 };
        } else if opcodes::is_swap(opcode) {
            let n = usize::from(opcode - opcodes::SWAP1) + 1;
            if depth == 0 {
                depth = n;
            } else if depth == n {
                depth = 0;
            }
        } else {
            let Some((pops, pushes)) = opcodes::stack_io(opcode) else {
                break;
            };
            if depth < pushes {
                return StackOrigin::Computed { offset: instruction.offset };
            }
            depth = depth - pushes + pops;
        }
    }
    StackOrigin::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    /// Deterministic byte soup for coverage checks
    fn pseudo_random_bytes(seed: u64, len: usize) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn test_disassemble_simple_store() {
        // PUSH1 1 PUSH1 0 SSTORE
        let dis = disassemble(&hex!("6001600055"));
        assert_eq!(dis.len(), 3);
        assert_eq!(dis.instructions[0].mnemonic, "PUSH1");
        assert_eq!(dis.instructions[0].immediate, Some(vec![0x01]));
        assert_eq!(dis.instructions[1].offset, 2);
        assert_eq!(dis.instructions[2].mnemonic, "SSTORE");
        assert_eq!(dis.instructions[2].immediate, None);
        assert!(dis.diagnostics.is_empty());
    }

    #[test]
    fn test_immediates_are_not_instructions() {
        // PUSH2 0x5b5b JUMPDEST: the 0x5b bytes inside the immediate are data
        let dis = disassemble(&hex!("615b5b5b"));
        assert_eq!(dis.len(), 2);
        assert_eq!(dis.instructions[1].offset, 3);
        assert_eq!(dis.instructions[1].opcode, opcodes::JUMPDEST);
        assert_eq!(dis.instructions[0].push_value(), Some(U256::from(0x5b5b)));
    }

    #[test]
    fn test_truncated_push_is_tolerated() {
        // PUSH4 with only two bytes left
        let dis = disassemble(&hex!("006301ff"));
        assert_eq!(dis.len(), 2);
        let push = &dis.instructions[1];
        assert!(push.is_truncated());
        assert_eq!(push.width(), 3);
        assert_eq!(
            dis.diagnostics,
            vec![DecodeDiagnostic::TruncatedPush { offset: 1, declared: 4, available: 2 }]
        );
    }

    #[test]
    fn test_unassigned_opcode_placeholder() {
        let dis = disassemble(&[0x0c, 0xef]);
        assert_eq!(dis.instructions[0].mnemonic, "UNKNOWN_0c");
        assert_eq!(dis.instructions[1].mnemonic, "UNKNOWN_ef");
        assert_eq!(dis.diagnostics.len(), 2);
    }

    #[test]
    fn test_hex_input_degradation() {
        let dis = disassemble_hex("0x600");
        assert_eq!(dis.code_len, 1);
        assert!(dis.diagnostics.contains(&DecodeDiagnostic::OddLength { digits: 3 }));

        let dis = disassemble_hex("6001zz6000");
        assert_eq!(dis.code_len, 2);
        assert!(dis.diagnostics.contains(&DecodeDiagnostic::InvalidHex { position: 4 }));

        let dis = disassemble_hex("");
        assert!(dis.is_empty());
        assert_eq!(dis.diagnostics, vec![DecodeDiagnostic::EmptyInput]);
    }

    #[test]
    fn test_decoding_covers_every_byte() {
        for seed in 0..64 {
            let code = pseudo_random_bytes(seed, 1 + (seed as usize * 37) % 300);
            let dis = disassemble(&code);

            let mut expected = 0;
            for instruction in &dis.instructions {
                assert_eq!(instruction.offset, expected, "gap or overlap at seed {seed}");
                if let Some(size) = opcodes::push_size(instruction.opcode) {
                    let imm = instruction.immediate.as_ref().map_or(0, Vec::len);
                    assert!(imm == size || instruction.next_offset() == code.len());
                }
                expected = instruction.next_offset();
            }
            assert_eq!(expected, code.len());
        }
    }

    #[test]
    fn test_offset_index() {
        let dis = disassemble(&hex!("60016000556000"));
        assert_eq!(dis.index_of(4), Some(2));
        assert_eq!(dis.index_of(1), None);
        assert_eq!(dis.at(5).map(|i| i.opcode), Some(opcodes::PUSH1));
    }

    #[test]
    fn test_stack_origin_follows_stack_position() {
        // PUSH1 0x2a PUSH1 0x03 SSTORE: key on top, value below it
        let dis = disassemble(&hex!("602a600355"));
        assert_eq!(stack_origin(&dis.instructions, 2, 0, 5), StackOrigin::Constant(U256::from(3)));
        assert_eq!(stack_origin(&dis.instructions, 2, 1, 5), StackOrigin::Constant(U256::from(0x2a)));

        // PUSH1 0x2a PUSH1 0x03 SWAP1 SSTORE
        let dis = disassemble(&hex!("602a60039055"));
        assert_eq!(stack_origin(&dis.instructions, 3, 0, 5), StackOrigin::Constant(U256::from(0x2a)));

        // PUSH1 0x03 DUP1 SWAP1 DUP2 SSTORE
        let dis = disassemble(&hex!("6003809081" "55"));
        assert_eq!(stack_origin(&dis.instructions, 4, 0, 5), StackOrigin::Constant(U256::from(3)));

        // PUSH1 1 CALLER POP SSTORE
        let dis = disassemble(&hex!("6001335055"));
        assert_eq!(stack_origin(&dis.instructions, 3, 0, 5), StackOrigin::Constant(U256::one()));
    }

    #[test]
    fn test_stack_origin_stops_at_producers() {
        // PUSH1 0x03 CALLER ADD SSTORE
        let dis = disassemble(&hex!("6003330155"));
        assert_eq!(stack_origin(&dis.instructions, 3, 0, 5), StackOrigin::Computed { offset: 3 });

        // JUMPDEST JUMP: nothing produced inside the window
        let dis = disassemble(&hex!("5b56"));
        assert_eq!(stack_origin(&dis.instructions, 1, 0, 10), StackOrigin::Unknown);

        // Window too narrow to reach the push
        let dis = disassemble(&hex!("600380808055"));
        assert_eq!(stack_origin(&dis.instructions, 4, 0, 2), StackOrigin::Unknown);
        assert_eq!(stack_origin(&dis.instructions, 4, 0, 4), StackOrigin::Constant(U256::from(3)));
    }
}
