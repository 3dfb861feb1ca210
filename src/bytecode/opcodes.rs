// EVM Opcodes
//
// This module provides constants for the EVM opcodes the analysis cares about,
// the shared read-only mnemonic table and the opcode classes used by the
// block partitioner, the CFG builder and the taint engine.

/// STOP opcode
pub const STOP: u8 = 0x00;

/// ADD opcode
pub const ADD: u8 = 0x01;

/// SIGNEXTEND opcode
pub const SIGNEXTEND: u8 = 0x0B;

/// LT opcode
pub const LT: u8 = 0x10;

/// GT opcode
pub const GT: u8 = 0x11;

/// SLT opcode
pub const SLT: u8 = 0x12;

/// SGT opcode
pub const SGT: u8 = 0x13;

/// EQ opcode
pub const EQ: u8 = 0x14;

/// ISZERO opcode
pub const ISZERO: u8 = 0x15;

/// SAR opcode
pub const SAR: u8 = 0x1D;

/// SHA3 (KECCAK256) opcode
pub const SHA3: u8 = 0x20;

/// ADDRESS opcode
pub const ADDRESS: u8 = 0x30;

/// BALANCE opcode
pub const BALANCE: u8 = 0x31;

/// ORIGIN opcode
pub const ORIGIN: u8 = 0x32;

/// CALLER opcode
pub const CALLER: u8 = 0x33;

/// CALLVALUE opcode
pub const CALLVALUE: u8 = 0x34;

/// CALLDATALOAD opcode
pub const CALLDATALOAD: u8 = 0x35;

/// CALLDATASIZE opcode
pub const CALLDATASIZE: u8 = 0x36;

/// CALLDATACOPY opcode
pub const CALLDATACOPY: u8 = 0x37;

/// GASPRICE opcode
pub const GASPRICE: u8 = 0x3A;

/// EXTCODEHASH opcode
pub const EXTCODEHASH: u8 = 0x3F;

/// BLOCKHASH opcode
pub const BLOCKHASH: u8 = 0x40;

/// COINBASE opcode
pub const COINBASE: u8 = 0x41;

/// TIMESTAMP opcode
pub const TIMESTAMP: u8 = 0x42;

/// NUMBER opcode
pub const NUMBER: u8 = 0x43;

/// DIFFICULTY (PREVRANDAO) opcode
pub const DIFFICULTY: u8 = 0x44;

/// GASLIMIT opcode
pub const GASLIMIT: u8 = 0x45;

/// BASEFEE opcode
pub const BASEFEE: u8 = 0x48;

/// POP opcode
pub const POP: u8 = 0x50;

/// MLOAD opcode
pub const MLOAD: u8 = 0x51;

/// MSTORE opcode
pub const MSTORE: u8 = 0x52;

/// SLOAD opcode
pub const SLOAD: u8 = 0x54;

/// SSTORE opcode
pub const SSTORE: u8 = 0x55;

/// JUMP opcode
pub const JUMP: u8 = 0x56;

/// JUMPI opcode
pub const JUMPI: u8 = 0x57;

/// JUMPDEST opcode
pub const JUMPDEST: u8 = 0x5B;

/// PUSH0 opcode
pub const PUSH0: u8 = 0x5F;

/// PUSH1 opcode
pub const PUSH1: u8 = 0x60;

/// PUSH32 opcode
pub const PUSH32: u8 = 0x7F;

/// DUP1 opcode
pub const DUP1: u8 = 0x80;

/// DUP16 opcode
pub const DUP16: u8 = 0x8F;

/// SWAP1 opcode
pub const SWAP1: u8 = 0x90;

/// SWAP16 opcode
pub const SWAP16: u8 = 0x9F;

/// CREATE opcode
pub const CREATE: u8 = 0xF0;

/// CALL opcode
pub const CALL: u8 = 0xF1;

/// CALLCODE opcode
pub const CALLCODE: u8 = 0xF2;

/// RETURN opcode
pub const RETURN: u8 = 0xF3;

/// DELEGATECALL opcode
pub const DELEGATECALL: u8 = 0xF4;

/// CREATE2 opcode
pub const CREATE2: u8 = 0xF5;

/// STATICCALL opcode
pub const STATICCALL: u8 = 0xFA;

/// REVERT opcode
pub const REVERT: u8 = 0xFD;

/// INVALID opcode
pub const INVALID: u8 = 0xFE;

/// SELFDESTRUCT opcode
pub const SELFDESTRUCT: u8 = 0xFF;

/// Mnemonic for every assigned opcode, `None` for unassigned ones.
///
/// Built once at compile time and only ever read.
pub static OPCODE_TABLE: [Option<&'static str>; 256] = build_table();

const fn build_table() -> [Option<&'static str>; 256] {
    let mut table = [None; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = mnemonic_of(i as u8);
        i += 1;
    }
    table
}

const fn mnemonic_of(opcode: u8) -> Option<&'static str> {
    let name = match opcode {
        0x00 => "STOP",
        0x01 => "ADD",
        0x02 => "MUL",
        0x03 => "SUB",
        0x04 => "DIV",
        0x05 => "SDIV",
        0x06 => "MOD",
        0x07 => "SMOD",
        0x08 => "ADDMOD",
        0x09 => "MULMOD",
        0x0A => "EXP",
        0x0B => "SIGNEXTEND",
        0x10 => "LT",
        0x11 => "GT",
        0x12 => "SLT",
        0x13 => "SGT",
        0x14 => "EQ",
        0x15 => "ISZERO",
        0x16 => "AND",
        0x17 => "OR",
        0x18 => "XOR",
        0x19 => "NOT",
        0x1A => "BYTE",
        0x1B => "SHL",
        0x1C => "SHR",
        0x1D => "SAR",
        0x20 => "SHA3",
        0x30 => "ADDRESS",
        0x31 => "BALANCE",
        0x32 => "ORIGIN",
        0x33 => "CALLER",
        0x34 => "CALLVALUE",
        0x35 => "CALLDATALOAD",
        0x36 => "CALLDATASIZE",
        0x37 => "CALLDATACOPY",
        0x38 => "CODESIZE",
        0x39 => "CODECOPY",
        0x3A => "GASPRICE",
        0x3B => "EXTCODESIZE",
        0x3C => "EXTCODECOPY",
        0x3D => "RETURNDATASIZE",
        0x3E => "RETURNDATACOPY",
        0x3F => "EXTCODEHASH",
        0x40 => "BLOCKHASH",
        0x41 => "COINBASE",
        0x42 => "TIMESTAMP",
        0x43 => "NUMBER",
        0x44 => "DIFFICULTY",
        0x45 => "GASLIMIT",
        0x46 => "CHAINID",
        0x47 => "SELFBALANCE",
        0x48 => "BASEFEE",
        0x49 => "BLOBHASH",
        0x4A => "BLOBBASEFEE",
        0x50 => "POP",
        0x51 => "MLOAD",
        0x52 => "MSTORE",
        0x53 => "MSTORE8",
        0x54 => "SLOAD",
        0x55 => "SSTORE",
        0x56 => "JUMP",
        0x57 => "JUMPI",
        0x58 => "PC",
        0x59 => "MSIZE",
        0x5A => "GAS",
        0x5B => "JUMPDEST",
        0x5C => "TLOAD",
        0x5D => "TSTORE",
        0x5E => "MCOPY",
        0x5F => "PUSH0",
        0x60 => "PUSH1",
        0x61 => "PUSH2",
        0x62 => "PUSH3",
        0x63 => "PUSH4",
        0x64 => "PUSH5",
        0x65 => "PUSH6",
        0x66 => "PUSH7",
        0x67 => "PUSH8",
        0x68 => "PUSH9",
        0x69 => "PUSH10",
        0x6A => "PUSH11",
        0x6B => "PUSH12",
        0x6C => "PUSH13",
        0x6D => "PUSH14",
        0x6E => "PUSH15",
        0x6F => "PUSH16",
        0x70 => "PUSH17",
        0x71 => "PUSH18",
        0x72 => "PUSH19",
        0x73 => "PUSH20",
        0x74 => "PUSH21",
        0x75 => "PUSH22",
        0x76 => "PUSH23",
        0x77 => "PUSH24",
        0x78 => "PUSH25",
        0x79 => "PUSH26",
        0x7A => "PUSH27",
        0x7B => "PUSH28",
        0x7C => "PUSH29",
        0x7D => "PUSH30",
        0x7E => "PUSH31",
        0x7F => "PUSH32",
        0x80 => "DUP1",
        0x81 => "DUP2",
        0x82 => "DUP3",
        0x83 => "DUP4",
        0x84 => "DUP5",
        0x85 => "DUP6",
        0x86 => "DUP7",
        0x87 => "DUP8",
        0x88 => "DUP9",
        0x89 => "DUP10",
        0x8A => "DUP11",
        0x8B => "DUP12",
        0x8C => "DUP13",
        0x8D => "DUP14",
        0x8E => "DUP15",
        0x8F => "DUP16",
        0x90 => "SWAP1",
        0x91 => "SWAP2",
        0x92 => "SWAP3",
        0x93 => "SWAP4",
        0x94 => "SWAP5",
        0x95 => "SWAP6",
        0x96 => "SWAP7",
        0x97 => "SWAP8",
        0x98 => "SWAP9",
        0x99 => "SWAP10",
        0x9A => "SWAP11",
        0x9B => "SWAP12",
        0x9C => "SWAP13",
        0x9D => "SWAP14",
        0x9E => "SWAP15",
        0x9F => "SWAP16",
        0xA0 => "LOG0",
        0xA1 => "LOG1",
        0xA2 => "LOG2",
        0xA3 => "LOG3",
        0xA4 => "LOG4",
        0xF0 => "CREATE",
        0xF1 => "CALL",
        0xF2 => "CALLCODE",
        0xF3 => "RETURN",
        0xF4 => "DELEGATECALL",
        0xF5 => "CREATE2",
        0xFA => "STATICCALL",
        0xFD => "REVERT",
        0xFE => "INVALID",
        0xFF => "SELFDESTRUCT",
        _ => return None,
    };
    Some(name)
}

/// Get the mnemonic of an assigned opcode
pub fn name(opcode: u8) -> Option<&'static str> {
    OPCODE_TABLE[opcode as usize]
}

/// Check if an opcode has an entry in the mnemonic table
pub fn is_assigned(opcode: u8) -> bool {
    OPCODE_TABLE[opcode as usize].is_some()
}

/// Check if an opcode is a PUSH1..PUSH32 opcode (carries an immediate)
pub fn is_push(opcode: u8) -> bool {
    (PUSH1..=PUSH32).contains(&opcode)
}

/// Get the size of a PUSH opcode's immediate value
pub fn push_size(opcode: u8) -> Option<usize> {
    if is_push(opcode) {
        Some((opcode - PUSH1 + 1) as usize)
    } else {
        None
    }
}

/// Check if an opcode pushes a constant (PUSH0..PUSH32)
pub fn is_constant_push(opcode: u8) -> bool {
    opcode == PUSH0 || is_push(opcode)
}

/// Check if an opcode is a DUPn
pub fn is_dup(opcode: u8) -> bool {
    (DUP1..=DUP16).contains(&opcode)
}

/// Check if an opcode is a SWAPn
pub fn is_swap(opcode: u8) -> bool {
    (SWAP1..=SWAP16).contains(&opcode)
}

/// Stack items consumed and produced by an assigned opcode
pub fn stack_io(opcode: u8) -> Option<(usize, usize)> {
    if !is_assigned(opcode) {
        return None;
    }
    let io = match opcode {
        STOP | JUMPDEST | INVALID => (0, 0),
        0x08 | 0x09 => (3, 1),
        0x01..=0x0B | 0x10..=0x14 | 0x16..=0x18 | 0x1A..=0x1D | SHA3 => (2, 1),
        ISZERO | 0x19 => (1, 1),
        BALANCE | CALLDATALOAD | 0x3B | EXTCODEHASH | BLOCKHASH | 0x49 => (1, 1),
        CALLDATACOPY | 0x39 | 0x3E | 0x5E => (3, 0),
        0x3C => (4, 0),
        0x30..=0x48 | 0x4A | 0x58..=0x5A | PUSH0..=PUSH32 => (0, 1),
        POP | JUMP | SELFDESTRUCT => (1, 0),
        MLOAD | SLOAD | 0x5C => (1, 1),
        MSTORE | 0x53 | SSTORE | JUMPI | 0x5D | RETURN | REVERT => (2, 0),
        DUP1..=DUP16 => {
            let n = usize::from(opcode - DUP1) + 1;
            (n, n + 1)
        }
        SWAP1..=SWAP16 => {
            let n = usize::from(opcode - SWAP1) + 2;
            (n, n)
        }
        0xA0..=0xA4 => (usize::from(opcode - 0xA0) + 2, 0),
        CREATE => (3, 1),
        CALL | CALLCODE => (7, 1),
        DELEGATECALL | STATICCALL => (6, 1),
        CREATE2 => (4, 1),
        _ => return None,
    };
    Some(io)
}

/// JUMP or JUMPI
pub fn is_jump(opcode: u8) -> bool {
    opcode == JUMP || opcode == JUMPI
}

/// Instructions that end execution of the current frame.
///
/// Unassigned opcodes halt like INVALID when executed, so they are terminal too.
pub fn is_terminal(opcode: u8) -> bool {
    matches!(opcode, STOP | RETURN | REVERT | INVALID | SELFDESTRUCT) || !is_assigned(opcode)
}

/// Instructions whose result derives from caller-controlled or environment data
pub fn is_taint_source(opcode: u8) -> bool {
    matches!(
        opcode,
        CALLDATALOAD
            | CALLDATACOPY
            | CALLER
            | ORIGIN
            | CALLVALUE
            | GASPRICE
            | BLOCKHASH
            | COINBASE
            | TIMESTAMP
            | NUMBER
            | DIFFICULTY
            | GASLIMIT
            | BASEFEE
    )
}

/// Comparison and zero-test instructions
pub fn is_comparison(opcode: u8) -> bool {
    matches!(opcode, LT | GT | SLT | SGT | EQ | ISZERO)
}

/// CALLER or ORIGIN, the reads that identify who is executing
pub fn is_identity_read(opcode: u8) -> bool {
    opcode == CALLER || opcode == ORIGIN
}

/// Instructions capable of destroying, delegating or redeploying code
pub fn is_sensitive(opcode: u8) -> bool {
    matches!(opcode, SELFDESTRUCT | DELEGATECALL | CALLCODE | CREATE | CREATE2)
}
