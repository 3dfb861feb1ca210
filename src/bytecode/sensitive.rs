// Sensitive-Flow Correlator
//
// Locates dangerous opcodes and pairs them with taint paths running through
// their blocks, estimating how likely it is that the opcode's argument comes
// from the tracked variable or from caller input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::blocks::BasicBlock;
use super::opcodes;
use super::storage::{SlotDetector, SlotWindows, StorageBinding};
use super::taint::TaintPath;

/// Default number of instructions inspected before a sensitive operation
pub const DEFAULT_ARGUMENT_LOOKBACK: usize = 20;

/// Fixed severity of a dangerous opcode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity of a sensitive opcode, `None` for anything else
    pub fn of(opcode: u8) -> Option<Self> {
        match opcode {
            opcodes::SELFDESTRUCT | opcodes::DELEGATECALL => Some(Severity::Critical),
            opcodes::CALLCODE => Some(Severity::High),
            opcodes::CREATE | opcodes::CREATE2 => Some(Severity::Medium),
            _ => None,
        }
    }
}

/// A dangerous opcode and where it sits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveOperation {
    pub offset: usize,
    /// Start of the enclosing block
    pub block: usize,
    pub opcode: u8,
    pub mnemonic: String,
    pub severity: Severity,
}

/// Find every sensitive opcode in the code
pub fn locate(blocks: &[BasicBlock]) -> Vec<SensitiveOperation> {
    blocks
        .iter()
        .flat_map(|block| {
            block.instructions.iter().filter_map(move |instruction| {
                let severity = Severity::of(instruction.opcode)?;
                Some(SensitiveOperation {
                    offset: instruction.offset,
                    block: block.start,
                    opcode: instruction.opcode,
                    mnemonic: instruction.mnemonic.to_string(),
                    severity,
                })
            })
        })
        .collect()
}

/// How certain it is that the operation's argument is tainted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Signals gathered around one sensitive operation on one path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentEvidence {
    /// The tracked slot is loaded shortly before the operation
    pub tracked_load_in_window: bool,
    /// Caller or environment data is read shortly before the operation
    pub input_read_in_window: bool,
    /// The tracked slot is loaded in an earlier block of the path
    pub tracked_load_earlier_on_path: bool,
    /// The argument is a constant pushed right before the operation
    pub constant_argument: bool,
}

/// Rank the evidence. A constant argument rules the flow out.
pub fn rank(evidence: &ArgumentEvidence) -> Option<Confidence> {
    match evidence {
        ArgumentEvidence { constant_argument: true, .. } => None,
        ArgumentEvidence { tracked_load_in_window: true, .. }
        | ArgumentEvidence { input_read_in_window: true, .. } => Some(Confidence::High),
        ArgumentEvidence { tracked_load_earlier_on_path: true, .. } => Some(Confidence::Medium),
        _ => Some(Confidence::Low),
    }
}

/// A taint path running through a sensitive operation with a tainted argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintedSensitiveFlow {
    pub path: TaintPath,
    pub operation: SensitiveOperation,
    pub confidence: Confidence,
    pub evidence: ArgumentEvidence,
}

/// Gathers argument evidence for one tracked variable
pub struct FlowCorrelator<'a> {
    blocks: BTreeMap<usize, &'a BasicBlock>,
    detector: SlotDetector<'a>,
    lookback: usize,
}

impl<'a> FlowCorrelator<'a> {
    pub fn new(blocks: &'a [BasicBlock], binding: &'a StorageBinding, windows: SlotWindows) -> Self {
        Self {
            blocks: blocks.iter().map(|b| (b.start, b)).collect(),
            detector: SlotDetector::new(binding, windows),
            lookback: DEFAULT_ARGUMENT_LOOKBACK,
        }
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    /// Evidence for `operation` as reached through `path`
    pub fn evidence(&self, path: &TaintPath, operation: &SensitiveOperation) -> ArgumentEvidence {
        let mut evidence = ArgumentEvidence::default();
        let Some(block) = self.blocks.get(&operation.block) else {
            return evidence;
        };
        let window = &block.instructions;
        let Some(index) = window.iter().position(|i| i.offset == operation.offset) else {
            return evidence;
        };

        if operation.opcode == opcodes::SELFDESTRUCT {
            evidence.constant_argument = index
                .checked_sub(1)
                .map_or(false, |prev| opcodes::is_constant_push(window[prev].opcode));
        }

        for back in 1..=self.lookback {
            let Some(i) = index.checked_sub(back) else {
                break;
            };
            if self.detector.is_load(window, i) {
                evidence.tracked_load_in_window = true;
            }
            if opcodes::is_taint_source(window[i].opcode) {
                evidence.input_read_in_window = true;
            }
        }

        let position = path.position(operation.block).unwrap_or(0);
        evidence.tracked_load_earlier_on_path = path.blocks[..position]
            .iter()
            .filter_map(|start| self.blocks.get(start))
            .any(|b| (0..b.instructions.len()).any(|i| self.detector.is_load(&b.instructions, i)));

        evidence
    }

    /// Pair every path with every operation in one of its blocks
    pub fn correlate(
        &self,
        paths: &[TaintPath],
        operations: &[SensitiveOperation],
    ) -> Vec<TaintedSensitiveFlow> {
        let mut flows = Vec::new();
        for path in paths {
            for operation in operations.iter().filter(|op| path.contains_block(op.block)) {
                let evidence = self.evidence(path, operation);
                if let Some(confidence) = rank(&evidence) {
                    flows.push(TaintedSensitiveFlow {
                        path: path.clone(),
                        operation: operation.clone(),
                        confidence,
                        evidence,
                    });
                }
            }
        }
        flows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::blocks::partition;
    use crate::bytecode::disassembler::disassemble;
    use crate::bytecode::storage::AddressingMode;
    use crate::bytecode::taint::ConditionKind;
    use ethers::types::U256;
    use hex_literal::hex;
    use std::collections::BTreeSet;

    fn owner() -> StorageBinding {
        StorageBinding {
            name: "owner".to_string(),
            slot: Some(U256::zero()),
            offset: 0,
            type_label: Some("address".to_string()),
            mode: AddressingMode::Direct,
            note: None,
        }
    }

    fn unguarded(blocks: Vec<usize>) -> TaintPath {
        TaintPath {
            blocks,
            has_condition: false,
            condition_kinds: BTreeSet::<ConditionKind>::new(),
        }
    }

    #[test]
    fn test_rank_table() {
        let none = ArgumentEvidence::default();
        assert_eq!(rank(&none), Some(Confidence::Low));

        let earlier = ArgumentEvidence { tracked_load_earlier_on_path: true, ..none };
        assert_eq!(rank(&earlier), Some(Confidence::Medium));

        let load = ArgumentEvidence { tracked_load_in_window: true, ..earlier };
        assert_eq!(rank(&load), Some(Confidence::High));

        let input = ArgumentEvidence { input_read_in_window: true, ..none };
        assert_eq!(rank(&input), Some(Confidence::High));

        let constant = ArgumentEvidence { constant_argument: true, ..load };
        assert_eq!(rank(&constant), None);
    }

    #[test]
    fn test_locate_with_severities() {
        // PUSH1 0 DUP1 DUP1 CREATE  PUSH1 0 DELEGATECALL  PUSH1 0 SELFDESTRUCT
        let dis = disassemble(&hex!("60008080f06000f46000ff"));
        let blocks = partition(&dis.instructions, dis.code_len);
        let operations = locate(&blocks);

        let found: Vec<_> = operations.iter().map(|op| (op.mnemonic.as_str(), op.severity)).collect();
        assert_eq!(
            found,
            vec![
                ("CREATE", Severity::Medium),
                ("DELEGATECALL", Severity::Critical),
                ("SELFDESTRUCT", Severity::Critical),
            ]
        );
        assert!(operations.iter().all(|op| op.block == 0));
        assert_eq!(Severity::of(opcodes::CALLCODE), Some(Severity::High));
        assert_eq!(Severity::of(opcodes::CALL), None);
    }

    #[test]
    fn test_load_before_selfdestruct_is_high() {
        // CALLER PUSH1 0 SSTORE PUSH1 0 SLOAD SELFDESTRUCT
        let dis = disassemble(&hex!("336000556000" "54ff"));
        let blocks = partition(&dis.instructions, dis.code_len);
        let binding = owner();
        let correlator = FlowCorrelator::new(&blocks, &binding, SlotWindows::default());

        let flows = correlator.correlate(&[unguarded(vec![0])], &locate(&blocks));
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].confidence, Confidence::High);
        assert!(flows[0].evidence.tracked_load_in_window);
    }

    #[test]
    fn test_hardcoded_beneficiary_is_not_a_flow() {
        // CALLER PUSH1 0 SSTORE PUSH20 0x11..11 SELFDESTRUCT
        let dis = disassemble(&hex!(
            "33600055" "731111111111111111111111111111111111111111" "ff"
        ));
        let blocks = partition(&dis.instructions, dis.code_len);
        let binding = owner();
        let correlator = FlowCorrelator::new(&blocks, &binding, SlotWindows::default());

        let flows = correlator.correlate(&[unguarded(vec![0])], &locate(&blocks));
        assert!(flows.is_empty());
    }

    #[test]
    fn test_earlier_load_is_medium_and_nothing_is_low() {
        // 0: PUSH1 0 SLOAD POP PUSH1 7 JUMP  7: JUMPDEST MSIZE DELEGATECALL
        let dis = disassemble(&hex!("60005450600756" "5b59f4"));
        let blocks = partition(&dis.instructions, dis.code_len);
        let binding = owner();
        let operations = locate(&blocks);
        assert_eq!(operations[0].block, 7);

        let correlator = FlowCorrelator::new(&blocks, &binding, SlotWindows::default());
        let flows = correlator.correlate(&[unguarded(vec![0, 7])], &operations);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].confidence, Confidence::Medium);

        let flows = correlator.correlate(&[unguarded(vec![7])], &operations);
        assert_eq!(flows[0].confidence, Confidence::Low);

        // Paths that miss the operation's block are not paired
        let flows = correlator.correlate(&[unguarded(vec![0])], &operations);
        assert!(flows.is_empty());
    }

    #[test]
    fn test_lookback_bounds_the_window() {
        // CALLER POP POP POP MSIZE DELEGATECALL
        let dis = disassemble(&hex!("3350505059f4"));
        let blocks = partition(&dis.instructions, dis.code_len);
        let binding = owner();
        let operations = locate(&blocks);

        let wide = FlowCorrelator::new(&blocks, &binding, SlotWindows::default());
        assert!(wide.evidence(&unguarded(vec![0]), &operations[0]).input_read_in_window);

        let narrow = wide.with_lookback(3);
        assert!(!narrow.evidence(&unguarded(vec![0]), &operations[0]).input_read_in_window);
    }
}
