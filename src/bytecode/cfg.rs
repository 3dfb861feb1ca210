// Control-Flow Graph Builder
//
// Connects basic blocks. Jump targets are resolved statically when a constant
// PUSH feeding the jump can be found; otherwise the jump is connected to every
// JUMPDEST block and those edges are tagged `Approximated`.

use std::collections::{BTreeMap, BTreeSet};

use ethers::types::U256;
use log::debug;
use serde::{Deserialize, Serialize};

use super::blocks::BasicBlock;
use super::disassembler::{stack_origin, Instruction, StackOrigin};
use super::opcodes;

/// Default number of instructions inspected before a jump
pub const DEFAULT_JUMP_LOOKBACK: usize = 10;

/// How an edge was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Straight-line flow or the not-taken side of a JUMPI
    Fallthrough,
    /// Jump with a statically resolved constant target
    Resolved,
    /// Over-approximation for a jump whose target could not be resolved
    Approximated,
}

/// Directed edge to a block start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub target: usize,
    pub kind: EdgeKind,
}

/// Why a jump target stayed unresolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnresolvedReason {
    /// No constant push within the lookback window
    NoConstant,
    /// An instruction at this offset computes the value on top of the stack
    ComputedTarget { offset: usize },
    /// The nearest constant is not the offset of a JUMPDEST inside the code
    InvalidTarget { value: U256 },
}

/// Outcome of static target resolution for one jump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpResolution {
    Resolved { target: usize },
    Unresolved { reason: UnresolvedReason },
}

impl JumpResolution {
    pub fn target(&self) -> Option<usize> {
        match self {
            JumpResolution::Resolved { target } => Some(*target),
            JumpResolution::Unresolved { .. } => None,
        }
    }
}

/// A JUMP or JUMPI and how its target was resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpSite {
    /// Offset of the jump instruction
    pub offset: usize,
    /// Start of the enclosing block
    pub block: usize,
    /// JUMPI rather than JUMP
    pub conditional: bool,
    pub resolution: JumpResolution,
}

/// Block-level control-flow graph keyed by block start offset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlFlowGraph {
    /// Successors of every block, each tagged with its edge kind
    edges: BTreeMap<usize, BTreeMap<usize, EdgeKind>>,
    /// Start offsets of blocks beginning with JUMPDEST
    jumpdests: BTreeSet<usize>,
    /// Every jump with its resolution record
    jumps: Vec<JumpSite>,
}

/// Look backwards from the jump at `jump_index` for the constant it jumps to.
///
/// The target is the item on top of the stack at the jump. It is followed back
/// through DUPn, SWAPn and unrelated stack traffic; a constant push resolves it,
/// any other producer makes the target unresolvable.
pub fn resolve_jump_target(
    instructions: &[Instruction],
    jump_index: usize,
    code_len: usize,
    jumpdests: &BTreeSet<usize>,
    lookback: usize,
) -> JumpResolution {
    match stack_origin(instructions, jump_index, 0, lookback) {
        StackOrigin::Constant(value) => {
            let valid = value < U256::from(code_len) && jumpdests.contains(&value.as_usize());
            if valid {
                JumpResolution::Resolved {
                    target: value.as_usize(),
                }
            } else {
                JumpResolution::Unresolved {
                    reason: UnresolvedReason::InvalidTarget { value },
                }
            }
        }
        StackOrigin::Computed { offset } => JumpResolution::Unresolved {
            reason: UnresolvedReason::ComputedTarget { offset },
        },
        StackOrigin::Unknown => JumpResolution::Unresolved {
            reason: UnresolvedReason::NoConstant,
        },
    }
}

impl ControlFlowGraph {
    /// Build the graph from an ordered block partition
    pub fn build(blocks: &[BasicBlock], code_len: usize, lookback: usize) -> Self {
        let jumpdests: BTreeSet<usize> = blocks
            .iter()
            .filter(|b| b.is_jumpdest())
            .map(|b| b.start)
            .collect();

        let mut cfg = Self {
            edges: blocks.iter().map(|b| (b.start, BTreeMap::new())).collect(),
            jumpdests,
            jumps: Vec::new(),
        };

        for (i, block) in blocks.iter().enumerate() {
            let Some(last) = block.terminator() else {
                continue;
            };
            let next = blocks.get(i + 1).map(|b| b.start);

            if opcodes::is_jump(last.opcode) {
                let conditional = last.is(opcodes::JUMPI);
                if conditional {
                    if let Some(next) = next {
                        cfg.add_edge(block.start, next, EdgeKind::Fallthrough);
                    }
                }

                let resolution = resolve_jump_target(
                    &block.instructions,
                    block.instructions.len() - 1,
                    code_len,
                    &cfg.jumpdests,
                    lookback,
                );
                match resolution.target() {
                    Some(target) => cfg.add_edge(block.start, target, EdgeKind::Resolved),
                    None => {
                        debug!(
                            "unresolved jump at 0x{:x}, connecting to {} jumpdests",
                            last.offset,
                            cfg.jumpdests.len()
                        );
                        let targets: Vec<usize> = cfg.jumpdests.iter().copied().collect();
                        for target in targets {
                            cfg.add_edge(block.start, target, EdgeKind::Approximated);
                        }
                    }
                }

                cfg.jumps.push(JumpSite {
                    offset: last.offset,
                    block: block.start,
                    conditional,
                    resolution,
                });
            } else if !opcodes::is_terminal(last.opcode) {
                if let Some(next) = next {
                    cfg.add_edge(block.start, next, EdgeKind::Fallthrough);
                }
            }
        }

        debug!(
            "cfg: {} blocks, {} edges ({} approximated), {} jumps",
            blocks.len(),
            cfg.edge_count(),
            cfg.approximated_edge_count(),
            cfg.jumps.len()
        );
        cfg
    }

    /// Insert an edge, keeping the more precise kind when one already exists
    fn add_edge(&mut self, from: usize, to: usize, kind: EdgeKind) {
        let successors = self.edges.entry(from).or_default();
        successors
            .entry(to)
            .and_modify(|existing| *existing = (*existing).min(kind))
            .or_insert(kind);
    }

    /// Successor block starts of `block`
    pub fn successors(&self, block: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .get(&block)
            .into_iter()
            .flat_map(|succ| succ.keys().copied())
    }

    /// Outgoing edges of `block` with their kinds
    pub fn edges(&self, block: usize) -> impl Iterator<Item = Edge> + '_ {
        self.edges.get(&block).into_iter().flat_map(|succ| {
            succ.iter().map(|(&target, &kind)| Edge { target, kind })
        })
    }

    /// Kind of the edge `from -> to`, if present
    pub fn edge_kind(&self, from: usize, to: usize) -> Option<EdgeKind> {
        self.edges.get(&from).and_then(|succ| succ.get(&to)).copied()
    }

    pub fn contains_block(&self, block: usize) -> bool {
        self.edges.contains_key(&block)
    }

    /// Block starts in ascending order
    pub fn block_starts(&self) -> impl Iterator<Item = usize> + '_ {
        self.edges.keys().copied()
    }

    pub fn jumpdests(&self) -> &BTreeSet<usize> {
        &self.jumpdests
    }

    pub fn jump_sites(&self) -> &[JumpSite] {
        &self.jumps
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    pub fn approximated_edge_count(&self) -> usize {
        self.edges
            .values()
            .flat_map(BTreeMap::values)
            .filter(|&&kind| kind == EdgeKind::Approximated)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::blocks::partition;
    use crate::bytecode::disassembler::disassemble;
    use hex_literal::hex;

    fn cfg_of(code: &[u8]) -> (Vec<BasicBlock>, ControlFlowGraph) {
        let dis = disassemble(code);
        let blocks = partition(&dis.instructions, dis.code_len);
        let cfg = ControlFlowGraph::build(&blocks, dis.code_len, DEFAULT_JUMP_LOOKBACK);
        (blocks, cfg)
    }

    fn successors(cfg: &ControlFlowGraph, block: usize) -> Vec<usize> {
        cfg.successors(block).collect()
    }

    #[test]
    fn test_resolved_unconditional_jump() {
        // 0: PUSH1 0x04  2: JUMP  3: STOP  4: JUMPDEST  5: STOP
        let (_, cfg) = cfg_of(&hex!("600456005b00"));
        assert_eq!(successors(&cfg, 0), vec![4]);
        assert_eq!(cfg.edge_kind(0, 4), Some(EdgeKind::Resolved));
        assert!(successors(&cfg, 3).is_empty());
        assert!(successors(&cfg, 4).is_empty());
    }

    #[test]
    fn test_conditional_jump_keeps_fallthrough() {
        // 0: PUSH1 0x06  2: JUMPI  3: PUSH1 0  5: STOP  6: JUMPDEST  7: STOP
        let (_, cfg) = cfg_of(&hex!("6006576000005b00"));
        assert_eq!(successors(&cfg, 0), vec![3, 6]);
        assert_eq!(cfg.edge_kind(0, 3), Some(EdgeKind::Fallthrough));
        assert_eq!(cfg.edge_kind(0, 6), Some(EdgeKind::Resolved));
        assert!(cfg.jump_sites()[0].conditional);
    }

    #[test]
    fn test_unresolved_jump_is_approximated() {
        // 0: CALLDATALOAD JUMP  2: JUMPDEST STOP  4: JUMPDEST STOP
        let (_, cfg) = cfg_of(&hex!("35565b005b00"));
        assert_eq!(successors(&cfg, 0), vec![2, 4]);
        assert_eq!(cfg.approximated_edge_count(), 2);
        assert_eq!(
            cfg.jump_sites()[0].resolution,
            JumpResolution::Unresolved {
                reason: UnresolvedReason::ComputedTarget { offset: 0 }
            }
        );
    }

    #[test]
    fn test_stack_shuffles_do_not_block_resolution() {
        // PUSH1 0x05 DUP1 SWAP1 JUMP JUMPDEST STOP
        let (_, cfg) = cfg_of(&hex!("60058090565b00"));
        assert_eq!(successors(&cfg, 0), vec![5]);
        assert_eq!(cfg.edge_kind(0, 5), Some(EdgeKind::Resolved));
    }

    #[test]
    fn test_target_is_the_item_on_top_of_the_stack() {
        // 0: PUSH1 0x08  2: PUSH1 0x06  4: SWAP1  5: JUMP  6: JUMPDEST STOP  8: JUMPDEST STOP
        let (_, cfg) = cfg_of(&hex!("6008600690565b005b00"));
        assert_eq!(successors(&cfg, 0), vec![8]);
        assert_eq!(cfg.edge_kind(0, 8), Some(EdgeKind::Resolved));
    }

    #[test]
    fn test_target_pushed_before_the_block_is_unresolved() {
        // 0: JUMPDEST JUMP, the target comes from whoever jumped here
        let (_, cfg) = cfg_of(&hex!("5b56"));
        assert_eq!(
            cfg.jump_sites()[0].resolution,
            JumpResolution::Unresolved {
                reason: UnresolvedReason::NoConstant
            }
        );
        assert_eq!(cfg.edge_kind(0, 0), Some(EdgeKind::Approximated));
    }

    #[test]
    fn test_push_to_non_jumpdest_is_unresolved() {
        // PUSH1 0x03 JUMP STOP JUMPDEST STOP: 3 is a STOP, not a JUMPDEST
        let (_, cfg) = cfg_of(&hex!("600356005b00"));
        assert_eq!(cfg.edge_kind(0, 4), Some(EdgeKind::Approximated));
        assert!(matches!(
            cfg.jump_sites()[0].resolution,
            JumpResolution::Unresolved {
                reason: UnresolvedReason::InvalidTarget { .. }
            }
        ));
    }

    #[test]
    fn test_terminal_blocks_have_no_edges() {
        // CALLER PUSH1 0 SSTORE STOP | JUMPDEST REVERT | JUMPDEST SELFDESTRUCT | JUMPDEST INVALID
        let (blocks, cfg) = cfg_of(&hex!("3360005500 5bfd 5bff 5bfe"));
        for block in &blocks {
            assert_eq!(cfg.successors(block.start).count(), 0);
        }
    }

    #[test]
    fn test_straight_line_fallthrough_into_jumpdest() {
        // PUSH1 1 POP JUMPDEST STOP
        let (_, cfg) = cfg_of(&hex!("6001505b00"));
        assert_eq!(successors(&cfg, 0), vec![3]);
        assert_eq!(cfg.edge_kind(0, 3), Some(EdgeKind::Fallthrough));
    }
}
