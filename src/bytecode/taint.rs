// Taint Propagation Engine
//
// Breadth-first search from blocks that read caller or environment data to
// blocks that store into a tracked slot. Every path found is classified by the
// conditional logic observed along it.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use log::debug;
use serde::{Deserialize, Serialize};

use super::blocks::BasicBlock;
use super::cfg::ControlFlowGraph;
use super::opcodes;
use super::storage::{SlotDetector, SlotWindows, StorageBinding};

/// Evidence of conditional logic on a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionKind {
    /// A JUMPI somewhere on the path
    ConditionalJump,
    /// LT, GT, SLT, SGT, EQ or ISZERO
    Comparison,
    /// A REVERT somewhere on the path
    RevertGuard,
    /// CALLER or ORIGIN read together with a comparison
    AccessControlPattern,
}

/// Block sequence from a taint source to a tracked store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintPath {
    /// Block start offsets, source first, sink last
    pub blocks: Vec<usize>,
    pub has_condition: bool,
    pub condition_kinds: BTreeSet<ConditionKind>,
}

impl TaintPath {
    /// Classify a block sequence by the instructions it visits
    pub fn classify(blocks: Vec<usize>, by_start: &BTreeMap<usize, &BasicBlock>) -> Self {
        let mut kinds = BTreeSet::new();
        let mut identity_read = false;
        let mut comparison = false;

        let visited: BTreeSet<usize> = blocks.iter().copied().collect();
        for instruction in visited
            .iter()
            .filter_map(|start| by_start.get(start))
            .flat_map(|block| block.instructions.iter())
        {
            let opcode = instruction.opcode;
            if opcode == opcodes::JUMPI {
                kinds.insert(ConditionKind::ConditionalJump);
            }
            if opcode == opcodes::REVERT {
                kinds.insert(ConditionKind::RevertGuard);
            }
            if opcodes::is_comparison(opcode) {
                kinds.insert(ConditionKind::Comparison);
                comparison = true;
            }
            identity_read |= opcodes::is_identity_read(opcode);
        }

        if identity_read && comparison {
            kinds.insert(ConditionKind::AccessControlPattern);
        }

        Self {
            blocks,
            has_condition: !kinds.is_empty(),
            condition_kinds: kinds,
        }
    }

    pub fn sink(&self) -> Option<usize> {
        self.blocks.last().copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains_block(&self, block: usize) -> bool {
        self.blocks.contains(&block)
    }

    /// Position of the first visit to `block`
    pub fn position(&self, block: usize) -> Option<usize> {
        self.blocks.iter().position(|&b| b == block)
    }
}

/// Structural bounds of the path search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchBounds {
    /// Longest path, in blocks
    pub max_path_len: usize,
    /// Times one block may appear in one path
    pub max_block_visits: usize,
}

impl Default for SearchBounds {
    fn default() -> Self {
        Self {
            max_path_len: 50,
            max_block_visits: 2,
        }
    }
}

/// Sources, sinks and paths for one tracked variable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintTrace {
    pub sources: BTreeSet<usize>,
    pub sinks: BTreeSet<usize>,
    pub paths: Vec<TaintPath>,
}

impl TaintTrace {
    /// Union of all blocks on any path
    pub fn tainted_blocks(&self) -> BTreeSet<usize> {
        self.paths.iter().flat_map(|p| p.blocks.iter().copied()).collect()
    }
}

/// Reachability search over one contract's graph
pub struct TaintEngine<'a> {
    blocks: BTreeMap<usize, &'a BasicBlock>,
    cfg: &'a ControlFlowGraph,
    bounds: SearchBounds,
    windows: SlotWindows,
}

impl<'a> TaintEngine<'a> {
    pub fn new(blocks: &'a [BasicBlock], cfg: &'a ControlFlowGraph) -> Self {
        Self {
            blocks: blocks.iter().map(|b| (b.start, b)).collect(),
            cfg,
            bounds: SearchBounds::default(),
            windows: SlotWindows::default(),
        }
    }

    pub fn with_bounds(mut self, bounds: SearchBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_windows(mut self, windows: SlotWindows) -> Self {
        self.windows = windows;
        self
    }

    /// Blocks reading caller-controlled or environment data
    pub fn source_blocks(&self) -> BTreeSet<usize> {
        self.blocks
            .values()
            .filter(|b| b.instructions.iter().any(|i| opcodes::is_taint_source(i.opcode)))
            .map(|b| b.start)
            .collect()
    }

    /// Blocks storing into the binding's slot
    pub fn sink_blocks(&self, binding: &StorageBinding) -> BTreeSet<usize> {
        if !binding.is_found() {
            return BTreeSet::new();
        }

        let detector = SlotDetector::new(binding, self.windows);
        self.blocks
            .values()
            .filter(|b| (0..b.instructions.len()).any(|i| detector.is_store(&b.instructions, i)))
            .map(|b| b.start)
            .collect()
    }

    /// Enumerate paths from any source to any sink.
    ///
    /// Each directed edge is followed once per search, a block appears at most
    /// `max_block_visits` times in a path and no path exceeds `max_path_len`.
    /// A path ends at the first sink it reaches.
    pub fn find_paths(&self, sources: &BTreeSet<usize>, sinks: &BTreeSet<usize>) -> Vec<TaintPath> {
        if sinks.is_empty() || self.bounds.max_path_len == 0 {
            return Vec::new();
        }

        let mut queue: VecDeque<Vec<usize>> = sources
            .iter()
            .filter(|s| self.blocks.contains_key(*s))
            .map(|&s| vec![s])
            .collect();
        let mut traversed: HashSet<(usize, usize)> = HashSet::new();
        let mut found = Vec::new();

        while let Some(path) = queue.pop_front() {
            let Some(&tail) = path.last() else {
                continue;
            };

            if sinks.contains(&tail) {
                found.push(TaintPath::classify(path, &self.blocks));
                continue;
            }
            if path.len() >= self.bounds.max_path_len {
                continue;
            }

            for next in self.cfg.successors(tail) {
                let visits = path.iter().filter(|&&b| b == next).count();
                if visits >= self.bounds.max_block_visits {
                    continue;
                }
                if !traversed.insert((tail, next)) {
                    continue;
                }

                let mut extended = path.clone();
                extended.push(next);
                queue.push_back(extended);
            }
        }

        found
    }

    /// Full trace for one binding
    pub fn trace(&self, binding: &StorageBinding) -> TaintTrace {
        let sources = self.source_blocks();
        let sinks = self.sink_blocks(binding);
        let paths = self.find_paths(&sources, &sinks);

        debug!(
            "{}: {} source blocks, {} sink blocks, {} paths",
            binding.name,
            sources.len(),
            sinks.len(),
            paths.len()
        );

        TaintTrace { sources, sinks, paths }
    }
}

/// Summary of a variable's taint exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// The variable has no slot, nothing was searched
    NotTracked,
    /// No source reaches a store to the variable
    NoTaint,
    /// Every path shows conditional logic
    Guarded,
    /// At least one path shows none
    Unguarded,
}

impl Verdict {
    pub fn of(binding: &StorageBinding, paths: &[TaintPath]) -> Self {
        if !binding.is_found() {
            Verdict::NotTracked
        } else if paths.is_empty() {
            Verdict::NoTaint
        } else if paths.iter().any(|p| !p.has_condition) {
            Verdict::Unguarded
        } else {
            Verdict::Guarded
        }
    }
}
