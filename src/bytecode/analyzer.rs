// Pipeline driver
//
// Runs decoder, partitioner, graph builder, slot resolver, taint engine and
// correlator over one contract and collects their results.

use std::collections::BTreeSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::blocks::{partition, BasicBlock};
use super::cfg::{ControlFlowGraph, DEFAULT_JUMP_LOOKBACK};
use super::disassembler::{disassemble, disassemble_hex, DecodeDiagnostic, Disassembly};
use super::sensitive::{
    locate, FlowCorrelator, SensitiveOperation, TaintedSensitiveFlow, DEFAULT_ARGUMENT_LOOKBACK,
};
use super::storage::{resolve_bindings, SlotWindows, StorageBinding};
use super::taint::{SearchBounds, TaintEngine, TaintPath, Verdict};
use crate::layout::StorageLayout;

/// Result for one tracked variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableTaint {
    pub binding: StorageBinding,
    /// Blocks reading caller or environment data
    pub sources: BTreeSet<usize>,
    /// Blocks storing into the variable
    pub sinks: BTreeSet<usize>,
    /// Union of the blocks on all paths
    pub tainted_blocks: BTreeSet<usize>,
    pub paths: Vec<TaintPath>,
    pub flows: Vec<TaintedSensitiveFlow>,
    pub verdict: Verdict,
}

impl VariableTaint {
    /// Paths without any conditional logic
    pub fn unguarded_paths(&self) -> impl Iterator<Item = &TaintPath> {
        self.paths.iter().filter(|p| !p.has_condition)
    }
}

/// Everything learned about one contract
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAnalysis {
    pub code_len: usize,
    pub instruction_count: usize,
    pub block_count: usize,
    pub edge_count: usize,
    /// Edges added for jumps whose target could not be resolved
    pub approximated_edges: usize,
    pub unresolved_jumps: usize,
    pub diagnostics: Vec<DecodeDiagnostic>,
    pub sensitive_operations: Vec<SensitiveOperation>,
    pub variables: Vec<VariableTaint>,
}

impl ContractAnalysis {
    pub fn variable(&self, name: &str) -> Option<&VariableTaint> {
        self.variables.iter().find(|v| v.binding.name == name)
    }

    /// Variables reachable by taint without a guard
    pub fn unguarded_variables(&self) -> impl Iterator<Item = &VariableTaint> {
        self.variables.iter().filter(|v| v.verdict == Verdict::Unguarded)
    }

    pub fn flow_count(&self) -> usize {
        self.variables.iter().map(|v| v.flows.len()).sum()
    }
}

/// Configurable analysis pipeline
#[derive(Debug, Clone, Copy)]
pub struct TaintAnalyzer {
    bounds: SearchBounds,
    windows: SlotWindows,
    jump_lookback: usize,
    argument_lookback: usize,
}

impl Default for TaintAnalyzer {
    fn default() -> Self {
        Self {
            bounds: SearchBounds::default(),
            windows: SlotWindows::default(),
            jump_lookback: DEFAULT_JUMP_LOOKBACK,
            argument_lookback: DEFAULT_ARGUMENT_LOOKBACK,
        }
    }
}

impl TaintAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_bounds(mut self, bounds: SearchBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_slot_windows(mut self, windows: SlotWindows) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_jump_lookback(mut self, lookback: usize) -> Self {
        self.jump_lookback = lookback;
        self
    }

    pub fn with_argument_lookback(mut self, lookback: usize) -> Self {
        self.argument_lookback = lookback;
        self
    }

    /// Analyze hex encoded runtime bytecode
    pub fn analyze_hex(
        &self,
        bytecode: &str,
        variables: &[String],
        layout: Option<&StorageLayout>,
    ) -> ContractAnalysis {
        self.analyze_disassembly(disassemble_hex(bytecode), variables, layout)
    }

    /// Analyze raw runtime bytecode
    pub fn analyze_code(
        &self,
        code: &[u8],
        variables: &[String],
        layout: Option<&StorageLayout>,
    ) -> ContractAnalysis {
        self.analyze_disassembly(disassemble(code), variables, layout)
    }

    fn analyze_disassembly(
        &self,
        disassembly: Disassembly,
        variables: &[String],
        layout: Option<&StorageLayout>,
    ) -> ContractAnalysis {
        let blocks: Vec<BasicBlock> = partition(&disassembly.instructions, disassembly.code_len);
        let cfg = ControlFlowGraph::build(&blocks, disassembly.code_len, self.jump_lookback);
        debug!(
            "{} instructions, {} blocks, {} edges ({} approximated)",
            disassembly.len(),
            blocks.len(),
            cfg.edge_count(),
            cfg.approximated_edge_count()
        );

        let bindings = resolve_bindings(variables, layout);
        let operations = locate(&blocks);
        let engine = TaintEngine::new(&blocks, &cfg)
            .with_bounds(self.bounds)
            .with_windows(self.windows);

        let results: Vec<VariableTaint> = bindings
            .into_iter()
            .map(|binding| {
                let trace = engine.trace(&binding);
                let flows = FlowCorrelator::new(&blocks, &binding, self.windows)
                    .with_lookback(self.argument_lookback)
                    .correlate(&trace.paths, &operations);
                let verdict = Verdict::of(&binding, &trace.paths);
                let tainted_blocks = trace.tainted_blocks();

                VariableTaint {
                    binding,
                    sources: trace.sources,
                    sinks: trace.sinks,
                    tainted_blocks,
                    paths: trace.paths,
                    flows,
                    verdict,
                }
            })
            .collect();

        let analysis = ContractAnalysis {
            code_len: disassembly.code_len,
            instruction_count: disassembly.len(),
            block_count: blocks.len(),
            edge_count: cfg.edge_count(),
            approximated_edges: cfg.approximated_edge_count(),
            unresolved_jumps: cfg
                .jump_sites()
                .iter()
                .filter(|site| site.resolution.target().is_none())
                .count(),
            diagnostics: disassembly.diagnostics,
            sensitive_operations: operations,
            variables: results,
        };

        info!(
            "analyzed {} bytes: {} sensitive operations, {} unguarded variables, {} tainted flows",
            analysis.code_len,
            analysis.sensitive_operations.len(),
            analysis.unguarded_variables().count(),
            analysis.flow_count()
        );
        analysis
    }
}
