// API Types for EVM Taint
//
// Report records and the analysis configuration.

use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};

use crate::bytecode::analyzer::{ContractAnalysis, TaintAnalyzer};
use crate::bytecode::sensitive::{Confidence, Severity};
use crate::bytecode::storage::SlotWindows;
use crate::bytecode::taint::{SearchBounds, Verdict};

/// Analysis report for one contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Timestamp when the analysis was performed
    pub timestamp: DateTime<Utc>,

    /// Contract name, or the input it was read from
    pub contract: String,

    /// Size of the runtime bytecode
    pub contract_size: usize,

    /// Notable results, most severe first
    pub findings: Vec<Finding>,

    /// Full pipeline output
    pub analysis: ContractAnalysis,

    /// Configuration used for the analysis
    pub analysis_config: AnalysisConfig,
}

impl AnalysisReport {
    /// Build a report from a finished analysis
    pub fn new(contract: impl Into<String>, analysis: ContractAnalysis, config: AnalysisConfig) -> Self {
        let findings = Finding::collect(&analysis);
        Self {
            timestamp: Utc::now(),
            contract: contract.into(),
            contract_size: analysis.code_len,
            findings,
            analysis,
            analysis_config: config,
        }
    }

    /// Highest severity among the findings
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

/// Kind of a finding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FindingKind {
    /// Tainted data reaches a store to the variable without any condition
    UnguardedWrite,
    /// Tainted data reaches a store only through conditional logic
    GuardedWrite,
    /// A tainted value feeds a sensitive operation
    TaintedSensitiveFlow,
}

/// One reportable result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub kind: FindingKind,
    /// Variable the finding is about
    pub variable: String,
    /// Bytecode offset, for findings tied to one instruction
    pub offset: Option<usize>,
    pub confidence: Option<Confidence>,
}

impl Finding {
    /// Derive findings from an analysis, most severe first
    pub fn collect(analysis: &ContractAnalysis) -> Vec<Finding> {
        let mut findings = Vec::new();

        for variable in &analysis.variables {
            let name = &variable.binding.name;
            match variable.verdict {
                Verdict::Unguarded => findings.push(Finding {
                    title: format!("Unguarded write to {}", name),
                    description: format!(
                        "{} of {} taint paths reach a store to {} without any conditional logic",
                        variable.unguarded_paths().count(),
                        variable.paths.len(),
                        name
                    ),
                    severity: Severity::High,
                    kind: FindingKind::UnguardedWrite,
                    variable: name.clone(),
                    offset: None,
                    confidence: None,
                }),
                Verdict::Guarded => findings.push(Finding {
                    title: format!("Guarded write to {}", name),
                    description: format!(
                        "{} taint paths reach a store to {}, all through conditional logic",
                        variable.paths.len(),
                        name
                    ),
                    severity: Severity::Low,
                    kind: FindingKind::GuardedWrite,
                    variable: name.clone(),
                    offset: None,
                    confidence: None,
                }),
                Verdict::NoTaint | Verdict::NotTracked => {}
            }

            // One finding per operation, keeping the most confident pairing
            let mut flows: Vec<_> = variable.flows.iter().collect();
            flows.sort_by(|a, b| {
                a.operation
                    .offset
                    .cmp(&b.operation.offset)
                    .then(b.confidence.cmp(&a.confidence))
            });
            flows.dedup_by_key(|flow| flow.operation.offset);

            for flow in flows {
                findings.push(Finding {
                    title: format!("{} reachable from tainted {}", flow.operation.mnemonic, name),
                    description: format!(
                        "{} at 0x{:x} lies on a taint path into {}; argument taint confidence {:?}",
                        flow.operation.mnemonic, flow.operation.offset, name, flow.confidence
                    ),
                    severity: flow.operation.severity,
                    kind: FindingKind::TaintedSensitiveFlow,
                    variable: name.clone(),
                    offset: Some(flow.operation.offset),
                    confidence: Some(flow.confidence),
                });
            }
        }

        findings.sort_by(|a, b| b.severity.cmp(&a.severity));
        findings
    }
}

/// Configuration for the analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Longest taint path, in blocks
    pub max_path_len: usize,

    /// Times one block may appear in one path
    pub max_block_visits: usize,

    /// Instructions inspected before a jump for its constant target
    pub jump_lookback: usize,

    /// Instructions inspected before SLOAD/SSTORE for a constant slot
    pub direct_slot_lookback: usize,

    /// Instructions inspected before SLOAD/SSTORE for a SHA3
    pub hash_lookback: usize,

    /// Instructions inspected before the SHA3 for the base slot
    pub base_slot_lookback: usize,

    /// Instructions inspected before a sensitive operation for its argument
    pub argument_lookback: usize,

    /// Wall-clock budget per contract in batch analysis
    pub timeout_secs: Option<u64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_path_len: 50,
            max_block_visits: 2,
            jump_lookback: 10,
            direct_slot_lookback: 5,
            hash_lookback: 20,
            base_slot_lookback: 15,
            argument_lookback: 20,
            timeout_secs: None,
        }
    }
}

impl AnalysisConfig {
    /// Pipeline configured with these bounds
    pub fn analyzer(&self) -> TaintAnalyzer {
        TaintAnalyzer::new()
            .with_search_bounds(SearchBounds {
                max_path_len: self.max_path_len,
                max_block_visits: self.max_block_visits,
            })
            .with_slot_windows(SlotWindows {
                direct: self.direct_slot_lookback,
                hash: self.hash_lookback,
                base_slot: self.base_slot_lookback,
            })
            .with_jump_lookback(self.jump_lookback)
            .with_argument_lookback(self.argument_lookback)
    }
}
