// EVM Taint API Module
//
// Unified entry point: runs the bytecode pipeline, attaches layouts from the
// collaborators in `layout`, and wraps results into reports.

mod types;
mod config;
mod report;

pub use types::*;
pub use config::*;
pub use report::*;

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::error::AnalysisError;
use crate::layout::{LayoutSource, SolcCompiler, StorageLayout};

/// One contract to analyze in a batch
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    /// Name used in the report
    pub contract: String,
    /// Hex encoded runtime bytecode
    pub bytecode: String,
    /// Tracked variable names
    pub variables: Vec<String>,
    pub layout: Option<StorageLayout>,
}

impl AnalysisJob {
    pub fn new(contract: impl Into<String>, bytecode: impl Into<String>, variables: Vec<String>) -> Self {
        Self {
            contract: contract.into(),
            bytecode: bytecode.into(),
            variables,
            layout: None,
        }
    }

    pub fn with_layout(mut self, layout: StorageLayout) -> Self {
        self.layout = Some(layout);
        self
    }
}

/// Main API for EVM Taint
///
/// Tracks caller-controlled data into named storage variables and sensitive
/// operations of a contract's runtime bytecode.
///
/// # Examples
///
/// ```
/// use evm_taint::api::TaintVerify;
///
/// let verifier = TaintVerify::new();
///
/// // CALLER PUSH1 0 SSTORE: msg.sender written to slot 0
/// let report = verifier.analyze_hex("Wallet", "0x33600055", &["owner".to_string()], None);
///
/// let owner = report.analysis.variable("owner").unwrap();
/// assert_eq!(owner.paths.len(), 1);
/// assert!(!owner.paths[0].has_condition);
/// ```
pub struct TaintVerify {
    /// Configuration for the analysis
    config: AnalysisConfig,
}

impl Default for TaintVerify {
    fn default() -> Self {
        Self::new()
    }
}

impl TaintVerify {
    /// Create a new instance with default configuration
    pub fn new() -> Self {
        Self {
            config: AnalysisConfig::default(),
        }
    }

    /// Create a new instance with custom configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration to use for analysis
    ///
    /// # Examples
    ///
    /// ```
    /// use evm_taint::api::{TaintVerify, ConfigManager};
    ///
    /// let config = ConfigManager::builder()
    ///     .max_path_len(20)
    ///     .timeout_secs(30)
    ///     .build();
    ///
    /// let verifier = TaintVerify::with_config(config);
    /// assert_eq!(verifier.config().max_path_len, 20);
    /// ```
    pub fn with_config(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze hex encoded runtime bytecode
    ///
    /// Malformed input never fails; it shows up as decoder diagnostics in the
    /// report. Without a layout, slots are assigned by position.
    ///
    /// # Arguments
    ///
    /// * `contract` - Name used in the report
    /// * `bytecode` - Runtime bytecode, with or without `0x` prefix
    /// * `variables` - Tracked variable names, in declaration order when no layout is given
    /// * `layout` - Optional storage layout
    pub fn analyze_hex(
        &self,
        contract: &str,
        bytecode: &str,
        variables: &[String],
        layout: Option<&StorageLayout>,
    ) -> AnalysisReport {
        let analysis = self.config.analyzer().analyze_hex(bytecode, variables, layout);
        AnalysisReport::new(contract, analysis, self.config.clone())
    }

    /// Analyze bytecode with a layout obtained from a collaborator
    ///
    /// A failing collaborator aborts the analysis with its error; callers that
    /// prefer positional slots can retry with [`TaintVerify::analyze_hex`].
    pub fn analyze_with_layout(
        &self,
        contract: &str,
        bytecode: &str,
        variables: &[String],
        source: &dyn LayoutSource,
    ) -> Result<AnalysisReport, AnalysisError> {
        let layout = source.storage_layout()?;
        Ok(self.analyze_hex(contract, bytecode, variables, Some(&layout)))
    }

    /// Compile a Solidity source and analyze the selected contract
    pub fn analyze_solc(
        &self,
        compiler: &SolcCompiler,
        variables: &[String],
    ) -> Result<AnalysisReport, AnalysisError> {
        let output = compiler.compile()?;
        Ok(self.analyze_hex(
            &output.contract,
            &output.runtime_bytecode,
            variables,
            Some(&output.layout),
        ))
    }

    /// Analyze independent contracts in parallel
    ///
    /// Every job runs on its own worker. Results come back in job order; with
    /// `timeout_secs` configured, a job exceeding it yields
    /// [`AnalysisError::Timeout`] and its worker is abandoned.
    pub fn analyze_batch(&self, jobs: Vec<AnalysisJob>) -> Vec<Result<AnalysisReport, AnalysisError>> {
        let started = Instant::now();
        let budget = self.config.timeout_secs.map(Duration::from_secs);
        info!("analyzing {} contracts", jobs.len());

        let workers: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let (tx, rx) = mpsc::channel();
                let verifier = TaintVerify::with_config(self.config.clone());
                let contract = job.contract.clone();
                let handle = thread::spawn(move || {
                    let report =
                        verifier.analyze_hex(&job.contract, &job.bytecode, &job.variables, job.layout.as_ref());
                    let _ = tx.send(report);
                });
                (contract, rx, handle)
            })
            .collect();

        workers
            .into_iter()
            .map(|(contract, rx, handle)| {
                let received = match budget {
                    Some(budget) => rx.recv_timeout(budget.saturating_sub(started.elapsed())),
                    None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };

                match received {
                    Ok(report) => {
                        let _ = handle.join();
                        Ok(report)
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        let secs = self.config.timeout_secs.unwrap_or_default();
                        warn!("{} exceeded the {}s budget, abandoning it", contract, secs);
                        Err(AnalysisError::Timeout { contract, secs })
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        let _ = handle.join();
                        warn!("analysis worker for {} panicked", contract);
                        Err(AnalysisError::WorkerPanicked(contract))
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::taint::Verdict;
    use crate::error::LayoutError;
    use crate::layout::LayoutFile;

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_analyze_hex() {
        let verifier = TaintVerify::new();
        let report = verifier.analyze_hex("Wallet", "33600055", &vars(&["owner"]), None);
        assert_eq!(report.contract, "Wallet");
        assert_eq!(report.contract_size, 4);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].kind, FindingKind::UnguardedWrite);
    }

    #[test]
    fn test_failing_layout_source_is_reported() {
        let verifier = TaintVerify::new();
        let source = LayoutFile::new("/nonexistent/layout.json");
        let result = verifier.analyze_with_layout("Wallet", "33600055", &vars(&["owner"]), &source);
        assert!(matches!(result, Err(AnalysisError::Layout(LayoutError::Io { .. }))));
    }

    #[test]
    fn test_batch_keeps_job_order() {
        let config = ConfigManager::builder().timeout_secs(60).build();
        let verifier = TaintVerify::with_config(config);

        let jobs = vec![
            AnalysisJob::new("Unguarded", "33600055", vars(&["owner"])),
            AnalysisJob::new("Empty", "", vars(&["owner"])),
            AnalysisJob::new("Garbage", "zz", vars(&["owner"])),
            AnalysisJob::new("Guarded", "3380600014600c57600080fd5b60005500", vars(&["owner"])),
        ];
        let results = verifier.analyze_batch(jobs);
        assert_eq!(results.len(), 4);

        let reports: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        let names: Vec<_> = reports.iter().map(|r| r.contract.as_str()).collect();
        assert_eq!(names, vec!["Unguarded", "Empty", "Garbage", "Guarded"]);

        let verdicts: Vec<_> = reports
            .iter()
            .map(|r| r.analysis.variable("owner").map(|v| v.verdict))
            .collect();
        assert_eq!(
            verdicts,
            vec![
                Some(Verdict::Unguarded),
                Some(Verdict::NoTaint),
                Some(Verdict::NoTaint),
                Some(Verdict::Guarded),
            ]
        );
    }

    #[test]
    fn test_batch_timeout() {
        // Hundreds of blocks, each ending in a computed jump wired to every JUMPDEST
        let unit = "5b33600055333556";
        let heavy = unit.repeat(800);

        let config = ConfigManager::builder().timeout_secs(0).build();
        let verifier = TaintVerify::with_config(config);
        let results = verifier.analyze_batch(vec![AnalysisJob::new("Heavy", heavy, vars(&["owner"]))]);

        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(AnalysisError::Timeout { contract, secs }) => {
                assert_eq!(contract, "Heavy");
                assert_eq!(*secs, 0);
            }
            other => panic!("expected a timeout, got {:?}", other.as_ref().map(|r| &r.contract)),
        }
    }
}
