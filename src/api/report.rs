// Report Generation for EVM Taint
//
// Renders analysis reports as JSON or plain text.

use crate::api::types::{AnalysisReport, Finding};
use crate::bytecode::analyzer::VariableTaint;
use crate::bytecode::sensitive::Severity;
use anyhow::{bail, Result};
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;
use std::fs;

/// Report formatter for EVM Taint
pub struct ReportFormatter;

impl ReportFormatter {
    /// Format a report as JSON
    pub fn to_json(report: &AnalysisReport) -> Result<String> {
        let json = serde_json::to_string_pretty(report)?;
        Ok(json)
    }

    /// Format a report as plain text
    pub fn to_text(report: &AnalysisReport) -> String {
        let mut output = String::new();
        let analysis = &report.analysis;

        output.push_str("EVM Taint Analysis Report\n");
        output.push_str("=========================\n\n");

        let _ = writeln!(output, "Contract: {}", report.contract);
        let _ = writeln!(output, "Timestamp: {}", report.timestamp);
        let _ = writeln!(output, "Contract Size: {} bytes", report.contract_size);
        let _ = writeln!(output, "Instructions: {}", analysis.instruction_count);
        let _ = writeln!(
            output,
            "Blocks: {} ({} edges, {} approximated, {} unresolved jumps)",
            analysis.block_count, analysis.edge_count, analysis.approximated_edges, analysis.unresolved_jumps
        );
        if !analysis.diagnostics.is_empty() {
            let _ = writeln!(output, "Decoder Diagnostics: {}", analysis.diagnostics.len());
            for diagnostic in &analysis.diagnostics {
                let _ = writeln!(output, "  - {:?}", diagnostic);
            }
        }
        output.push('\n');

        // Findings, grouped by severity
        let _ = writeln!(output, "Findings: {}", report.findings.len());
        output.push_str("---------\n\n");
        for severity in [Severity::Critical, Severity::High, Severity::Medium, Severity::Low] {
            let group: Vec<&Finding> = report.findings.iter().filter(|f| f.severity == severity).collect();
            if !group.is_empty() {
                let _ = writeln!(output, "{}: {} issues", format!("{:?}", severity).to_uppercase(), group.len());
                Self::format_findings(&mut output, &group);
            }
        }

        output.push_str("Variables\n");
        output.push_str("---------\n");
        for variable in &analysis.variables {
            Self::format_variable(&mut output, variable);
        }

        if !analysis.sensitive_operations.is_empty() {
            output.push_str("\nSensitive Operations\n");
            output.push_str("--------------------\n");
            for op in &analysis.sensitive_operations {
                let _ = writeln!(
                    output,
                    "  0x{:04x} {:<13} block 0x{:04x}  {:?}",
                    op.offset, op.mnemonic, op.block, op.severity
                );
            }
        }

        let config = &report.analysis_config;
        output.push_str("\nAnalysis Configuration\n");
        output.push_str("----------------------\n");
        let _ = writeln!(output, "Max Path Length: {}", config.max_path_len);
        let _ = writeln!(output, "Max Block Visits: {}", config.max_block_visits);
        let _ = writeln!(output, "Jump Lookback: {}", config.jump_lookback);
        let _ = writeln!(
            output,
            "Slot Lookback: direct {}, hash {}, base slot {}",
            config.direct_slot_lookback, config.hash_lookback, config.base_slot_lookback
        );
        let _ = writeln!(output, "Argument Lookback: {}", config.argument_lookback);

        output
    }

    /// Format findings for text output
    fn format_findings(output: &mut String, findings: &[&Finding]) {
        for (i, finding) in findings.iter().enumerate() {
            let _ = writeln!(output, "{}. {}", i + 1, finding.title);
            let _ = writeln!(output, "   Kind: {:?}", finding.kind);
            if let Some(confidence) = finding.confidence {
                let _ = writeln!(output, "   Confidence: {:?}", confidence);
            }
            let _ = writeln!(output, "   Description: {}\n", finding.description);
        }
    }

    fn format_variable(output: &mut String, variable: &VariableTaint) {
        let binding = &variable.binding;
        let slot = binding
            .slot
            .map(|s| format!("{}", s))
            .unwrap_or_else(|| "not found".to_string());
        let _ = writeln!(
            output,
            "{} (slot {}, {:?}{}): {:?}",
            binding.name,
            slot,
            binding.mode,
            binding.type_label.as_deref().map(|t| format!(", {}", t)).unwrap_or_default(),
            variable.verdict
        );
        for path in &variable.paths {
            let blocks: Vec<String> = path.blocks.iter().map(|b| format!("0x{:04x}", b)).collect();
            let _ = writeln!(
                output,
                "  path {} {}",
                blocks.join(" -> "),
                if path.has_condition {
                    format!("{:?}", path.condition_kinds)
                } else {
                    "unconditional".to_string()
                }
            );
        }
    }

    /// Save a report to a file
    pub fn save_to_file<P: AsRef<Path>>(report: &AnalysisReport, path: P, format: ReportFormat) -> Result<()> {
        let content = match format {
            ReportFormat::Json => Self::to_json(report)?,
            ReportFormat::Text => Self::to_text(report),
        };

        fs::write(path, content)?;
        Ok(())
    }
}

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// JSON format
    Json,

    /// Plain text format
    Text,
}

impl FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "text" | "txt" => Ok(ReportFormat::Text),
            other => bail!("unknown report format: {}", other),
        }
    }
}
