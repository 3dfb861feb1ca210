// EVM Taint CLI
//
// Command-line interface for the taint analyzer.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use evm_taint::api::{AnalysisConfig, ConfigManager, ReportFormat, ReportFormatter, TaintVerify};
use evm_taint::layout::{LayoutFile, SolcCompiler};
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};

/// EVM Taint - tracks caller-controlled data into contract storage
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a contract's runtime bytecode
    Analyze {
        /// Path to the bytecode file or hex string
        #[clap(short, long)]
        input: Option<String>,

        /// Tracked variable names, comma separated
        #[clap(short, long, value_delimiter = ',', required = true)]
        vars: Vec<String>,

        /// Storage layout JSON (solc storageLayout or --combined-json output)
        #[clap(long)]
        layout: Option<PathBuf>,

        /// Solidity source to compile instead of reading bytecode
        #[clap(long, conflicts_with = "input")]
        solc: Option<PathBuf>,

        /// Contract to select from compiler output
        #[clap(long)]
        contract: Option<String>,

        /// Fall back to positional slots when the layout cannot be loaded
        #[clap(long)]
        positional_fallback: bool,

        /// Output format (json, text)
        #[clap(short, long, default_value = "text")]
        format: String,

        /// Output file path
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Path to configuration file
        #[clap(short, long)]
        config: Option<PathBuf>,
    },

    /// Generate a default configuration file
    Config {
        /// Output file path
        #[clap(short, long)]
        output: PathBuf,
    },
}

/// Accept either a hex string or a path to a file holding one
fn read_bytecode(input: &str) -> Result<String> {
    let body = input.strip_prefix("0x").unwrap_or(input);
    if !body.is_empty() && body.chars().all(|c| c.is_ascii_hexdigit()) && !Path::new(input).exists() {
        return Ok(input.to_string());
    }
    let text = fs::read_to_string(input)
        .with_context(|| format!("Failed to read bytecode file {}", input))?;
    Ok(text.trim().to_string())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            vars,
            layout,
            solc,
            contract,
            positional_fallback,
            format,
            output,
            config,
        } => {
            let report_format: ReportFormat = format.parse()?;

            // Load configuration if provided
            let verifier = if let Some(config_path) = config {
                let config = ConfigManager::load_from_file(&config_path)
                    .context("Failed to load configuration")?;
                TaintVerify::with_config(config)
            } else {
                TaintVerify::new()
            };

            let report = if let Some(source) = solc {
                let mut compiler = SolcCompiler::new(&source);
                if let Some(name) = contract {
                    compiler = compiler.with_contract(name);
                }
                verifier
                    .analyze_solc(&compiler, &vars)
                    .with_context(|| format!("Failed to analyze {}", source.display()))?
            } else {
                let Some(input) = input else {
                    bail!("either --input or --solc is required");
                };
                let bytecode = read_bytecode(&input)?;
                let name = contract.clone().unwrap_or_else(|| input.clone());

                match layout {
                    Some(layout_path) => {
                        let mut source = LayoutFile::new(&layout_path);
                        if let Some(name) = &contract {
                            source = source.with_contract(name.clone());
                        }
                        match verifier.analyze_with_layout(&name, &bytecode, &vars, &source) {
                            Ok(report) => report,
                            Err(e) if positional_fallback => {
                                warn!("{}; falling back to positional slots", e);
                                verifier.analyze_hex(&name, &bytecode, &vars, None)
                            }
                            Err(e) => return Err(e).context("Failed to load storage layout"),
                        }
                    }
                    None => verifier.analyze_hex(&name, &bytecode, &vars, None),
                }
            };

            // Generate and output the report
            if let Some(output_path) = output {
                ReportFormatter::save_to_file(&report, &output_path, report_format)
                    .context("Failed to save report")?;
                println!("Report saved to {:?}", output_path);
            } else {
                let report_str = match report_format {
                    ReportFormat::Json => ReportFormatter::to_json(&report)?,
                    ReportFormat::Text => ReportFormatter::to_text(&report),
                };
                println!("{}", report_str);
            }

            Ok(())
        }
        Commands::Config { output } => {
            let config = AnalysisConfig::default();
            ConfigManager::save_to_file(&config, &output)
                .context("Failed to save configuration")?;
            println!("Default configuration saved to {:?}", output);
            Ok(())
        }
    }
}
