// Error types
//
// Only collaborator and environment failures are errors. Data-shape problems in
// the bytecode are encoded in the analysis results instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while obtaining a storage layout
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("failed to read layout file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("malformed layout JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognised layout document: expected a `storage` or `contracts` key")]
    UnrecognisedDocument,

    #[error("contract {0} not found in compiler output")]
    ContractNotFound(String),

    #[error("failed to run compiler `{program}`: {source}")]
    CompilerUnavailable { program: String, source: io::Error },

    #[error("compiler exited with {status}: {stderr}")]
    CompilerFailed { status: String, stderr: String },
}

/// Failures of a whole contract analysis
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("analysis of {contract} exceeded the {secs}s budget")]
    Timeout { contract: String, secs: u64 },

    #[error("analysis worker for {0} panicked")]
    WorkerPanicked(String),
}
