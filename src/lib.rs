//! Static taint analysis of EVM runtime bytecode.
//!
//! The [`bytecode`] pipeline decodes a contract, builds its control-flow graph,
//! and searches for paths carrying caller-controlled data into stores of
//! tracked storage variables and into sensitive operations. [`layout`] provides
//! storage layouts, [`api`] wraps everything into reports.

pub mod api;
pub mod bytecode;
pub mod error;
pub mod layout;

pub use api::{AnalysisConfig, AnalysisReport, TaintVerify};
pub use bytecode::{ContractAnalysis, TaintAnalyzer};
pub use error::{AnalysisError, LayoutError};
