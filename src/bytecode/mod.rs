pub mod analyzer;
pub mod blocks;
pub mod cfg;
pub mod disassembler;
pub mod opcodes;
pub mod sensitive;
pub mod storage;
pub mod taint;
#[cfg(test)]
pub mod tests;

pub use analyzer::{ContractAnalysis, TaintAnalyzer, VariableTaint};
pub use blocks::BasicBlock;
pub use cfg::{ControlFlowGraph, EdgeKind, JumpResolution};
pub use disassembler::{DecodeDiagnostic, Disassembly, Instruction};
pub use sensitive::{Confidence, SensitiveOperation, Severity, TaintedSensitiveFlow};
pub use storage::{AddressingMode, StorageBinding};
pub use taint::{ConditionKind, TaintPath, Verdict};
