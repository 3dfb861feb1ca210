// Storage Layout
//
// Model of the solc `storageLayout` document and the sources it can come from:
// an in-memory layout, a JSON file on disk, or a `solc` invocation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use ethers::types::U256;
use log::{debug, info};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::LayoutError;

/// One state variable in the layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    /// Variable name
    pub label: String,
    /// Base slot
    #[serde(deserialize_with = "deserialize_slot")]
    pub slot: U256,
    /// Byte offset inside the slot for packed variables
    #[serde(default)]
    pub offset: u8,
    /// Key into the layout's type table
    #[serde(rename = "type")]
    pub type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
}

/// Entry of the layout's type table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// `inplace`, `mapping`, `dynamic_array` or `bytes`
    pub encoding: String,
    /// Human readable type, e.g. `mapping(address => uint256)`
    pub label: String,
    #[serde(rename = "numberOfBytes", default, skip_serializing_if = "Option::is_none")]
    pub number_of_bytes: Option<String>,
}

/// Storage layout as produced by `solc --storage-layout`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    #[serde(default)]
    pub storage: Vec<StorageEntry>,
    /// solc emits `null` when there are no state variables
    #[serde(default)]
    pub types: Option<BTreeMap<String, TypeDescriptor>>,
}

/// Encoding of a variable's storage, as far as addressing is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Inplace,
    Mapping,
    DynamicArray,
    Bytes,
}

/// Accept slots written as decimal strings (solc), `0x` hex strings or integers
fn deserialize_slot<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(U256::from(n)),
        Repr::Text(text) => {
            let text = text.trim();
            let parsed = match text.strip_prefix("0x") {
                Some(hex) => U256::from_str_radix(hex, 16).ok(),
                None => U256::from_dec_str(text).ok(),
            };
            parsed.ok_or_else(|| serde::de::Error::custom(format!("invalid slot {text:?}")))
        }
    }
}

impl StorageLayout {
    /// Parse a layout document, either a bare `{storage, types}` object or
    /// solc `--combined-json` output (the first contract with a layout is used)
    pub fn from_json(text: &str) -> Result<Self, LayoutError> {
        let document: Value = serde_json::from_str(text)?;
        Self::from_value(document, None)
    }

    fn from_value(document: Value, contract: Option<&str>) -> Result<Self, LayoutError> {
        if document.get("storage").is_some() {
            return Ok(serde_json::from_value(document)?);
        }
        if document.get("contracts").is_some() {
            return Ok(CompilerOutput::from_combined_json(document, contract)?.layout);
        }
        Err(LayoutError::UnrecognisedDocument)
    }

    /// Entry for a variable name
    pub fn entry(&self, label: &str) -> Option<&StorageEntry> {
        self.storage.iter().find(|e| e.label == label)
    }

    /// Type table entry for a variable
    pub fn type_of(&self, entry: &StorageEntry) -> Option<&TypeDescriptor> {
        self.types.as_ref().and_then(|types| types.get(&entry.type_id))
    }

    /// Human readable type of a variable, falling back to the type id
    pub fn type_label(&self, entry: &StorageEntry) -> String {
        self.type_of(entry)
            .map(|t| t.label.clone())
            .unwrap_or_else(|| entry.type_id.clone())
    }

    /// Storage encoding of a variable.
    ///
    /// Uses the type table when present, otherwise the shape of the type label.
    pub fn encoding(&self, entry: &StorageEntry) -> Encoding {
        if let Some(descriptor) = self.type_of(entry) {
            match descriptor.encoding.as_str() {
                "mapping" => return Encoding::Mapping,
                "dynamic_array" => return Encoding::DynamicArray,
                "bytes" => return Encoding::Bytes,
                "inplace" => return Encoding::Inplace,
                _ => {}
            }
        }

        let label = self.type_label(entry);
        if label.starts_with("mapping(") || label.starts_with("t_mapping(") {
            Encoding::Mapping
        } else if label.ends_with("[]") || label.ends_with("dyn_storage") {
            Encoding::DynamicArray
        } else {
            Encoding::Inplace
        }
    }
}

/// Runtime bytecode and layout of one compiled contract
#[derive(Debug, Clone)]
pub struct CompilerOutput {
    /// Fully qualified contract name (`path:Name`)
    pub contract: String,
    /// Hex encoded runtime bytecode
    pub runtime_bytecode: String,
    pub layout: StorageLayout,
}

impl CompilerOutput {
    /// Select a contract from solc `--combined-json bin-runtime,storage-layout` output.
    ///
    /// With no name the last contract that has runtime code is taken.
    pub fn from_combined_json(document: Value, contract: Option<&str>) -> Result<Self, LayoutError> {
        let contracts = document
            .get("contracts")
            .and_then(Value::as_object)
            .ok_or(LayoutError::UnrecognisedDocument)?;

        let matches_name = |key: &str| match contract {
            Some(name) => key == name || key.rsplit(':').next() == Some(name),
            None => true,
        };
        let has_code = |value: &Value| {
            value
                .get("bin-runtime")
                .and_then(Value::as_str)
                .map_or(false, |code| !code.is_empty())
        };

        let (key, value) = contracts
            .iter()
            .filter(|(key, value)| matches_name(key) && (contract.is_some() || has_code(value)))
            .last()
            .ok_or_else(|| LayoutError::ContractNotFound(contract.unwrap_or("<any>").to_string()))?;

        // Older solc versions embed the layout as a JSON string
        let layout = match value.get("storage-layout") {
            Some(Value::String(text)) => serde_json::from_str(text)?,
            Some(layout @ Value::Object(_)) => serde_json::from_value(layout.clone())?,
            _ => StorageLayout::default(),
        };
        let runtime_bytecode = value
            .get("bin-runtime")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        debug!("selected {} ({} state variables)", key, layout.storage.len());
        Ok(Self {
            contract: key.clone(),
            runtime_bytecode,
            layout,
        })
    }
}

/// Something that can provide a storage layout
pub trait LayoutSource {
    fn storage_layout(&self) -> Result<StorageLayout, LayoutError>;
}

impl LayoutSource for StorageLayout {
    fn storage_layout(&self) -> Result<StorageLayout, LayoutError> {
        Ok(self.clone())
    }
}

/// Layout stored as JSON on disk
#[derive(Debug, Clone)]
pub struct LayoutFile {
    pub path: PathBuf,
    /// Contract to select when the file is combined compiler output
    pub contract: Option<String>,
}

impl LayoutFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            contract: None,
        }
    }

    pub fn with_contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }
}

impl LayoutSource for LayoutFile {
    fn storage_layout(&self) -> Result<StorageLayout, LayoutError> {
        let text = fs::read_to_string(&self.path).map_err(|source| LayoutError::Io {
            path: self.path.clone(),
            source,
        })?;
        let document: Value = serde_json::from_str(&text)?;
        StorageLayout::from_value(document, self.contract.as_deref())
    }
}

/// Runs the Solidity compiler to obtain runtime bytecode and layout
#[derive(Debug, Clone)]
pub struct SolcCompiler {
    /// Compiler executable
    pub program: String,
    /// Solidity source file
    pub source: PathBuf,
    pub contract: Option<String>,
}

impl SolcCompiler {
    pub fn new<P: AsRef<Path>>(source: P) -> Self {
        Self {
            program: "solc".to_string(),
            source: source.as_ref().to_path_buf(),
            contract: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    /// Compile the source and select the contract
    pub fn compile(&self) -> Result<CompilerOutput, LayoutError> {
        info!("compiling {} with {}", self.source.display(), self.program);
        let output = Command::new(&self.program)
            .arg("--combined-json")
            .arg("bin-runtime,storage-layout")
            .arg(&self.source)
            .output()
            .map_err(|source| LayoutError::CompilerUnavailable {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(LayoutError::CompilerFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let document: Value = serde_json::from_slice(&output.stdout)?;
        CompilerOutput::from_combined_json(document, self.contract.as_deref())
    }
}

impl LayoutSource for SolcCompiler {
    fn storage_layout(&self) -> Result<StorageLayout, LayoutError> {
        Ok(self.compile()?.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const LAYOUT_JSON: &str = r#"{
        "storage": [
            {"astId": 3, "contract": "Bank.sol:Bank", "label": "owner", "offset": 0, "slot": "0", "type": "t_address"},
            {"astId": 7, "contract": "Bank.sol:Bank", "label": "balances", "offset": 0, "slot": "1", "type": "t_mapping(t_address,t_uint256)"},
            {"astId": 10, "contract": "Bank.sol:Bank", "label": "admins", "offset": 0, "slot": "2", "type": "t_array(t_address)dyn_storage"},
            {"astId": 12, "contract": "Bank.sol:Bank", "label": "paused", "offset": 20, "slot": "0", "type": "t_bool"}
        ],
        "types": {
            "t_address": {"encoding": "inplace", "label": "address", "numberOfBytes": "20"},
            "t_bool": {"encoding": "inplace", "label": "bool", "numberOfBytes": "1"},
            "t_mapping(t_address,t_uint256)": {"encoding": "mapping", "key": "t_address", "label": "mapping(address => uint256)", "numberOfBytes": "32", "value": "t_uint256"},
            "t_array(t_address)dyn_storage": {"base": "t_address", "encoding": "dynamic_array", "label": "address[]", "numberOfBytes": "32"}
        }
    }"#;

    #[test]
    fn test_parse_solc_layout() {
        let layout = StorageLayout::from_json(LAYOUT_JSON).unwrap();
        assert_eq!(layout.storage.len(), 4);

        let balances = layout.entry("balances").unwrap();
        assert_eq!(balances.slot, U256::from(1));
        assert_eq!(layout.encoding(balances), Encoding::Mapping);
        assert_eq!(layout.type_label(balances), "mapping(address => uint256)");

        let admins = layout.entry("admins").unwrap();
        assert_eq!(layout.encoding(admins), Encoding::DynamicArray);

        let paused = layout.entry("paused").unwrap();
        assert_eq!(paused.offset, 20);
        assert_eq!(layout.encoding(paused), Encoding::Inplace);
    }

    #[test]
    fn test_encoding_without_type_table() {
        let layout = StorageLayout::from_json(
            r#"{"storage": [{"label": "m", "slot": "0x3", "type": "mapping(uint256 => bool)"}], "types": null}"#,
        )
        .unwrap();
        let entry = layout.entry("m").unwrap();
        assert_eq!(entry.slot, U256::from(3));
        assert_eq!(layout.encoding(entry), Encoding::Mapping);
    }

    #[test]
    fn test_combined_json_selection() {
        let document = serde_json::json!({
            "contracts": {
                "Bank.sol:Base": {"bin-runtime": "", "storage-layout": {"storage": [], "types": null}},
                "Bank.sol:Bank": {
                    "bin-runtime": "6080604052",
                    "storage-layout": LAYOUT_JSON
                }
            },
            "version": "0.8.19"
        });

        let output = CompilerOutput::from_combined_json(document.clone(), None).unwrap();
        assert_eq!(output.contract, "Bank.sol:Bank");
        assert_eq!(output.runtime_bytecode, "6080604052");
        assert!(output.layout.entry("owner").is_some());

        let base = CompilerOutput::from_combined_json(document.clone(), Some("Base")).unwrap();
        assert!(base.layout.storage.is_empty());

        let missing = CompilerOutput::from_combined_json(document, Some("Vault"));
        assert!(matches!(missing, Err(LayoutError::ContractNotFound(name)) if name == "Vault"));
    }

    #[test]
    fn test_layout_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LAYOUT_JSON.as_bytes()).unwrap();

        let layout = LayoutFile::new(file.path()).storage_layout().unwrap();
        assert_eq!(layout.storage.len(), 4);

        let missing = LayoutFile::new("/nonexistent/layout.json").storage_layout();
        assert!(matches!(missing, Err(LayoutError::Io { .. })));
    }

    #[test]
    fn test_unrecognised_document() {
        let result = StorageLayout::from_json(r#"{"abi": []}"#);
        assert!(matches!(result, Err(LayoutError::UnrecognisedDocument)));
    }

    #[test]
    fn test_missing_compiler_is_a_named_failure() {
        let result = SolcCompiler::new("Bank.sol")
            .with_program("definitely-not-a-solc-binary")
            .compile();
        assert!(matches!(result, Err(LayoutError::CompilerUnavailable { .. })));
    }
}
