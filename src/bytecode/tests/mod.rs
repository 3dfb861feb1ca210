use crate::bytecode::TaintAnalyzer;
use crate::layout::StorageLayout;


/// Owned variable list from string literals
pub(crate) fn vars(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Layout with `owner` at slot 0, `balances` mapping at slot 1 and `supply` at slot 2
pub(crate) fn token_layout() -> StorageLayout {
    StorageLayout::from_json(
        r#"{
            "storage": [
                {"label": "owner", "slot": "0", "offset": 0, "type": "t_address"},
                {"label": "balances", "slot": "1", "offset": 0, "type": "t_mapping(t_address,t_uint256)"},
                {"label": "supply", "slot": "2", "offset": 0, "type": "t_uint256"}
            ],
            "types": {
                "t_address": {"encoding": "inplace", "label": "address", "numberOfBytes": "20"},
                "t_uint256": {"encoding": "inplace", "label": "uint256", "numberOfBytes": "32"},
                "t_mapping(t_address,t_uint256)": {"encoding": "mapping", "label": "mapping(address => uint256)", "numberOfBytes": "32"}
            }
        }"#,
    )
    .unwrap()
}

pub(crate) fn analyzer() -> TaintAnalyzer {
    TaintAnalyzer::new()
}
