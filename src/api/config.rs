// Configuration for EVM Taint
//
// Loading, saving and building analysis configurations.

use crate::api::types::AnalysisConfig;
use anyhow::{Context, Result};
use std::path::Path;
use std::fs;

/// Configuration manager for EVM Taint
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<AnalysisConfig> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        let config = serde_json::from_str(&config_str)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(config: &AnalysisConfig, path: P) -> Result<()> {
        let config_str = serde_json::to_string_pretty(config)?;
        fs::write(path, config_str)?;
        Ok(())
    }

    /// Create a builder for configuration
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for creating configurations
#[derive(Default)]
pub struct ConfigBuilder {
    config: AnalysisConfig,
}

impl ConfigBuilder {
    /// Set the longest taint path, in blocks
    pub fn max_path_len(mut self, value: usize) -> Self {
        self.config.max_path_len = value;
        self
    }

    /// Set how often one block may recur in a path
    pub fn max_block_visits(mut self, value: usize) -> Self {
        self.config.max_block_visits = value;
        self
    }

    pub fn jump_lookback(mut self, value: usize) -> Self {
        self.config.jump_lookback = value;
        self
    }

    pub fn direct_slot_lookback(mut self, value: usize) -> Self {
        self.config.direct_slot_lookback = value;
        self
    }

    pub fn hash_lookback(mut self, value: usize) -> Self {
        self.config.hash_lookback = value;
        self
    }

    pub fn base_slot_lookback(mut self, value: usize) -> Self {
        self.config.base_slot_lookback = value;
        self
    }

    pub fn argument_lookback(mut self, value: usize) -> Self {
        self.config.argument_lookback = value;
        self
    }

    /// Set the per-contract wall-clock budget for batch analysis
    pub fn timeout_secs(mut self, value: u64) -> Self {
        self.config.timeout_secs = Some(value);
        self
    }

    /// Build the configuration
    pub fn build(self) -> AnalysisConfig {
        self.config
    }
}
