//! Streaming configuration
//!
//! ```toml
//! max_edge_step = 10
//! unload_only_edge_step = 2
//! reap_stubs = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use void_chunk::ConfigError;

/// Settings of edge streaming
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Furthest an edge's destination may lead its position, in cells
    pub max_edge_step: i32,
    /// The same limit while only unloading
    pub unload_only_edge_step: i32,
    /// Delete idle stub chunks left behind by portal binding every tick
    pub reap_stubs: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_edge_step: 10,
            unload_only_edge_step: 2,
            reap_stubs: true,
        }
    }
}

impl StreamingConfig {
    /// Parse from TOML
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StreamingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_edge_step < 1 || self.unload_only_edge_step < 1 {
            return Err(ConfigError::Invalid(format!(
                "edge steps must be at least one cell (got {} and {})",
                self.max_edge_step, self.unload_only_edge_step
            )));
        }
        if self.unload_only_edge_step > self.max_edge_step {
            return Err(ConfigError::Invalid(format!(
                "unload-only edge step {} exceeds the edge step {}",
                self.unload_only_edge_step, self.max_edge_step
            )));
        }
        Ok(())
    }

    /// Edge step for the given mode
    pub fn edge_step(&self, unload_only: bool) -> i32 {
        if unload_only {
            self.unload_only_edge_step
        } else {
            self.max_edge_step
        }
    }
}
