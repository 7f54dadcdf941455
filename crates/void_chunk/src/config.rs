//! Chunk space configuration
//!
//! ```toml
//! worker_threads = 2
//! portal_tolerance = 0.5
//! form_portal_connections = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings of a [`ChunkSpace`](crate::space::ChunkSpace)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSpaceConfig {
    /// Loader threads; 0 loads inline on the calling thread
    pub worker_threads: usize,
    /// Maximum distance between the world centres of two portals that bind
    pub portal_tolerance: f32,
    /// Whether binding connects portals to already bound neighbours
    pub form_portal_connections: bool,
}

impl Default for ChunkSpaceConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            portal_tolerance: 0.5,
            form_portal_connections: true,
        }
    }
}

impl ChunkSpaceConfig {
    /// Parse from TOML
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ChunkSpaceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.portal_tolerance.is_finite() && self.portal_tolerance >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "portal tolerance {} must be a non-negative distance",
                self.portal_tolerance
            )));
        }
        Ok(())
    }
}
