//! Error types for chunks and the chunk space

use thiserror::Error;

use crate::handle::ChunkId;

/// Errors raised while reading chunk resources
#[derive(Debug, Error)]
pub enum ResourceError {
    /// No resource exists under the given id
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Underlying IO failure
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Chunk and chunk space errors
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Resource access failed
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Chunk section could not be parsed
    #[error("Failed to parse chunk section: {0}")]
    Parse(#[from] serde_json::Error),

    /// Chunk section parsed but describes an invalid chunk
    #[error("Malformed chunk section '{identifier}': {reason}")]
    MalformedSection { identifier: String, reason: String },

    /// Handle does not refer to a live chunk
    #[error("Unknown chunk: {0:?}")]
    UnknownChunk(ChunkId),

    /// Operation is illegal in the chunk's current state
    #[error("Chunk '{identifier}' cannot {operation}: {reason}")]
    InvalidState {
        identifier: String,
        operation: &'static str,
        reason: &'static str,
    },

    /// Configuration could not be read
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Loader threads could not be started
    #[error("Failed to start chunk loader threads: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO failure while reading a config file
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse failure
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Parsed values are inconsistent
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for chunk operations
pub type Result<T> = std::result::Result<T, ChunkError>;

/// Checks a contract that callers must uphold.
///
/// A violation is logged, is fatal in debug builds, and evaluates to `false`
/// so release builds can carry on best-effort.
#[macro_export]
macro_rules! contract {
    ($cond:expr, $($arg:tt)+) => {{
        let held: bool = $cond;
        if !held {
            log::error!($($arg)+);
            debug_assert!(held, $($arg)+);
        }
        held
    }};
}
