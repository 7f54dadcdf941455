//! Error types for edge streaming

use thiserror::Error;
use void_chunk::{ChunkError, ConfigError, MappingId};

/// Streaming errors
#[derive(Debug, Error)]
pub enum StreamingError {
    /// The chunk space knows no such mapping
    #[error("Unknown geometry mapping: {0:?}")]
    UnknownMapping(MappingId),

    /// The mapping is already being streamed
    #[error("Geometry mapping {0:?} is already streamed")]
    DuplicateMapping(MappingId),

    /// Configuration could not be read
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The chunk space rejected an operation
    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),
}

/// Result type for streaming operations
pub type Result<T> = std::result::Result<T, StreamingError>;
