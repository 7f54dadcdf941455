//! Chunk resource access
//!
//! Loads read chunk sections through [`ChunkResource`], an opaque
//! key-to-bytes store. Readers are shared with worker threads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::ResourceError;
use crate::section::ChunkSection;

/// Read-only store of chunk resources
pub trait ChunkResource: Send + Sync {
    /// Read the bytes stored under `resource_id`
    fn read(&self, resource_id: &str) -> Result<Vec<u8>, ResourceError>;

    /// Check whether a resource exists
    fn exists(&self, resource_id: &str) -> bool {
        self.read(resource_id).is_ok()
    }
}

/// Resources held in memory
#[derive(Debug, Default)]
pub struct MemoryResource {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryResource {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes
    pub fn insert(&self, resource_id: impl Into<String>, bytes: Vec<u8>) {
        self.entries.write().insert(resource_id.into(), bytes);
    }

    /// Store a chunk section as JSON
    pub fn insert_section(&self, resource_id: impl Into<String>, section: &ChunkSection) {
        match section.to_vec() {
            Ok(bytes) => self.insert(resource_id, bytes),
            Err(e) => log::error!("Failed to serialize chunk section: {}", e),
        }
    }

    /// Remove a resource
    pub fn remove(&self, resource_id: &str) -> Option<Vec<u8>> {
        self.entries.write().remove(resource_id)
    }

    /// Number of stored resources
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ChunkResource for MemoryResource {
    fn read(&self, resource_id: &str) -> Result<Vec<u8>, ResourceError> {
        self.entries
            .read()
            .get(resource_id)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(resource_id.to_string()))
    }

    fn exists(&self, resource_id: &str) -> bool {
        self.entries.read().contains_key(resource_id)
    }
}

/// Resources stored as files below a root directory
#[derive(Debug, Clone)]
pub struct DirectoryResource {
    root: PathBuf,
}

impl DirectoryResource {
    /// Create a reader rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, resource_id: &str) -> PathBuf {
        self.root.join(resource_id.trim_start_matches('/'))
    }
}

impl ChunkResource for DirectoryResource {
    fn read(&self, resource_id: &str) -> Result<Vec<u8>, ResourceError> {
        let path = self.path_of(resource_id);
        std::fs::read(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ResourceError::NotFound(resource_id.to_string())
            } else {
                ResourceError::Io {
                    path: path.display().to_string(),
                    source,
                }
            }
        })
    }

    fn exists(&self, resource_id: &str) -> bool {
        self.path_of(resource_id).is_file()
    }
}
