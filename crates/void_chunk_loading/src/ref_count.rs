//! How many loading columns hold a shell
//!
//! A shell overlapping several grid cells is loaded by whichever column gets
//! there first and stays loaded until the last of them lets go.

use void_chunk::{contract, Chunk, ChunkCache, ChunkCacheType, ChunkId, ChunkSpace, Instance};

/// Per-shell count of the loading columns that overlap it
#[derive(Debug, Default)]
pub struct ChunkLoadingRefCount {
    num_overlapped: u32,
}

impl ChunkLoadingRefCount {
    pub fn num_overlapped(&self) -> u32 {
        self.num_overlapped
    }

    pub fn inc_num_overlapped(&mut self) -> u32 {
        self.num_overlapped += 1;
        self.num_overlapped
    }

    /// Decrement; a count already at zero is a contract violation and stays zero
    pub fn dec_num_overlapped(&mut self) -> u32 {
        if contract!(self.num_overlapped > 0, "Loading ref count dropped below zero") {
            self.num_overlapped -= 1;
        }
        self.num_overlapped
    }

    /// Count of a chunk, zero if it has none
    pub fn of(space: &ChunkSpace, chunk: ChunkId) -> u32 {
        Instance::<ChunkLoadingRefCount>::find(space, chunk).map_or(0, |r| r.num_overlapped)
    }

    /// Increment the count of a chunk, creating it if needed
    pub fn inc(space: &mut ChunkSpace, chunk: ChunkId) -> u32 {
        Instance::<ChunkLoadingRefCount>::get(space, chunk).map_or(0, |r| r.inc_num_overlapped())
    }

    /// Decrement the count of a chunk
    pub fn dec(space: &mut ChunkSpace, chunk: ChunkId) -> u32 {
        Instance::<ChunkLoadingRefCount>::get(space, chunk).map_or(0, |r| r.dec_num_overlapped())
    }
}

impl ChunkCache for ChunkLoadingRefCount {}

impl ChunkCacheType for ChunkLoadingRefCount {
    fn create(_chunk: &Chunk) -> Self {
        Self::default()
    }
}
