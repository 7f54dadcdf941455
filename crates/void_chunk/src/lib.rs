//! Void Chunk - Chunks, Portals and the Chunk Space
//!
//! The world is divided into convex chunks: one outside chunk per grid cell
//! of a geometry mapping, plus interior "shells" that may overlap them.
//! Chunks connect through portals and are loaded on background workers.
//!
//! # Features
//!
//! - Generational chunk handles; a deleted chunk is never reachable
//! - Background loading with main-thread application of results
//! - Portal binding between neighbours, in any bind order
//! - Typed per-chunk caches with bind and focus hooks
//! - Item lending across chunk borders
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  ChunkSpace                  │
//! │  ┌────────────┐ ┌──────────┐ ┌─────────────┐ │
//! │  │ ChunkArena │ │ Mappings │ │CacheRegistry│ │
//! │  └────────────┘ └──────────┘ └─────────────┘ │
//! │  ┌──────────────────────────────────────────┐│
//! │  │ ChunkLoader ──▶ TaskManager (workers)    ││
//! │  └──────────────────────────────────────────┘│
//! └──────────────────────────────────────────────┘
//!          │               │               │
//!          ▼               ▼               ▼
//!     ┌─────────┐   ┌────────────┐   ┌───────────┐
//!     │  Chunk  │   │ Boundaries │   │  Caches   │
//!     │ (items) │   │ (portals)  │   │(overlaps) │
//!     └─────────┘   └────────────┘   └───────────┘
//! ```

pub mod boundary;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod error;
pub mod handle;
pub mod item;
pub mod lending;
pub mod loader;
pub mod mapping;
pub mod math;
pub mod overlapper;
pub mod resource;
pub mod section;
pub mod space;
pub mod task;

pub mod prelude {
    //! Common imports for chunk functionality
    pub use crate::boundary::{ChunkBoundary, ChunkRef, Portal, PortalLink};
    pub use crate::cache::{CacheRegistry, CacheTypeId, ChunkCache, ChunkCacheType, Instance};
    pub use crate::chunk::{Chunk, Lender};
    pub use crate::config::ChunkSpaceConfig;
    pub use crate::error::{ChunkError, ConfigError, ResourceError, Result};
    pub use crate::handle::{ChunkArena, ChunkId, MappingId};
    pub use crate::item::{ChunkItem, ChunkItemPtr, ItemFactories, ItemFactory, ItemLoadContext, ModelItem};
    pub use crate::loader::{ChunkLoader, LoadCompletion};
    pub use crate::mapping::{GeometryMapping, GridBounds};
    pub use crate::math::{BoundingBox, Plane};
    pub use crate::overlapper::{ChunkOverlapper, ChunkOverlappers};
    pub use crate::resource::{ChunkResource, DirectoryResource, MemoryResource};
    pub use crate::section::{
        is_outside_identifier, outside_chunk_identifier, parse_outside_identifier, ChunkContents,
        ChunkSection, ItemSection, PortalSection,
    };
    pub use crate::space::ChunkSpace;
    pub use crate::task::{BackgroundTask, ImmediateTaskManager, QueuedTaskManager, TaskManager, TaskPriority, WorkerPool};
}

pub use prelude::*;
