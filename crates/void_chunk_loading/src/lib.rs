//! Void Chunk Loading - Edge-Driven World Streaming
//!
//! Streams the grid of each geometry mapping around the viewer. The loaded
//! cells form a rectangle whose four edges move one line of cells at a time;
//! every cell of a line is a loading column that loads the cell's outside
//! chunk and the interior shells overlapping it, then binds them together.
//!
//! # Architecture
//!
//! ```text
//! EdgeGeometryMappings
//!   └── EdgeGeometryMapping (one per mapping)
//!         ├── MappingGrid        cells, bind / unbind_and_unload
//!         └── LoadingEdge × 4    left, bottom, right, top
//!               └── EdgeLine     the line in flight
//!                     └── LoadingColumn × n
//!                           └── ChunkLoadingRefCount on shared shells
//! ```
//!
//! # Example
//!
//! ```ignore
//! use void_chunk::prelude::*;
//! use void_chunk_loading::prelude::*;
//!
//! let mut space = ChunkSpace::from_config(ChunkSpaceConfig::default(), resource)?;
//! let mut streaming = EdgeGeometryMappings::new(StreamingConfig::default());
//! streaming.add(&mut space, GeometryMapping::load("spaces/plains.toml")?)?;
//!
//! // Every frame
//! streaming.tick(&mut space, viewer_min, viewer_max, false);
//! ```

pub mod column;
pub mod config;
pub mod edge;
pub mod edge_mapping;
pub mod error;
pub mod grid;
pub mod mappings;
pub mod rect;
pub mod ref_count;

pub mod prelude {
    //! Common imports for streaming
    pub use crate::column::{ColumnState, LoadingColumn};
    pub use crate::config::StreamingConfig;
    pub use crate::edge::{EdgeLine, EdgeSide, LoadingEdge};
    pub use crate::edge_mapping::{EdgeGeometryMapping, PRETTY_BIG, VERY_BIG};
    pub use crate::error::{Result, StreamingError};
    pub use crate::grid::MappingGrid;
    pub use crate::mappings::EdgeGeometryMappings;
    pub use crate::rect::{GridRect, Rect};
    pub use crate::ref_count::ChunkLoadingRefCount;
}

pub use prelude::*;
