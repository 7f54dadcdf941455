//! The grid of one streamed geometry mapping
//!
//! [`MappingGrid`] is everything a loading column needs to know about the
//! mapping it streams: which cells exist, how world space maps onto them,
//! and how chunks are found, bound and thrown away.

use glam::Vec3;
use void_chunk::{ChunkId, ChunkSpace, GeometryMapping, GridBounds, MappingId};

use crate::error::{Result, StreamingError};
use crate::rect::GridRect;

/// Grid placement and chunk plumbing of one mapping
#[derive(Clone, Debug)]
pub struct MappingGrid {
    mapping: MappingId,
    bounds: GridBounds,
    grid_size: f32,
    translation: Vec3,
}

impl MappingGrid {
    /// Read the grid of a mapping registered with `space`
    pub fn new(space: &ChunkSpace, mapping: MappingId) -> Result<Self> {
        let settings = space
            .mapping(mapping)
            .ok_or(StreamingError::UnknownMapping(mapping))?;
        Ok(Self::from_settings(mapping, settings))
    }

    /// Build from settings without consulting a space
    pub fn from_settings(mapping: MappingId, settings: &GeometryMapping) -> Self {
        Self {
            mapping,
            bounds: settings.bounds,
            grid_size: settings.grid_size,
            translation: settings.translation,
        }
    }

    /// The space's id for this mapping
    pub fn mapping(&self) -> MappingId {
        self.mapping
    }

    /// Inclusive cell bounds
    pub fn bounds(&self) -> &GridBounds {
        &self.bounds
    }

    /// Edge length of a cell in metres
    pub fn grid_size(&self) -> f32 {
        self.grid_size
    }

    /// Offset of the mapping in world space
    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    /// Lowest cell x
    pub fn min_l_grid_x(&self) -> i32 {
        self.bounds.min_x
    }

    /// Highest cell x
    pub fn max_l_grid_x(&self) -> i32 {
        self.bounds.max_x
    }

    /// Lowest cell z
    pub fn min_l_grid_y(&self) -> i32 {
        self.bounds.min_z
    }

    /// Highest cell z
    pub fn max_l_grid_y(&self) -> i32 {
        self.bounds.max_z
    }

    /// Every cell of the mapping as a half-open rect
    pub fn full_rect(&self) -> GridRect {
        GridRect::new(
            self.bounds.min_x,
            self.bounds.min_z,
            self.bounds.max_x + 1,
            self.bounds.max_z + 1,
        )
    }

    /// Cells touched by the world-space box `min..max`, clipped to the
    /// mapping. `None` for non-finite input.
    pub fn cells_covering(&self, min: Vec3, max: Vec3) -> Option<GridRect> {
        if !(min.is_finite() && max.is_finite()) {
            return None;
        }
        let lo = (min.min(max) - self.translation) / self.grid_size;
        let hi = (min.max(max) - self.translation) / self.grid_size;
        let full = self.full_rect();
        let clamp_x = |v: i32| v.clamp(full.left, full.right);
        let clamp_z = |v: i32| v.clamp(full.bottom, full.top);

        let left = clamp_x(lo.x.floor() as i32);
        let right = clamp_x((hi.x.floor() as i32).saturating_add(1)).max(left);
        let bottom = clamp_z(lo.z.floor() as i32);
        let top = clamp_z((hi.z.floor() as i32).saturating_add(1)).max(bottom);
        Some(GridRect::new(left, bottom, right, top))
    }

    /// The outside chunk of a cell, creating a stub if there is none
    pub fn find_or_add_outside_chunk(&self, space: &mut ChunkSpace, x: i32, z: i32) -> ChunkId {
        space.find_or_add_chunk(&void_chunk::outside_chunk_identifier(x, z), self.mapping)
    }

    /// The outside chunk of a cell, if one exists
    pub fn find_outside_chunk(&self, space: &ChunkSpace, x: i32, z: i32) -> Option<ChunkId> {
        space.find_outside_chunk(self.mapping, x, z)
    }

    /// Bind a loaded chunk and focus it straight away
    pub fn bind(&self, space: &mut ChunkSpace, chunk: ChunkId) -> bool {
        let form = space.config().form_portal_connections;
        if let Err(e) = space.bind_chunk(chunk, form) {
            log::error!("Failed to bind chunk in mapping {:?}: {}", self.mapping, e);
            return false;
        }
        space.focus_chunk(chunk);
        space.see_chunk(chunk);
        true
    }

    /// Unbind a chunk if bound, then unload and delete it
    pub fn unbind_and_unload(&self, space: &mut ChunkSpace, chunk: ChunkId) {
        let Some(bound) = space.chunk(chunk).map(|c| c.is_bound()) else {
            return;
        };
        if bound {
            if let Err(e) = space.unbind_chunk(chunk, false) {
                log::error!("Failed to unbind chunk in mapping {:?}: {}", self.mapping, e);
                return;
            }
        }
        space.unload_chunk(chunk);
        space.del_chunk(chunk);
    }
}
