//! Edge-driven streaming of one geometry mapping
//!
//! The loaded part of a mapping is a rectangle of grid cells bounded by four
//! [`LoadingEdge`]s. Each tick the viewer's bounds become a target rectangle;
//! every edge gets a destination at most `max_edge_step` cells away from
//! where it is, and one line of cells at a time is loaded or unloaded to move
//! an edge toward its destination. Shrinking goes before growing.
//!
//! ```ignore
//! let mut mapping = EdgeGeometryMapping::new(&space, id, StreamingConfig::default())?;
//! loop {
//!     mapping.tick(&mut space, viewer_min, viewer_max, false);
//!     if mapping.has_fully_loaded() {
//!         break;
//!     }
//! }
//! ```

use glam::{Vec2, Vec3};
use void_chunk::{ChunkId, ChunkSpace, MappingId};

use crate::config::StreamingConfig;
use crate::edge::{EdgeSide, LoadingEdge};
use crate::error::Result;
use crate::grid::MappingGrid;
use crate::rect::{GridRect, Rect};

/// Extent standing for "no limit" in loaded rects
pub const VERY_BIG: f32 = f32::MAX;

/// Extent reported by an edge that has reached its mapping's border.
/// Anything at least this big is loaded as far as the mapping goes.
pub const PRETTY_BIG: f32 = 1.0e9;

/// Streaming state of one geometry mapping
#[derive(Clone, Debug)]
pub struct EdgeGeometryMapping {
    grid: MappingGrid,
    config: StreamingConfig,
    edges: [LoadingEdge; 4],
    target: GridRect,
    condemned: bool,
}

impl EdgeGeometryMapping {
    /// Stream a mapping registered with `space`. Nothing is loaded until the
    /// first tick.
    pub fn new(space: &ChunkSpace, mapping: MappingId, config: StreamingConfig) -> Result<Self> {
        config.validate()?;
        let grid = MappingGrid::new(space, mapping)?;
        Ok(Self {
            grid,
            config,
            edges: EdgeSide::ALL.map(|side| LoadingEdge::new(side, 0)),
            target: GridRect::default(),
            condemned: false,
        })
    }

    /// The space's id for this mapping
    pub fn mapping(&self) -> MappingId {
        self.grid.mapping()
    }

    /// Cells and placement of the mapping
    pub fn grid(&self) -> &MappingGrid {
        &self.grid
    }

    /// Step limits in use
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// All four edges, indexed left, bottom, right, top
    pub fn edges(&self) -> &[LoadingEdge; 4] {
        &self.edges
    }

    /// The edge on one side
    pub fn edge(&self, side: EdgeSide) -> &LoadingEdge {
        &self.edges[side.index()]
    }

    /// Cells the edges have committed to
    pub fn loaded_cells(&self) -> GridRect {
        GridRect::new(
            self.edge(EdgeSide::Left).pos(),
            self.edge(EdgeSide::Bottom).pos(),
            self.edge(EdgeSide::Right).pos(),
            self.edge(EdgeSide::Top).pos(),
        )
    }

    /// Cells the last tick aimed for
    pub fn target(&self) -> GridRect {
        self.target
    }

    /// Some line is being loaded or unloaded
    pub fn is_busy(&self) -> bool {
        self.edges.iter().any(LoadingEdge::is_busy)
    }

    /// From now on only unload, until nothing is left
    pub fn condemn(&mut self) {
        if !self.condemned {
            log::info!("Condemned geometry mapping {:?}", self.mapping());
        }
        self.condemned = true;
    }

    /// Condemned mappings only unload
    pub fn is_condemned(&self) -> bool {
        self.condemned
    }

    // ========================================================================
    // Ticking
    // ========================================================================

    /// Move the edges toward the cells covering `min_b..max_b`. With
    /// `unload_only` edges may only move inward. Returns whether any cell
    /// was bound.
    ///
    /// Only one line of cells is in flight at a time across all four edges,
    /// so reaching a target takes a number of lines that grows with the
    /// perimeter of the difference between the loaded and target rects.
    pub fn tick(&mut self, space: &mut ChunkSpace, min_b: Vec3, max_b: Vec3, unload_only: bool) -> bool {
        space.process_loaded_chunks();

        let unload_only = unload_only || self.condemned;
        if self.condemned {
            let cells = self.loaded_cells();
            self.target = GridRect::collapsed(
                cells.left + cells.width() / 2,
                cells.bottom + cells.height() / 2,
            );
        } else {
            match self.grid.cells_covering(min_b, max_b) {
                Some(target) => self.target = target,
                None => log::warn!("Ignoring non-finite viewer bounds for mapping {:?}", self.mapping()),
            }
        }

        if !self.is_busy() && self.loaded_cells().is_collapsed() {
            self.recentre();
        }
        self.update_dests(unload_only);

        let mut any_loaded = false;
        self.advance(space, &mut any_loaded);
        any_loaded
    }

    /// Nothing is loaded, so the empty rect can jump to where loading starts
    fn recentre(&mut self) {
        let (x, z) = (self.target.left, self.target.bottom);
        for edge in &mut self.edges {
            let pos = if edge.side().is_vertical() { x } else { z };
            edge.reset(pos);
        }
    }

    fn update_dests(&mut self, unload_only: bool) {
        let step = self.config.edge_step(unload_only);
        let may_grow = !unload_only && !self.target.is_collapsed();
        let cells = self.loaded_cells();

        for edge in &mut self.edges {
            let side = edge.side();
            let pos = edge.pos();
            let mut delta = (side_of(&self.target, side) - pos).clamp(-step, step);
            if !may_grow && delta * side.outward() > 0 {
                delta = 0;
            }
            // Never shrink past the opposite edge
            let opposite = side_of(&cells, side.opposite());
            let dest = if side.outward() > 0 {
                (pos + delta).max(opposite)
            } else {
                (pos + delta).min(opposite)
            };
            edge.set_dest(dest);
        }
    }

    /// Step the line in flight, starting new lines while they settle at once
    fn advance(&mut self, space: &mut ChunkSpace, any_loaded: &mut bool) {
        loop {
            if let Some(index) = self.edges.iter().position(LoadingEdge::is_busy) {
                if !self.edges[index].tick(&self.grid, space, any_loaded) {
                    return;
                }
            }
            if !self.begin_next_line() {
                return;
            }
        }
    }

    /// Start the next line, shrinking before growing. Lines with no cells
    /// commit on the spot. Returns whether a line is now in flight.
    fn begin_next_line(&mut self) -> bool {
        'search: loop {
            let cells = self.loaded_cells();
            for outward in [false, true] {
                for side in EdgeSide::ALL {
                    let edge = &mut self.edges[side.index()];
                    if edge.wants_outward() != Some(outward) {
                        continue;
                    }
                    let (lo, hi) = if side.is_vertical() {
                        (cells.bottom, cells.top)
                    } else {
                        (cells.left, cells.right)
                    };
                    if edge.begin_line(outward, lo, hi) {
                        return true;
                    }
                    continue 'search;
                }
            }
            return false;
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// No line in flight and the loaded cells are the target
    pub fn has_fully_loaded(&self) -> bool {
        let cells = self.loaded_cells();
        !self.is_busy() && (cells == self.target || (cells.is_collapsed() && self.target.is_collapsed()))
    }

    /// No cells loaded and no line in flight
    pub fn is_fully_unloaded(&self) -> bool {
        !self.is_busy() && self.loaded_cells().is_collapsed()
    }

    /// World-space rect of the loaded cells. Sides that have reached the
    /// mapping's border report [`PRETTY_BIG`].
    pub fn calc_loaded_rect(&self) -> Rect {
        let cells = self.loaded_cells();
        let size = self.grid.grid_size();
        let offset = self.grid.translation();
        let world_x = |x: i32| x as f32 * size + offset.x;
        let world_z = |z: i32| z as f32 * size + offset.z;

        if cells.is_collapsed() {
            let corner = Vec2::new(world_x(cells.left), world_z(cells.bottom));
            return Rect::new(corner, corner);
        }

        let full = self.grid.full_rect();
        let min = Vec2::new(
            if cells.left <= full.left { -PRETTY_BIG } else { world_x(cells.left) },
            if cells.bottom <= full.bottom { -PRETTY_BIG } else { world_z(cells.bottom) },
        );
        let max = Vec2::new(
            if cells.right >= full.right { PRETTY_BIG } else { world_x(cells.right) },
            if cells.top >= full.top { PRETTY_BIG } else { world_z(cells.top) },
        );
        Rect::new(min, max)
    }

    // ========================================================================
    // Chunk plumbing
    // ========================================================================

    /// The outside chunk of a cell, creating a stub if there is none
    pub fn find_or_add_outside_chunk(&self, space: &mut ChunkSpace, x: i32, z: i32) -> ChunkId {
        self.grid.find_or_add_outside_chunk(space, x, z)
    }

    /// The outside chunk of a cell, if one exists
    pub fn find_outside_chunk(&self, space: &ChunkSpace, x: i32, z: i32) -> Option<ChunkId> {
        self.grid.find_outside_chunk(space, x, z)
    }

    /// Bind a loaded chunk of this mapping
    pub fn bind(&self, space: &mut ChunkSpace, chunk: ChunkId) -> bool {
        if !void_chunk::contract!(!self.condemned, "Binding into condemned mapping {:?}", self.mapping()) {
            return false;
        }
        self.grid.bind(space, chunk)
    }

    /// Unbind a chunk if bound, then unload and delete it
    pub fn unbind_and_unload(&self, space: &mut ChunkSpace, chunk: ChunkId) {
        self.grid.unbind_and_unload(space, chunk);
    }

    /// Lowest cell x of the mapping
    pub fn min_l_grid_x(&self) -> i32 {
        self.grid.min_l_grid_x()
    }

    /// Highest cell x of the mapping
    pub fn max_l_grid_x(&self) -> i32 {
        self.grid.max_l_grid_x()
    }

    /// Lowest cell z of the mapping
    pub fn min_l_grid_y(&self) -> i32 {
        self.grid.min_l_grid_y()
    }

    /// Highest cell z of the mapping
    pub fn max_l_grid_y(&self) -> i32 {
        self.grid.max_l_grid_y()
    }

    /// Cancel every line in flight so the mapping's chunks can be deleted
    pub fn prepare_newly_loaded_chunks_for_delete(&mut self, space: &mut ChunkSpace) {
        for edge in &mut self.edges {
            edge.prepare_newly_loaded_chunks_for_delete(&self.grid, space);
        }
    }
}

fn side_of(rect: &GridRect, side: EdgeSide) -> i32 {
    match side {
        EdgeSide::Left => rect.left,
        EdgeSide::Bottom => rect.bottom,
        EdgeSide::Right => rect.right,
        EdgeSide::Top => rect.top,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use void_chunk::{
        outside_chunk_identifier, ChunkSection, ChunkSpaceConfig, GeometryMapping, GridBounds, ImmediateTaskManager,
        ItemFactories, MemoryResource,
    };

    use super::*;

    fn space_with(bounds: GridBounds) -> (ChunkSpace, MappingId) {
        let resource = Arc::new(MemoryResource::new());
        for z in bounds.min_z..=bounds.max_z {
            for x in bounds.min_x..=bounds.max_x {
                resource.insert_section(
                    &format!("{}.chunk", outside_chunk_identifier(x, z)),
                    &ChunkSection::default_outside(x, z, 100.0, 0.0, 100.0),
                );
            }
        }
        let mut space = ChunkSpace::with_loader(
            ChunkSpaceConfig::default(),
            Arc::new(ImmediateTaskManager::new()),
            resource,
            ItemFactories::with_defaults(),
        );
        let mapping = space.add_mapping(GeometryMapping::default().with_bounds(bounds));
        (space, mapping)
    }

    fn assert_capped(mapping: &EdgeGeometryMapping, step: i32) {
        for edge in mapping.edges() {
            assert!(
                (edge.dest() - edge.pos()).abs() <= step,
                "{:?} edge leads by {}",
                edge.side(),
                edge.dest() - edge.pos()
            );
        }
    }

    fn run(mapping: &mut EdgeGeometryMapping, space: &mut ChunkSpace, min: Vec3, max: Vec3) -> usize {
        for ticks in 1..=200 {
            mapping.tick(space, min, max, false);
            assert_capped(mapping, 10);
            assert!(mapping.edges().iter().filter(|e| e.is_busy()).count() <= 1);
            if mapping.has_fully_loaded() {
                return ticks;
            }
        }
        panic!("mapping never settled");
    }

    #[test]
    fn test_grows_to_viewer() {
        let (mut space, id) = space_with(GridBounds::new(-8, 7, -8, 7));
        let mut mapping = EdgeGeometryMapping::new(&space, id, StreamingConfig::default()).unwrap();
        assert!(mapping.is_fully_unloaded());

        run(&mut mapping, &mut space, Vec3::new(-50.0, 0.0, -50.0), Vec3::new(150.0, 0.0, 50.0));
        assert_eq!(mapping.loaded_cells(), GridRect::new(-1, -1, 2, 1));
        assert_eq!(space.bound_chunks().len(), 6);
        for (x, z) in mapping.loaded_cells().cells() {
            let chunk = mapping.find_outside_chunk(&space, x, z).unwrap();
            assert!(space.chunk(chunk).unwrap().is_bound());
        }
    }

    #[test]
    fn test_one_line_in_flight() {
        let (mut space, id) = space_with(GridBounds::new(-8, 7, -8, 7));
        let mut mapping = EdgeGeometryMapping::new(&space, id, StreamingConfig::default()).unwrap();

        // The right edge crosses the empty rect for free; the top edge then
        // holds the only line
        mapping.tick(&mut space, Vec3::new(-50.0, 0.0, -50.0), Vec3::new(150.0, 0.0, 50.0), false);
        let busy: Vec<EdgeSide> = mapping
            .edges()
            .iter()
            .filter(|e| e.is_busy())
            .map(LoadingEdge::side)
            .collect();
        assert_eq!(busy, vec![EdgeSide::Top]);
        assert_eq!(mapping.edge(EdgeSide::Top).line().unwrap().columns().len(), 3);
        assert_eq!(mapping.edge(EdgeSide::Right).pos(), 2);
    }

    #[test]
    fn test_growth_is_capped() {
        let (mut space, id) = space_with(GridBounds::new(-16, 15, 0, 0));
        let mut mapping = EdgeGeometryMapping::new(&space, id, StreamingConfig::default()).unwrap();

        // Far wider than one step
        mapping.tick(&mut space, Vec3::new(-1600.0, 0.0, 0.0), Vec3::new(1599.0, 0.0, 50.0), false);
        assert_capped(&mapping, 10);
        assert!(mapping.loaded_cells().width() <= 10);

        run(&mut mapping, &mut space, Vec3::new(-1600.0, 0.0, 0.0), Vec3::new(1599.0, 0.0, 50.0));
        assert_eq!(mapping.loaded_cells(), GridRect::new(-16, 0, 16, 1));
    }

    #[test]
    fn test_unload_only_never_grows() {
        let (mut space, id) = space_with(GridBounds::new(-8, 7, -8, 7));
        let mut mapping = EdgeGeometryMapping::new(&space, id, StreamingConfig::default()).unwrap();
        for _ in 0..5 {
            mapping.tick(&mut space, Vec3::splat(-150.0), Vec3::splat(150.0), true);
            assert!(mapping.is_fully_unloaded());
        }
        assert!(space.bound_chunks().is_empty());

        run(&mut mapping, &mut space, Vec3::new(-250.0, 0.0, -250.0), Vec3::new(250.0, 0.0, 250.0));
        let mut previous = mapping.loaded_cells();
        assert_eq!(previous.area(), 36);

        // The viewer jumps to the far corner; only shrinking is allowed
        for _ in 0..20 {
            mapping.tick(&mut space, Vec3::splat(600.0), Vec3::splat(650.0), true);
            assert_capped(&mapping, 2);
            let cells = mapping.loaded_cells();
            assert!(cells.area() <= previous.area());
            if !cells.is_collapsed() {
                assert!(cells.left >= previous.left && cells.right <= previous.right);
                assert!(cells.bottom >= previous.bottom && cells.top <= previous.top);
            }
            previous = cells;
        }
        assert_eq!(space.bound_chunks().len(), previous.area() as usize);
    }

    #[test]
    fn test_viewer_moves_one_cell() {
        let (mut space, id) = space_with(GridBounds::new(-8, 7, -8, 7));
        let mut mapping = EdgeGeometryMapping::new(&space, id, StreamingConfig::default()).unwrap();
        run(&mut mapping, &mut space, Vec3::new(-50.0, 0.0, -50.0), Vec3::new(50.0, 0.0, 50.0));
        assert_eq!(mapping.loaded_cells(), GridRect::new(-1, -1, 1, 1));

        run(&mut mapping, &mut space, Vec3::new(50.0, 0.0, -50.0), Vec3::new(150.0, 0.0, 50.0));
        assert_eq!(mapping.loaded_cells(), GridRect::new(0, -1, 2, 1));
        assert!(mapping.find_outside_chunk(&space, -1, 0).is_none());
        assert_eq!(space.bound_chunks().len(), 4);
    }

    #[test]
    fn test_condemned_mapping_unloads() {
        let (mut space, id) = space_with(GridBounds::new(-8, 7, -8, 7));
        let mut mapping = EdgeGeometryMapping::new(&space, id, StreamingConfig::default()).unwrap();
        run(&mut mapping, &mut space, Vec3::splat(-250.0), Vec3::splat(250.0));

        mapping.condemn();
        for _ in 0..20 {
            mapping.tick(&mut space, Vec3::splat(-250.0), Vec3::splat(250.0), false);
            assert_capped(&mapping, 2);
            if mapping.is_fully_unloaded() {
                break;
            }
        }
        assert!(mapping.is_fully_unloaded());
        assert!(space.bound_chunks().is_empty());
    }

    #[test]
    fn test_calc_loaded_rect() {
        let (mut space, id) = space_with(GridBounds::new(0, 3, 0, 0));
        let mut mapping = EdgeGeometryMapping::new(&space, id, StreamingConfig::default()).unwrap();
        assert!(mapping.calc_loaded_rect().is_empty());

        run(&mut mapping, &mut space, Vec3::new(110.0, 0.0, -500.0), Vec3::new(190.0, 0.0, 500.0));
        let rect = mapping.calc_loaded_rect();
        assert_eq!(rect.min, Vec2::new(100.0, -PRETTY_BIG));
        assert_eq!(rect.max, Vec2::new(200.0, PRETTY_BIG));
    }

    #[test]
    fn test_plumbing_delegates_to_grid() {
        let (mut space, id) = space_with(GridBounds::new(-2, 1, -3, 2));
        let mapping = EdgeGeometryMapping::new(&space, id, StreamingConfig::default()).unwrap();
        assert_eq!(
            (mapping.min_l_grid_x(), mapping.max_l_grid_x(), mapping.min_l_grid_y(), mapping.max_l_grid_y()),
            (-2, 1, -3, 2)
        );

        let chunk = mapping.find_or_add_outside_chunk(&mut space, 1, 2);
        assert_eq!(mapping.find_outside_chunk(&space, 1, 2), Some(chunk));
        space
            .load_chunk_now(chunk, &ChunkSection::default_outside(1, 2, 100.0, 0.0, 100.0))
            .unwrap();
        assert!(mapping.bind(&mut space, chunk));
        assert!(space.chunk(chunk).unwrap().focussed());
        assert!(space.has_seen(chunk));

        mapping.unbind_and_unload(&mut space, chunk);
        assert!(space.chunk(chunk).is_none());
    }
}
