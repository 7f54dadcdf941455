//! Loading one grid cell and its shells
//!
//! A [`LoadingColumn`] is a single cell of the line an edge is moving. It
//! walks the cell's outside chunk and every overlapping shell through
//! loading and binding, one state at a time:
//!
//! ```text
//!            step_load                 outside loaded          shells loaded
//! Unloaded ────────────▶ LoadingOutside ─────────────▶ LoadingInside ─────────▶ Loaded
//!    ▲                        │                             │                     │
//!    └────────────────────────┴──────── step_unload ────────┴─────────────────────┘
//! ```
//!
//! Shells shared between cells are counted with [`ChunkLoadingRefCount`];
//! the last column to let go of a shell unloads it.

use void_chunk::{contract, ChunkId, ChunkOverlappers, ChunkSpace, Instance, TaskPriority};

use crate::grid::MappingGrid;
use crate::ref_count::ChunkLoadingRefCount;

/// Where a column is in its lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColumnState {
    #[default]
    Unloaded,
    /// Waiting for the outside chunk
    LoadingOutside,
    /// Waiting for the overlapping shells
    LoadingInside,
    /// Bound, or settled after a failed load
    Loaded,
}

/// What a state handler wants next
enum Step {
    /// Enter the state and handle it in the same call
    Continue(ColumnState),
    /// Enter the state and stop until the next call
    Wait(ColumnState),
}

/// One cell of an edge line
#[derive(Clone, Debug)]
pub struct LoadingColumn {
    pos: i32,
    outside_chunk: Option<ChunkId>,
    state: ColumnState,
}

impl LoadingColumn {
    /// A column at `pos` along its edge, with nothing loaded
    pub fn new(pos: i32) -> Self {
        Self::with_state(pos, ColumnState::Unloaded)
    }

    /// A column whose cell is already bound; used to unload lines
    pub fn loaded(pos: i32) -> Self {
        Self::with_state(pos, ColumnState::Loaded)
    }

    fn with_state(pos: i32, state: ColumnState) -> Self {
        Self {
            pos,
            outside_chunk: None,
            state,
        }
    }

    /// Position of the cell along its edge
    pub fn pos(&self) -> i32 {
        self.pos
    }

    /// Current lifecycle state
    pub fn state(&self) -> ColumnState {
        self.state
    }

    /// The outside chunk this column is working on
    pub fn outside_chunk(&self) -> Option<ChunkId> {
        self.outside_chunk
    }

    /// Grid cell of this column on an edge line at `edge_pos`
    pub fn cell(&self, edge_pos: i32, is_vertical: bool) -> (i32, i32) {
        if is_vertical {
            (edge_pos, self.pos)
        } else {
            (self.pos, edge_pos)
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Advance loading as far as possible. Sets `any_loaded` when this call
    /// bound the cell. Returns whether the column is loaded.
    pub fn step_load(
        &mut self,
        grid: &MappingGrid,
        space: &mut ChunkSpace,
        edge_pos: i32,
        is_vertical: bool,
        any_loaded: &mut bool,
    ) -> bool {
        loop {
            let step = match self.state {
                ColumnState::Unloaded => {
                    if self.load_outside_chunk(grid, space, edge_pos, is_vertical) {
                        Step::Continue(ColumnState::LoadingOutside)
                    } else {
                        Step::Wait(ColumnState::LoadingOutside)
                    }
                }
                ColumnState::LoadingOutside => self.await_outside_chunk(space),
                ColumnState::LoadingInside => {
                    if self.are_overlappers_loaded(space) {
                        self.trim_client_only_boundaries(grid, space);
                        if self.bind_outside_chunk(grid, space) {
                            self.bind_overlappers(grid, space);
                            *any_loaded = true;
                        } else {
                            log::warn!("Column {} could not bind its cell; leaving it unbound", self.pos);
                        }
                        Step::Wait(ColumnState::Loaded)
                    } else {
                        Step::Wait(ColumnState::LoadingInside)
                    }
                }
                ColumnState::Loaded => Step::Wait(ColumnState::Loaded),
            };

            match step {
                Step::Continue(next) => self.state = next,
                Step::Wait(next) => {
                    self.state = next;
                    break;
                }
            }
        }
        self.state == ColumnState::Loaded
    }

    /// Start the outside chunk loading; true if it already has
    fn load_outside_chunk(&mut self, grid: &MappingGrid, space: &mut ChunkSpace, edge_pos: i32, is_vertical: bool) -> bool {
        let (x, z) = self.cell(edge_pos, is_vertical);
        let outside = grid.find_or_add_outside_chunk(space, x, z);
        self.outside_chunk = Some(outside);

        let Some(chunk) = space.chunk(outside) else {
            return false;
        };
        if !contract!(!chunk.is_bound(), "Outside chunk '{}' is already bound", chunk.identifier()) {
            return false;
        }
        if chunk.loaded() {
            return true;
        }
        if !chunk.loading() {
            space.load_chunk(outside, TaskPriority::Normal);
        }
        false
    }

    fn await_outside_chunk(&mut self, space: &mut ChunkSpace) -> Step {
        let Some(chunk) = self.outside_chunk.and_then(|id| space.chunk(id)) else {
            log::warn!("Outside chunk of column {} vanished while loading", self.pos);
            self.outside_chunk = None;
            return Step::Wait(ColumnState::Loaded);
        };

        if chunk.load_failed() {
            log::warn!("Outside chunk '{}' failed to load; leaving its cell empty", chunk.identifier());
            if let Some(outside) = self.outside_chunk.take() {
                space.del_chunk(outside);
            }
            return Step::Wait(ColumnState::Loaded);
        }
        if !chunk.loaded() {
            return Step::Wait(ColumnState::LoadingOutside);
        }

        self.load_overlappers(space);
        Step::Continue(ColumnState::LoadingInside)
    }

    /// Start every shell overlapping the outside chunk loading, and count
    /// this column against each
    fn load_overlappers(&self, space: &mut ChunkSpace) {
        let Some(outside) = self.outside_chunk else {
            return;
        };
        for shell in ChunkOverlappers::find_appointed_chunks(space, outside) {
            let Some(chunk) = space.chunk(shell) else {
                continue;
            };
            if chunk.is_bound() {
                space.bind_portals(shell, true, true);
            } else if !chunk.loading() && !chunk.loaded() && !chunk.load_failed() {
                space.load_chunk(shell, TaskPriority::Normal);
            }
            ChunkLoadingRefCount::inc(space, shell);
        }
    }

    fn overlapper_chunks(&self, space: &ChunkSpace) -> Vec<ChunkId> {
        self.outside_chunk
            .and_then(|outside| Instance::<ChunkOverlappers>::find(space, outside))
            .map(ChunkOverlappers::chunks)
            .unwrap_or_default()
    }

    fn are_overlappers_loaded(&self, space: &ChunkSpace) -> bool {
        self.overlapper_chunks(space).into_iter().all(|shell| {
            space
                .chunk(shell)
                .map_or(true, |c| c.loaded() || c.load_failed())
        })
    }

    /// Portals leading off the mapping's grid can never bind
    fn trim_client_only_boundaries(&self, grid: &MappingGrid, space: &mut ChunkSpace) {
        if let Some(chunk) = self.outside_chunk.and_then(|id| space.chunk_mut(id)) {
            chunk.trim_outside_portals(grid.bounds());
        }
    }

    /// Bind the outside chunk, then count this column against any shells it
    /// adopted from bound neighbours while binding. Returns whether the
    /// chunk was bound.
    fn bind_outside_chunk(&self, grid: &MappingGrid, space: &mut ChunkSpace) -> bool {
        let Some(outside) = self.outside_chunk else {
            return false;
        };
        let before = Instance::<ChunkOverlappers>::find(space, outside).map_or(0, ChunkOverlappers::len);
        if !grid.bind(space, outside) {
            return false;
        }

        ChunkOverlappers::find_appointed_chunks(space, outside);
        let adopted: Vec<ChunkId> = Instance::<ChunkOverlappers>::find(space, outside)
            .map(|o| {
                o.overlappers()
                    .iter()
                    .skip(before)
                    .filter_map(|record| record.chunk())
                    .collect()
            })
            .unwrap_or_default();
        for shell in adopted {
            log::trace!("Column {} picked up a shell from a neighbour", self.pos);
            ChunkLoadingRefCount::inc(space, shell);
        }
        true
    }

    fn bind_overlappers(&self, grid: &MappingGrid, space: &mut ChunkSpace) {
        for shell in self.overlapper_chunks(space) {
            if space.chunk(shell).is_some_and(|c| c.loaded() && !c.is_bound()) {
                grid.bind(space, shell);
            }
        }
        if let Some(outside) = self.outside_chunk {
            space.refresh_completed(outside);
        }
    }

    // ========================================================================
    // Unloading
    // ========================================================================

    /// Advance unloading. A column still loading is cancelled on the spot.
    /// Returns whether the column is unloaded.
    pub fn step_unload(
        &mut self,
        grid: &MappingGrid,
        space: &mut ChunkSpace,
        edge_pos: i32,
        is_vertical: bool,
    ) -> bool {
        let (x, z) = self.cell(edge_pos, is_vertical);
        match self.state {
            ColumnState::Loaded => {
                self.outside_chunk = grid.find_outside_chunk(space, x, z);
                if let Some(outside) = self.outside_chunk {
                    if space.chunk(outside).is_some_and(|c| c.is_bound()) {
                        self.unload_overlappers(grid, space);
                        self.unload_outside_chunk(grid, space);
                    } else {
                        log::debug!("Cell ({}, {}) was never bound; discarding it", x, z);
                        self.cancel_loading_overlappers(grid, space);
                        self.cancel_loading_outside(grid, space);
                    }
                }
            }
            ColumnState::LoadingInside => {
                self.outside_chunk = grid.find_outside_chunk(space, x, z);
                if self.outside_chunk.is_some() {
                    self.cancel_loading_overlappers(grid, space);
                    self.cancel_loading_outside(grid, space);
                }
            }
            ColumnState::LoadingOutside => {
                self.cancel_loading_outside(grid, space);
            }
            ColumnState::Unloaded => return true,
        }

        self.outside_chunk = None;
        self.state = ColumnState::Unloaded;
        true
    }

    fn unload_overlappers(&self, grid: &MappingGrid, space: &mut ChunkSpace) {
        for shell in self.overlapper_chunks(space) {
            if ChunkLoadingRefCount::dec(space, shell) == 0 {
                grid.unbind_and_unload(space, shell);
            }
        }
    }

    fn unload_outside_chunk(&mut self, grid: &MappingGrid, space: &mut ChunkSpace) {
        if let Some(outside) = self.outside_chunk.take() {
            grid.unbind_and_unload(space, outside);
        }
        space.focus();
    }

    /// Let go of shells this column started loading
    fn cancel_loading_overlappers(&self, grid: &MappingGrid, space: &mut ChunkSpace) {
        for shell in self.overlapper_chunks(space) {
            if ChunkLoadingRefCount::dec(space, shell) > 0 {
                continue;
            }
            let Some(chunk) = space.chunk(shell) else {
                continue;
            };
            if chunk.is_bound() {
                grid.unbind_and_unload(space, shell);
            } else if chunk.loaded() || chunk.loading() {
                space.unload_chunk_before_binding(shell);
            }
        }
    }

    /// Throw away the outside chunk before it was bound, with any shell
    /// stubs nobody else holds
    fn cancel_loading_outside(&mut self, grid: &MappingGrid, space: &mut ChunkSpace) {
        let Some(outside) = self.outside_chunk.take() else {
            return;
        };

        let records: Vec<(String, bool, Option<ChunkId>)> = Instance::<ChunkOverlappers>::find(space, outside)
            .map(|o| {
                o.overlappers()
                    .iter()
                    .map(|r| (r.identifier().to_string(), r.is_foreign(), r.chunk()))
                    .collect()
            })
            .unwrap_or_default();
        for (identifier, foreign, shell) in records {
            let Some(shell) = shell else {
                continue;
            };
            let unused = space
                .chunk(shell)
                .is_some_and(|c| !c.is_bound() && (!c.is_appointed() || ChunkLoadingRefCount::of(space, shell) == 0));
            if !unused {
                continue;
            }
            if space.chunk(shell).is_some_and(|c| c.loaded() || c.loading()) {
                space.unload_chunk_before_binding(shell);
            }
            space.del_chunk(shell);
            if let Some(overlappers) = Instance::<ChunkOverlappers>::find_mut(space, outside) {
                overlappers.del(&identifier, foreign);
            }
        }

        match space.chunk(outside) {
            Some(chunk) if chunk.is_bound() => {
                contract!(false, "Outside chunk '{}' cancelled while bound", chunk.identifier());
                return;
            }
            Some(chunk) if chunk.loaded() || chunk.loading() => {
                space.unload_chunk_before_binding(outside);
            }
            Some(_) => {}
            None => return,
        }
        space.del_chunk(outside);
        log::trace!("Cancelled loading of column {} in mapping {:?}", self.pos, grid.mapping());
    }

    /// Cancel whatever this column has in flight so its chunks can be
    /// deleted. Bound cells are left for the normal unload path.
    pub fn prepare_newly_loaded_chunks_for_delete(
        &mut self,
        grid: &MappingGrid,
        space: &mut ChunkSpace,
        edge_pos: i32,
        is_vertical: bool,
    ) {
        match self.state {
            ColumnState::LoadingOutside => {}
            ColumnState::LoadingInside => {
                if self.outside_chunk.is_none() {
                    let (x, z) = self.cell(edge_pos, is_vertical);
                    self.outside_chunk = grid.find_outside_chunk(space, x, z);
                }
                self.cancel_loading_overlappers(grid, space);
            }
            ColumnState::Unloaded | ColumnState::Loaded => return,
        }
        self.cancel_loading_outside(grid, space);
        self.state = ColumnState::Unloaded;
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use void_chunk::{outside_chunk_identifier, BoundingBox, ChunkSection, GeometryMapping, GridBounds};

    use super::*;

    fn shell_bounds() -> BoundingBox {
        BoundingBox::new(Vec3::new(40.0, 0.0, 40.0), Vec3::new(60.0, 10.0, 60.0))
    }

    fn setup() -> (ChunkSpace, MappingGrid) {
        let mut space = ChunkSpace::new();
        let settings = GeometryMapping::default().with_bounds(GridBounds::new(0, 1, 0, 0));
        let mapping = space.add_mapping(settings);
        let grid = MappingGrid::new(&space, mapping).unwrap();
        (space, grid)
    }

    fn load_now(space: &mut ChunkSpace, grid: &MappingGrid, identifier: &str, section: &ChunkSection) -> ChunkId {
        let id = space.find_or_add_chunk(identifier, grid.mapping());
        space.load_chunk_now(id, section).unwrap();
        id
    }

    #[test]
    fn test_cell() {
        let column = LoadingColumn::new(3);
        assert_eq!(column.cell(7, true), (7, 3));
        assert_eq!(column.cell(7, false), (3, 7));
    }

    #[test]
    fn test_loaded_outside_chunk_binds_in_one_step() {
        let (mut space, grid) = setup();
        let outside = load_now(
            &mut space,
            &grid,
            &outside_chunk_identifier(0, 0),
            &ChunkSection::default_outside(0, 0, 100.0, 0.0, 100.0),
        );

        let mut column = LoadingColumn::new(0);
        let mut any_loaded = false;
        assert!(column.step_load(&grid, &mut space, 0, true, &mut any_loaded));
        assert!(any_loaded);
        assert_eq!(column.outside_chunk(), Some(outside));

        let chunk = space.chunk(outside).unwrap();
        assert!(chunk.is_bound());
        assert!(chunk.completed());
        // West, south and north lead off the grid
        assert_eq!(chunk.unbound_portals().filter(|p| p.link.is_extern()).count(), 3);

        // Loaded is a fixed point
        any_loaded = false;
        assert!(column.step_load(&grid, &mut space, 0, true, &mut any_loaded));
        assert!(!any_loaded);
    }

    #[test]
    fn test_waits_for_shells() {
        let (mut space, grid) = setup();
        let section = ChunkSection::default_outside(0, 0, 100.0, 0.0, 100.0).with_overlapper("hall", shell_bounds());
        let outside = load_now(&mut space, &grid, &outside_chunk_identifier(0, 0), &section);

        let mut column = LoadingColumn::new(0);
        let mut any_loaded = false;
        // The shell has no resource, so its load fails and the column binds without it
        assert!(!column.step_load(&grid, &mut space, 0, false, &mut any_loaded));
        assert_eq!(column.state(), ColumnState::LoadingInside);

        space.process_loaded_chunks();
        assert!(column.step_load(&grid, &mut space, 0, false, &mut any_loaded));
        assert!(space.chunk(outside).unwrap().is_bound());

        let hall = space.find_chunk("hall", grid.mapping()).unwrap();
        assert!(space.chunk(hall).unwrap().load_failed());
        assert_eq!(ChunkLoadingRefCount::of(&space, hall), 1);
        assert!(space.chunk(outside).unwrap().completed());
    }

    #[test]
    fn test_unload_releases_everything() {
        let (mut space, grid) = setup();
        let section = ChunkSection::default_outside(0, 0, 100.0, 0.0, 100.0).with_overlapper("hall", shell_bounds());
        load_now(&mut space, &grid, &outside_chunk_identifier(0, 0), &section);
        load_now(&mut space, &grid, "hall", &ChunkSection::from_box(shell_bounds()));

        let mut column = LoadingColumn::new(0);
        let mut any_loaded = false;
        assert!(column.step_load(&grid, &mut space, 0, true, &mut any_loaded));
        let hall = space.find_chunk("hall", grid.mapping()).unwrap();
        assert!(space.chunk(hall).unwrap().is_bound());

        // A fresh column for the same cell finds the bound chunk
        let mut column = LoadingColumn::loaded(0);
        assert!(column.step_unload(&grid, &mut space, 0, true));
        assert_eq!(column.state(), ColumnState::Unloaded);
        assert_eq!(space.chunk_count(), space.chunks().filter(|(_, c)| !c.loaded()).count());
        assert!(space.find_chunk("hall", grid.mapping()).is_none());
        assert!(grid.find_outside_chunk(&space, 0, 0).is_none());
        assert!(space.bound_chunks().is_empty());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn test_cell_bound_elsewhere_is_not_reported_loaded() {
        let (mut space, grid) = setup();
        let outside = load_now(
            &mut space,
            &grid,
            &outside_chunk_identifier(0, 0),
            &ChunkSection::default_outside(0, 0, 100.0, 0.0, 100.0),
        );
        space.bind_chunk(outside, true).unwrap();

        let mut column = LoadingColumn::new(0);
        let mut any_loaded = false;
        for _ in 0..3 {
            if column.step_load(&grid, &mut space, 0, true, &mut any_loaded) {
                break;
            }
        }
        assert_eq!(column.state(), ColumnState::Loaded);
        assert!(!any_loaded);
    }

    #[test]
    fn test_cancel_while_loading_outside() {
        let (mut space, grid) = setup();
        let mut column = LoadingColumn::new(0);
        let mut any_loaded = false;
        assert!(!column.step_load(&grid, &mut space, 0, true, &mut any_loaded));
        assert_eq!(column.state(), ColumnState::LoadingOutside);

        assert!(column.step_unload(&grid, &mut space, 0, true));
        assert!(grid.find_outside_chunk(&space, 0, 0).is_none());
        assert_eq!(space.loads_in_flight(), 0);
        assert_eq!(space.process_loaded_chunks(), 0);
    }

    #[test]
    fn test_failed_outside_chunk_settles() {
        let (mut space, grid) = setup();
        let mut column = LoadingColumn::new(0);
        let mut any_loaded = false;
        column.step_load(&grid, &mut space, 0, true, &mut any_loaded);
        space.process_loaded_chunks();

        assert!(column.step_load(&grid, &mut space, 0, true, &mut any_loaded));
        assert!(!any_loaded);
        assert_eq!(column.outside_chunk(), None);
        assert!(grid.find_outside_chunk(&space, 0, 0).is_none());

        let mut column = LoadingColumn::loaded(0);
        assert!(column.step_unload(&grid, &mut space, 0, true));
    }

    #[test]
    fn test_prepare_for_delete() {
        let (mut space, grid) = setup();
        let section = ChunkSection::default_outside(0, 0, 100.0, 0.0, 100.0).with_overlapper("hall", shell_bounds());
        load_now(&mut space, &grid, &outside_chunk_identifier(0, 0), &section);

        let mut column = LoadingColumn::new(0);
        let mut any_loaded = false;
        column.step_load(&grid, &mut space, 0, true, &mut any_loaded);
        assert_eq!(column.state(), ColumnState::LoadingInside);

        column.prepare_newly_loaded_chunks_for_delete(&grid, &mut space, 0, true);
        assert_eq!(column.state(), ColumnState::Unloaded);
        assert_eq!(space.chunk_count(), 0);
    }
}
