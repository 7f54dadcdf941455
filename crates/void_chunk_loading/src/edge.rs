//! One side of a mapping's loaded rectangle
//!
//! An edge sits on a grid line and moves one line of cells at a time. Moving
//! outward loads the line just beyond it; moving inward unloads the line
//! just inside it. While a line is in flight its columns are stepped every
//! tick; once all of them settle the edge commits the move.
//!
//! ```text
//!            Top (z = top)
//!         ┌───────────────┐
//!   Left  │  loaded cells │  Right
//! (x = l) │               │ (x = r)
//!         └───────────────┘
//!          Bottom (z = bottom)
//! ```

use void_chunk::ChunkSpace;

use crate::column::LoadingColumn;
use crate::grid::MappingGrid;

/// Which side of the loaded rectangle an edge bounds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeSide {
    Left,
    Bottom,
    Right,
    Top,
}

impl EdgeSide {
    pub const ALL: [EdgeSide; 4] = [EdgeSide::Left, EdgeSide::Bottom, EdgeSide::Right, EdgeSide::Top];

    /// Left and right edges run along z
    pub fn is_vertical(self) -> bool {
        matches!(self, EdgeSide::Left | EdgeSide::Right)
    }

    /// Sign of the outward direction along the edge's axis
    pub fn outward(self) -> i32 {
        match self {
            EdgeSide::Left | EdgeSide::Bottom => -1,
            EdgeSide::Right | EdgeSide::Top => 1,
        }
    }

    /// The edge across the rectangle
    pub fn opposite(self) -> EdgeSide {
        match self {
            EdgeSide::Left => EdgeSide::Right,
            EdgeSide::Bottom => EdgeSide::Top,
            EdgeSide::Right => EdgeSide::Left,
            EdgeSide::Top => EdgeSide::Bottom,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            EdgeSide::Left => 0,
            EdgeSide::Bottom => 1,
            EdgeSide::Right => 2,
            EdgeSide::Top => 3,
        }
    }
}

/// A line of cells being loaded or unloaded
#[derive(Clone, Debug)]
pub struct EdgeLine {
    edge_pos: i32,
    loading: bool,
    reversed: bool,
    columns: Vec<LoadingColumn>,
}

impl EdgeLine {
    /// Grid coordinate of the line across the edge's axis
    pub fn edge_pos(&self) -> i32 {
        self.edge_pos
    }

    /// Currently loading rather than unloading
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Running opposite to the move that started it
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Cells of the line, one per column
    pub fn columns(&self) -> &[LoadingColumn] {
        &self.columns
    }
}

/// One side of the loaded rectangle
#[derive(Clone, Debug)]
pub struct LoadingEdge {
    side: EdgeSide,
    pos: i32,
    dest: i32,
    line: Option<EdgeLine>,
}

impl LoadingEdge {
    /// An idle edge resting on grid line `pos`
    pub fn new(side: EdgeSide, pos: i32) -> Self {
        Self {
            side,
            pos,
            dest: pos,
            line: None,
        }
    }

    /// Which side this edge bounds
    pub fn side(&self) -> EdgeSide {
        self.side
    }

    /// Committed position: the grid line the loaded cells end on
    pub fn pos(&self) -> i32 {
        self.pos
    }

    /// Where the edge is heading
    pub fn dest(&self) -> i32 {
        self.dest
    }

    /// The line in flight, if any
    pub fn line(&self) -> Option<&EdgeLine> {
        self.line.as_ref()
    }

    /// A line is in flight
    pub fn is_busy(&self) -> bool {
        self.line.is_some()
    }

    /// Aim the edge at grid line `dest`
    pub(crate) fn set_dest(&mut self, dest: i32) {
        self.dest = dest;
    }

    /// Jump an idle edge; only valid while nothing is loaded
    pub(crate) fn reset(&mut self, pos: i32) {
        self.pos = pos;
        self.dest = pos;
    }

    /// `Some(true)` to grow, `Some(false)` to shrink, `None` when at rest
    pub fn wants_outward(&self) -> Option<bool> {
        let delta = (self.dest - self.pos) * self.side.outward();
        match delta {
            d if d > 0 => Some(true),
            d if d < 0 => Some(false),
            _ => None,
        }
    }

    /// Grid coordinate of the next line in the given direction
    pub fn next_line_pos(&self, outward: bool) -> i32 {
        match (self.side.outward() > 0, outward) {
            (true, true) => self.pos,
            (true, false) => self.pos - 1,
            (false, true) => self.pos - 1,
            (false, false) => self.pos,
        }
    }

    /// Start moving one line. Cells run `lo..hi` along the edge; an empty
    /// range commits at once. Returns whether a line was left in flight.
    pub(crate) fn begin_line(&mut self, outward: bool, lo: i32, hi: i32) -> bool {
        if lo >= hi {
            self.commit(outward);
            return false;
        }
        let columns = (lo..hi)
            .map(|pos| {
                if outward {
                    LoadingColumn::new(pos)
                } else {
                    LoadingColumn::loaded(pos)
                }
            })
            .collect();
        self.line = Some(EdgeLine {
            edge_pos: self.next_line_pos(outward),
            loading: outward,
            reversed: false,
            columns,
        });
        log::trace!(
            "{:?} edge at {} starts {} a line of {} cells",
            self.side,
            self.pos,
            if outward { "loading" } else { "unloading" },
            hi - lo
        );
        true
    }

    fn commit(&mut self, outward: bool) {
        self.pos += if outward { self.side.outward() } else { -self.side.outward() };
    }

    /// Step the line in flight. A destination on the other side of the line
    /// reverses it without committing. Returns whether a line finished.
    pub fn tick(&mut self, grid: &MappingGrid, space: &mut ChunkSpace, any_loaded: &mut bool) -> bool {
        let wants = self.wants_outward();
        let is_vertical = self.side.is_vertical();
        let Some(line) = self.line.as_mut() else {
            return false;
        };

        let want_loaded = if line.loading {
            wants == Some(true)
        } else {
            wants != Some(false)
        };
        if want_loaded != line.loading {
            log::debug!(
                "{:?} edge reverses its line at {} to {}",
                self.side,
                line.edge_pos,
                if want_loaded { "loading" } else { "unloading" }
            );
            line.loading = want_loaded;
            line.reversed = !line.reversed;
        }

        let edge_pos = line.edge_pos;
        let mut settled = true;
        for column in &mut line.columns {
            settled &= if line.loading {
                column.step_load(grid, space, edge_pos, is_vertical, any_loaded)
            } else {
                column.step_unload(grid, space, edge_pos, is_vertical)
            };
        }
        if !settled {
            return false;
        }

        let outward = line.loading != line.reversed;
        let committed = !line.reversed;
        self.line = None;
        if committed {
            self.commit(outward);
        }
        log::trace!("{:?} edge settled at {}", self.side, self.pos);
        true
    }

    /// Cancel loads of the line in flight and drop it without committing
    pub fn prepare_newly_loaded_chunks_for_delete(&mut self, grid: &MappingGrid, space: &mut ChunkSpace) {
        let is_vertical = self.side.is_vertical();
        if let Some(mut line) = self.line.take() {
            for column in &mut line.columns {
                column.prepare_newly_loaded_chunks_for_delete(grid, space, line.edge_pos, is_vertical);
            }
        }
    }
}
