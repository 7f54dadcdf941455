//! Interior chunks overlapping outside chunks
//!
//! Every outside chunk carries a [`ChunkOverlappers`] cache listing the
//! interior chunks ("shells") whose bounds reach into its grid cell. Records
//! come from the chunk's own resource. When an outside chunk first binds it
//! also adopts, as foreign records, the shells of already bound outside
//! neighbours that reach into it, so a shell spanning a cell border is known
//! to every cell it touches regardless of bind order.

use std::collections::HashSet;

use crate::cache::{ChunkCache, ChunkCacheType, Instance};
use crate::chunk::Chunk;
use crate::handle::ChunkId;
use crate::math::BoundingBox;
use crate::section::is_outside_identifier;
use crate::space::ChunkSpace;

/// One shell overlapping an outside chunk
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkOverlapper {
    identifier: String,
    bounds: BoundingBox,
    chunk: Option<ChunkId>,
    foreign: bool,
}

impl ChunkOverlapper {
    /// A record for the shell `identifier` with world-space `bounds`
    pub fn new(identifier: impl Into<String>, bounds: BoundingBox) -> Self {
        Self {
            identifier: identifier.into(),
            bounds,
            chunk: None,
            foreign: false,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Handle of the appointed shell, once resolved
    pub fn chunk(&self) -> Option<ChunkId> {
        self.chunk
    }

    /// Adopted from a neighbour rather than read from this chunk's resource
    pub fn is_foreign(&self) -> bool {
        self.foreign
    }
}

/// Shells overlapping one outside chunk
#[derive(Debug, Default)]
pub struct ChunkOverlappers {
    overlappers: Vec<ChunkOverlapper>,
    neighbours: Vec<String>,
    consulted: HashSet<String>,
    bound: bool,
    binding: bool,
    half_bound: bool,
}

impl ChunkOverlappers {
    /// Add a record; false if the shell is already listed
    pub fn add(&mut self, mut overlapper: ChunkOverlapper, foreign: bool) -> bool {
        if self.overlappers.iter().any(|o| o.identifier == overlapper.identifier) {
            return false;
        }
        overlapper.foreign = foreign;
        self.overlappers.push(overlapper);
        true
    }

    /// Remove a record of the given origin; false if absent
    pub fn del(&mut self, identifier: &str, foreign: bool) -> bool {
        let before = self.overlappers.len();
        self.overlappers
            .retain(|o| !(o.identifier == identifier && o.foreign == foreign));
        self.overlappers.len() != before
    }

    pub fn overlappers(&self) -> &[ChunkOverlapper] {
        &self.overlappers
    }

    pub fn len(&self) -> usize {
        self.overlappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlappers.is_empty()
    }

    /// Resolved shell handles, in record order
    pub fn chunks(&self) -> Vec<ChunkId> {
        self.overlappers.iter().filter_map(|o| o.chunk).collect()
    }

    /// Bound, and every outside neighbour has been consulted
    pub fn complete(&self) -> bool {
        self.bound && self.neighbours.iter().all(|n| self.consulted.contains(n))
    }

    /// Bound before some neighbour could be consulted
    pub fn is_half_bound(&self) -> bool {
        self.half_bound
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Resolve every record of an outside chunk to its appointed shell,
    /// creating stubs as needed. Stale handles are re-resolved.
    pub fn find_appointed_chunks(space: &mut ChunkSpace, outside: ChunkId) -> Vec<ChunkId> {
        let Some(mapping) = space.chunk(outside).map(Chunk::mapping) else {
            return Vec::new();
        };
        let Some(records) = Instance::<ChunkOverlappers>::find(space, outside) else {
            return Vec::new();
        };
        let unresolved: Vec<(usize, String)> = records
            .overlappers
            .iter()
            .enumerate()
            .filter(|(_, o)| o.chunk.map_or(true, |c| !space.contains(c)))
            .map(|(index, o)| (index, o.identifier.clone()))
            .collect();

        let mut resolved = Vec::with_capacity(unresolved.len());
        for (index, identifier) in unresolved {
            if is_outside_identifier(&identifier) {
                log::error!("Outside chunk '{}' listed as an overlapper", identifier);
                continue;
            }
            resolved.push((index, space.find_or_add_chunk(&identifier, mapping)));
        }

        let Some(records) = Instance::<ChunkOverlappers>::find_mut(space, outside) else {
            return Vec::new();
        };
        for (index, chunk) in resolved {
            records.overlappers[index].chunk = Some(chunk);
        }
        records.chunks()
    }

    /// A neighbour of this chunk bound after it
    fn note_neighbour_bound(&mut self, identifier: &str) {
        if self.binding || !self.bound {
            return;
        }
        if self.neighbours.iter().any(|n| n == identifier) {
            self.consulted.insert(identifier.to_string());
            self.half_bound = !self.complete();
        }
    }

    fn on_bind(&mut self, space: &mut ChunkSpace, chunk: ChunkId) {
        let Some(owner) = space.chunk(chunk) else {
            return;
        };
        let identifier = owner.identifier().to_string();
        let bounds = *owner.bounding_box();
        let neighbours: Vec<(String, Option<ChunkId>)> = owner
            .boundaries()
            .iter()
            .flat_map(|b| b.portals())
            .filter_map(|p| {
                let target = p.link.identifier()?;
                is_outside_identifier(target).then(|| (target.to_string(), p.link.handle()))
            })
            .collect();

        if self.bound {
            // Re-notification never adopts
            for (neighbour, handle) in neighbours {
                if handle.and_then(|h| space.chunk(h)).is_some_and(Chunk::is_bound) {
                    self.consulted.insert(neighbour);
                }
            }
            self.half_bound = !self.complete();
            return;
        }

        self.bound = true;
        self.binding = true;
        self.neighbours = neighbours.iter().map(|(n, _)| n.clone()).collect();

        for (neighbour, handle) in neighbours {
            let Some(handle) = handle else {
                continue;
            };
            if !space.chunk(handle).is_some_and(Chunk::is_bound) {
                continue;
            }
            self.consulted.insert(neighbour);

            let Some(theirs) = Instance::<ChunkOverlappers>::find_mut(space, handle) else {
                continue;
            };
            let adopted: Vec<ChunkOverlapper> = theirs
                .overlappers
                .iter()
                .filter(|o| !o.foreign && o.bounds.intersects(&bounds))
                .cloned()
                .collect();
            theirs.note_neighbour_bound(&identifier);

            for overlapper in adopted {
                if self.add(overlapper, true) {
                    log::trace!("Chunk '{}' adopted a foreign overlapper", identifier);
                }
            }
        }

        self.half_bound = !self.complete();
        self.binding = false;
    }

    fn on_unbind(&mut self) {
        self.overlappers.retain(|o| !o.foreign);
        self.neighbours.clear();
        self.consulted.clear();
        self.bound = false;
        self.half_bound = false;
    }
}

impl ChunkCache for ChunkOverlappers {
    fn bind(&mut self, space: &mut ChunkSpace, chunk: ChunkId, is_unbind: bool) {
        if is_unbind {
            self.on_unbind();
        } else {
            self.on_bind(space, chunk);
        }
    }
}

impl ChunkCacheType for ChunkOverlappers {
    fn create(_chunk: &Chunk) -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::mapping::GeometryMapping;
    use crate::section::{outside_chunk_identifier, ChunkSection};

    fn shell_bounds() -> BoundingBox {
        // Straddles the border between cells (0,0) and (1,0)
        BoundingBox::new(Vec3::new(90.0, 0.0, 40.0), Vec3::new(110.0, 10.0, 60.0))
    }

    fn load(space: &mut ChunkSpace, x: i32, with_shell: bool) -> ChunkId {
        let mapping = space.mappings().next().map(|(id, _)| id).unwrap();
        let id = space.find_or_add_chunk(&outside_chunk_identifier(x, 0), mapping);
        let mut section = ChunkSection::default_outside(x, 0, 100.0, 0.0, 100.0);
        if with_shell {
            section = section.with_overlapper("shell", shell_bounds());
        }
        space.load_chunk_now(id, &section).unwrap();
        id
    }

    fn space() -> ChunkSpace {
        let mut space = ChunkSpace::new();
        space.add_mapping(GeometryMapping::default());
        space
    }

    #[test]
    fn test_add_and_del() {
        let mut overlappers = ChunkOverlappers::default();
        assert!(overlappers.add(ChunkOverlapper::new("a", shell_bounds()), false));
        assert!(!overlappers.add(ChunkOverlapper::new("a", shell_bounds()), true));
        assert!(!overlappers.del("a", true));
        assert!(overlappers.del("a", false));
        assert!(overlappers.is_empty());
    }

    #[test]
    fn test_records_attached_on_load() {
        let mut space = space();
        let a = load(&mut space, 0, true);
        let records = Instance::<ChunkOverlappers>::find(&space, a).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records.overlappers()[0].is_foreign());
        assert!(!records.complete());
    }

    #[test]
    fn test_find_appointed_chunks() {
        let mut space = space();
        let a = load(&mut space, 0, true);
        let shells = ChunkOverlappers::find_appointed_chunks(&mut space, a);
        assert_eq!(shells.len(), 1);
        let mapping = space.chunk(a).unwrap().mapping();
        assert_eq!(space.find_chunk("shell", mapping), Some(shells[0]));

        // Stale handles are re-resolved
        space.del_chunk(shells[0]);
        let again = ChunkOverlappers::find_appointed_chunks(&mut space, a);
        assert_eq!(again.len(), 1);
        assert_ne!(again[0], shells[0]);
    }

    #[test]
    fn test_late_binder_adopts_neighbour_shells() {
        let mut space = space();
        let a = load(&mut space, 0, true);
        let b = load(&mut space, 1, false);

        space.bind_chunk(a, true).unwrap();
        space.bind_chunk(b, true).unwrap();

        let theirs = Instance::<ChunkOverlappers>::find(&space, b).unwrap();
        assert_eq!(theirs.len(), 1);
        assert!(theirs.overlappers()[0].is_foreign());
        assert!(theirs.is_bound());

        // Re-notification never adopts twice
        space.bind_portals(b, true, true);
        assert_eq!(Instance::<ChunkOverlappers>::find(&space, b).unwrap().len(), 1);

        space.unbind_chunk(b, false).unwrap();
        assert!(Instance::<ChunkOverlappers>::find(&space, b).unwrap().is_empty());
    }

    #[test]
    fn test_half_bound_until_neighbours_consulted() {
        let mut space = space();
        let a = load(&mut space, 0, false);
        space.bind_chunk(a, true).unwrap();
        let records = Instance::<ChunkOverlappers>::find(&space, a).unwrap();
        assert!(records.is_half_bound());
        assert!(!records.complete());
    }
}
