//! Every streamed mapping of one chunk space
//!
//! [`EdgeGeometryMappings`] ticks all mappings against the same viewer,
//! retires condemned mappings once they have nothing left loaded, and tidies
//! the space after each tick.

use glam::Vec3;
use void_chunk::{ChunkSpace, GeometryMapping, MappingId};

use crate::config::StreamingConfig;
use crate::edge_mapping::{EdgeGeometryMapping, VERY_BIG};
use crate::error::{Result, StreamingError};
use crate::rect::Rect;

/// The streamed mappings of one space
#[derive(Debug, Default)]
pub struct EdgeGeometryMappings {
    config: StreamingConfig,
    mappings: Vec<EdgeGeometryMapping>,
}

impl EdgeGeometryMappings {
    /// No mappings yet; every mapping added later uses `config`
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            config,
            mappings: Vec::new(),
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Register a mapping with the space and start streaming it
    pub fn add(&mut self, space: &mut ChunkSpace, settings: GeometryMapping) -> Result<MappingId> {
        settings.validate()?;
        let name = settings.name.clone();
        let mapping = space.add_mapping(settings);
        self.add_existing(space, mapping)?;
        log::info!("Streaming geometry mapping '{}' as {:?}", name, mapping);
        Ok(mapping)
    }

    /// Start streaming a mapping the space already has
    pub fn add_existing(&mut self, space: &ChunkSpace, mapping: MappingId) -> Result<()> {
        if self.get(mapping).is_some() {
            return Err(StreamingError::DuplicateMapping(mapping));
        }
        self.mappings
            .push(EdgeGeometryMapping::new(space, mapping, self.config.clone())?);
        Ok(())
    }

    /// The streamed mapping with this id
    pub fn get(&self, mapping: MappingId) -> Option<&EdgeGeometryMapping> {
        self.mappings.iter().find(|m| m.mapping() == mapping)
    }

    pub fn get_mut(&mut self, mapping: MappingId) -> Option<&mut EdgeGeometryMapping> {
        self.mappings.iter_mut().find(|m| m.mapping() == mapping)
    }

    /// Every streamed mapping, condemned ones included
    pub fn iter(&self) -> impl Iterator<Item = &EdgeGeometryMapping> {
        self.mappings.iter()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Unload a mapping and drop it once empty; false if unknown
    pub fn condemn(&mut self, mapping: MappingId) -> bool {
        match self.get_mut(mapping) {
            Some(m) => {
                m.condemn();
                true
            }
            None => false,
        }
    }

    /// Tick every mapping against the viewer bounds `min_b..max_b`.
    /// Returns whether any cell was bound.
    pub fn tick(&mut self, space: &mut ChunkSpace, min_b: Vec3, max_b: Vec3, unload_only: bool) -> bool {
        space.process_loaded_chunks();

        let mut any_loaded = false;
        for mapping in &mut self.mappings {
            any_loaded |= mapping.tick(space, min_b, max_b, unload_only);
        }
        self.retire_condemned(space);

        space.focus();
        if self.config.reap_stubs {
            space.reap_stubs();
        }
        any_loaded
    }

    fn retire_condemned(&mut self, space: &mut ChunkSpace) {
        let (retired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.mappings)
            .into_iter()
            .partition(|m| m.is_condemned() && m.is_fully_unloaded());
        self.mappings = kept;
        for mapping in retired {
            space.del_mapping(mapping.mapping());
            log::info!("Retired geometry mapping {:?}", mapping.mapping());
        }
    }

    /// World rect loaded in every live mapping. [`VERY_BIG`] sides mean no
    /// mapping limits that side.
    pub fn calc_loaded_rect(&self) -> Rect {
        self.mappings
            .iter()
            .filter(|m| !m.is_condemned())
            .fold(Rect::centred(VERY_BIG), |rect, m| rect.intersection(&m.calc_loaded_rect()))
    }

    /// Every live mapping has reached its target
    pub fn has_fully_loaded(&self) -> bool {
        self.mappings
            .iter()
            .filter(|m| !m.is_condemned())
            .all(EdgeGeometryMapping::has_fully_loaded)
    }

    /// No mapping has anything loaded or in flight
    pub fn is_fully_unloaded(&self) -> bool {
        self.mappings.iter().all(EdgeGeometryMapping::is_fully_unloaded)
    }

    /// Cancel every line in flight so the mappings' chunks can be deleted
    pub fn prepare_newly_loaded_chunks_for_delete(&mut self, space: &mut ChunkSpace) {
        for mapping in &mut self.mappings {
            mapping.prepare_newly_loaded_chunks_for_delete(space);
        }
    }

    /// Cancel everything in flight and remove every mapping from the space
    pub fn shutdown(&mut self, space: &mut ChunkSpace) {
        self.prepare_newly_loaded_chunks_for_delete(space);
        for mapping in self.mappings.drain(..) {
            space.del_mapping(mapping.mapping());
        }
        space.process_loaded_chunks();
        log::debug!("Streaming shut down; {} chunks remain", space.chunk_count());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec2;
    use void_chunk::{
        outside_chunk_identifier, ChunkSection, ChunkSpaceConfig, GridBounds, ImmediateTaskManager, ItemFactories,
        MemoryResource,
    };

    use super::*;
    use crate::edge_mapping::PRETTY_BIG;

    fn space() -> (ChunkSpace, Arc<MemoryResource>) {
        let resource = Arc::new(MemoryResource::new());
        let space = ChunkSpace::with_loader(
            ChunkSpaceConfig::default(),
            Arc::new(ImmediateTaskManager::new()),
            resource.clone(),
            ItemFactories::with_defaults(),
        );
        (space, resource)
    }

    fn publish(resource: &MemoryResource, settings: &GeometryMapping) {
        let b = settings.bounds;
        for z in b.min_z..=b.max_z {
            for x in b.min_x..=b.max_x {
                let identifier = outside_chunk_identifier(x, z);
                resource.insert_section(
                    settings.resource_id(&identifier),
                    &ChunkSection::default_outside(x, z, settings.grid_size, 0.0, 100.0),
                );
            }
        }
    }

    fn settle(mappings: &mut EdgeGeometryMappings, space: &mut ChunkSpace, min: Vec3, max: Vec3) {
        for _ in 0..100 {
            mappings.tick(space, min, max, false);
            if mappings.has_fully_loaded() {
                return;
            }
        }
        panic!("mappings never settled");
    }

    #[test]
    fn test_add_and_duplicates() {
        let (mut space, _) = space();
        let mut mappings = EdgeGeometryMappings::default();
        let id = mappings.add(&mut space, GeometryMapping::new("town", "town")).unwrap();
        assert_eq!(mappings.len(), 1);
        assert!(matches!(
            mappings.add_existing(&space, id),
            Err(StreamingError::DuplicateMapping(_))
        ));
        assert!(matches!(
            mappings.add_existing(&space, MappingId(42)),
            Err(StreamingError::UnknownMapping(_))
        ));

        let bad = GeometryMapping::new("bad", "bad").with_grid_size(0.0);
        assert!(matches!(mappings.add(&mut space, bad), Err(StreamingError::Config(_))));

        let wrapping = GeometryMapping::new("far", "far").with_bounds(GridBounds::new(32767, 32768, 0, 0));
        assert!(matches!(mappings.add(&mut space, wrapping), Err(StreamingError::Config(_))));
        assert_eq!(mappings.len(), 1);
    }

    #[test]
    fn test_loaded_rect_intersects_mappings() {
        let (mut space, resource) = space();
        let mut mappings = EdgeGeometryMappings::default();
        assert_eq!(mappings.calc_loaded_rect(), Rect::centred(VERY_BIG));

        let west = GeometryMapping::new("west", "west").with_bounds(GridBounds::new(-4, 3, -4, 3));
        let east = GeometryMapping::new("east", "east")
            .with_bounds(GridBounds::new(-4, 3, -4, 3))
            .with_translation(Vec3::new(50.0, 0.0, 0.0));
        publish(&resource, &west);
        publish(&resource, &east);
        mappings.add(&mut space, west).unwrap();
        mappings.add(&mut space, east).unwrap();

        settle(&mut mappings, &mut space, Vec3::new(-50.0, 0.0, -50.0), Vec3::new(50.0, 0.0, 50.0));
        // west loads -100..100, east loads -50..150
        let rect = mappings.calc_loaded_rect();
        assert_eq!(rect.min, Vec2::new(-50.0, -100.0));
        assert_eq!(rect.max, Vec2::new(100.0, 100.0));
        assert!(rect.max.x < PRETTY_BIG);
    }

    #[test]
    fn test_condemned_mapping_is_retired() {
        let (mut space, resource) = space();
        let mut mappings = EdgeGeometryMappings::default();
        let settings = GeometryMapping::new("cave", "cave").with_bounds(GridBounds::new(-2, 1, -2, 1));
        publish(&resource, &settings);
        let id = mappings.add(&mut space, settings).unwrap();

        settle(&mut mappings, &mut space, Vec3::splat(-150.0), Vec3::splat(150.0));
        assert_eq!(space.bound_chunks().len(), 16);

        assert!(mappings.condemn(id));
        assert!(!mappings.condemn(MappingId(77)));
        for _ in 0..20 {
            mappings.tick(&mut space, Vec3::splat(-150.0), Vec3::splat(150.0), false);
            if mappings.is_empty() {
                break;
            }
        }
        assert!(mappings.is_empty());
        assert!(space.mapping(id).is_none());
        assert_eq!(space.chunk_count(), 0);
    }

    #[test]
    fn test_shutdown_cancels_loads() {
        let (mut space, resource) = space();
        let mut mappings = EdgeGeometryMappings::default();
        let settings = GeometryMapping::new("field", "field").with_bounds(GridBounds::new(-2, 1, -2, 1));
        publish(&resource, &settings);
        mappings.add(&mut space, settings).unwrap();

        // One tick submits the first line without binding it
        mappings.tick(&mut space, Vec3::splat(-150.0), Vec3::splat(150.0), false);
        assert!(space.loads_in_flight() > 0);

        mappings.shutdown(&mut space);
        assert!(mappings.is_empty());
        assert_eq!(space.loads_in_flight(), 0);
        assert_eq!(space.chunk_count(), 0);
    }

    #[test]
    fn test_stubs_are_reaped() {
        let (mut space, resource) = space();
        let mut mappings = EdgeGeometryMappings::default();
        let settings = GeometryMapping::new("hill", "hill").with_bounds(GridBounds::new(-4, 3, -4, 3));
        publish(&resource, &settings);
        mappings.add(&mut space, settings).unwrap();

        settle(&mut mappings, &mut space, Vec3::splat(-50.0), Vec3::splat(50.0));
        mappings.tick(&mut space, Vec3::splat(-50.0), Vec3::splat(50.0), false);
        // Only the four bound cells remain; neighbour stubs are gone
        assert_eq!(space.chunk_count(), 4);
        assert_eq!(space.bound_chunks().len(), 4);
    }
}
