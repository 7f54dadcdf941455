//! Chunk spaces
//!
//! A [`ChunkSpace`] owns every chunk of a world in a generational arena and
//! is the only place where one chunk can reach another. It registers
//! geometry mappings, appoints the authoritative chunk for each identifier,
//! runs background loads, and binds chunks to their neighbours.
//!
//! ```ignore
//! use void_chunk::prelude::*;
//!
//! let mut space = ChunkSpace::new();
//! let mapping = space.add_mapping(GeometryMapping::new("world", "spaces/world"));
//! let chunk = space.find_or_add_chunk("00000000o", mapping);
//!
//! space.load_chunk(chunk, TaskPriority::Normal);
//! if space.poll_loaded(chunk) {
//!     space.bind_chunk(chunk, true)?;
//!     space.focus_chunk(chunk);
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::Vec3;

use crate::boundary::PortalLink;
use crate::cache::{CacheRegistry, Instance};
use crate::chunk::Chunk;
use crate::config::ChunkSpaceConfig;
use crate::contract;
use crate::error::{ChunkError, Result};
use crate::handle::{ChunkArena, ChunkId, MappingId};
use crate::item::ItemFactories;
use crate::loader::ChunkLoader;
use crate::mapping::GeometryMapping;
use crate::overlapper::{ChunkOverlapper, ChunkOverlappers};
use crate::resource::{ChunkResource, MemoryResource};
use crate::section::{outside_chunk_identifier, parse_outside_identifier, ChunkContents, ChunkSection, OverlapperSection};
use crate::task::{ImmediateTaskManager, TaskManager, TaskPriority, WorkerPool};

/// Registry of every chunk in a world
pub struct ChunkSpace {
    config: ChunkSpaceConfig,
    chunks: ChunkArena<Chunk>,
    appointed: HashMap<(MappingId, String), ChunkId>,
    mappings: HashMap<MappingId, GeometryMapping>,
    next_mapping: u32,
    caches: CacheRegistry,
    blurred: Vec<ChunkId>,
    seen: HashSet<ChunkId>,
    loader: ChunkLoader,
}

impl ChunkSpace {
    /// An empty space that loads inline from an empty in-memory store
    pub fn new() -> Self {
        Self::with_loader(
            ChunkSpaceConfig::default(),
            Arc::new(ImmediateTaskManager::new()),
            Arc::new(MemoryResource::new()),
            ItemFactories::with_defaults(),
        )
    }

    /// Create a space loading through the given task manager and resource
    pub fn with_loader(
        config: ChunkSpaceConfig,
        tasks: Arc<dyn TaskManager>,
        resource: Arc<dyn ChunkResource>,
        factories: ItemFactories,
    ) -> Self {
        Self {
            config,
            chunks: ChunkArena::new(),
            appointed: HashMap::new(),
            mappings: HashMap::new(),
            next_mapping: 0,
            caches: CacheRegistry::new(),
            blurred: Vec::new(),
            seen: HashSet::new(),
            loader: ChunkLoader::new(tasks, resource, Arc::new(factories)),
        }
    }

    /// Create a space with a worker pool sized by `config`
    pub fn from_config(config: ChunkSpaceConfig, resource: Arc<dyn ChunkResource>) -> Result<Self> {
        config.validate()?;
        let tasks: Arc<dyn TaskManager> = if config.worker_threads == 0 {
            Arc::new(ImmediateTaskManager::new())
        } else {
            Arc::new(WorkerPool::new(config.worker_threads).map_err(ChunkError::Spawn)?)
        };
        Ok(Self::with_loader(config, tasks, resource, ItemFactories::with_defaults()))
    }

    pub fn config(&self) -> &ChunkSpaceConfig {
        &self.config
    }

    // ========================================================================
    // Mappings
    // ========================================================================

    /// Register a geometry mapping
    pub fn add_mapping(&mut self, mapping: GeometryMapping) -> MappingId {
        let id = MappingId(self.next_mapping);
        self.next_mapping += 1;
        log::info!("Added geometry mapping '{}' as {:?}", mapping.name, id);
        self.mappings.insert(id, mapping);
        id
    }

    pub fn mapping(&self, id: MappingId) -> Option<&GeometryMapping> {
        self.mappings.get(&id)
    }

    pub fn mappings(&self) -> impl Iterator<Item = (MappingId, &GeometryMapping)> {
        self.mappings.iter().map(|(id, m)| (*id, m))
    }

    /// Remove a mapping, unbinding and deleting every chunk it owns
    pub fn del_mapping(&mut self, id: MappingId) -> Option<GeometryMapping> {
        let owned = self.chunks_of(id);
        for chunk in &owned {
            if self.chunks.get(*chunk).is_some_and(Chunk::is_bound) {
                if let Err(e) = self.unbind_chunk(*chunk, true) {
                    log::error!("Failed to unbind {:?} while removing mapping: {}", chunk, e);
                }
            }
            self.unload_chunk(*chunk);
            self.del_chunk(*chunk);
        }
        let mapping = self.mappings.remove(&id)?;
        log::info!("Removed geometry mapping '{}' ({} chunks)", mapping.name, owned.len());
        Some(mapping)
    }

    // ========================================================================
    // Chunks
    // ========================================================================

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn chunk_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.chunks.get_mut(id)
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.chunks.contains(id)
    }

    /// Number of live chunks, stubs included
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> impl Iterator<Item = (ChunkId, &Chunk)> {
        self.chunks.iter()
    }

    /// Handles of every chunk in a mapping
    pub fn chunks_of(&self, mapping: MappingId) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .filter(|(_, c)| c.mapping() == mapping)
            .map(|(id, _)| id)
            .collect()
    }

    /// Handles of every bound chunk
    pub fn bound_chunks(&self) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .filter(|(_, c)| c.is_bound())
            .map(|(id, _)| id)
            .collect()
    }

    /// The authoritative chunk for an identifier
    pub fn find_chunk(&self, identifier: &str, mapping: MappingId) -> Option<ChunkId> {
        self.appointed
            .get(&(mapping, identifier.to_string()))
            .copied()
            .filter(|id| self.chunks.contains(*id))
    }

    /// The outside chunk of a grid cell, if one exists
    pub fn find_outside_chunk(&self, mapping: MappingId, x: i32, z: i32) -> Option<ChunkId> {
        self.find_chunk(&outside_chunk_identifier(x, z), mapping)
    }

    /// The authoritative chunk for an identifier, creating an unloaded stub
    /// if there is none
    pub fn find_or_add_chunk(&mut self, identifier: &str, mapping: MappingId) -> ChunkId {
        if let Some(id) = self.find_chunk(identifier, mapping) {
            return id;
        }

        let mut chunk = match self.mappings.get(&mapping) {
            Some(settings) => Chunk::new(identifier, mapping, settings),
            None => {
                contract!(false, "Chunk '{}' added to unknown mapping {:?}", identifier, mapping);
                Chunk::new(identifier, mapping, &GeometryMapping::default())
            }
        };
        chunk.appoint_as_authoritative();
        let id = self.chunks.insert(chunk);
        self.appointed.insert((mapping, identifier.to_string()), id);
        log::trace!("Appointed stub chunk '{}' as {:?}", identifier, id);
        id
    }

    /// Insert a chunk built elsewhere. It is appointed unless an appointed
    /// chunk with the same identifier is already live.
    pub fn add_chunk(&mut self, mut chunk: Chunk) -> ChunkId {
        let key = (chunk.mapping(), chunk.identifier().to_string());
        let taken = self
            .appointed
            .get(&key)
            .is_some_and(|id| self.chunks.contains(*id));
        if taken {
            log::warn!("Chunk '{}' added twice; the new one is not appointed", key.1);
            chunk.revoke_appointment();
            return self.chunks.insert(chunk);
        }

        chunk.appoint_as_authoritative();
        let id = self.chunks.insert(chunk);
        self.appointed.insert(key, id);
        id
    }

    /// Delete an unbound chunk, cancelling any load in flight
    pub fn del_chunk(&mut self, id: ChunkId) -> Option<Chunk> {
        let chunk = self.chunks.get(id)?;
        if !contract!(!chunk.is_bound(), "Chunk '{}' deleted while bound", chunk.identifier()) {
            return None;
        }
        if chunk.loading() {
            self.loader.cancel(id);
        }

        let key = (chunk.mapping(), chunk.identifier().to_string());
        if self.appointed.get(&key) == Some(&id) {
            self.appointed.remove(&key);
        }
        self.remove_from_blurred(id);
        self.seen.remove(&id);
        let chunk = self.chunks.remove(id);
        log::trace!("Deleted chunk {:?}", id);
        chunk
    }

    /// Delete idle stubs: chunks never loaded, not loading, and carrying no
    /// caches. Returns how many were deleted.
    pub fn reap_stubs(&mut self) -> usize {
        let idle: Vec<ChunkId> = self
            .chunks
            .iter()
            .filter(|(_, c)| {
                !c.loaded() && !c.loading() && !c.is_bound() && !c.load_failed() && c.caches().is_empty()
            })
            .map(|(id, _)| id)
            .collect();
        for id in &idle {
            self.del_chunk(*id);
        }
        if !idle.is_empty() {
            log::trace!("Reaped {} stub chunks", idle.len());
        }
        idle.len()
    }

    pub fn cache_registry(&self) -> &CacheRegistry {
        &self.caches
    }

    pub fn cache_registry_mut(&mut self) -> &mut CacheRegistry {
        &mut self.caches
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Submit a background load. The chunk stays `loading` until it is
    /// bound or unloaded.
    pub fn load_chunk(&mut self, id: ChunkId, priority: TaskPriority) -> bool {
        let Some(chunk) = self.chunks.get_mut(id) else {
            return false;
        };
        if !contract!(
            !chunk.loaded() && !chunk.is_bound() && !chunk.loading(),
            "Chunk '{}' is already loading or loaded",
            chunk.identifier()
        ) {
            return false;
        }
        let Some(settings) = self.mappings.get(&chunk.mapping()) else {
            log::error!("Chunk '{}' belongs to no mapping", chunk.identifier());
            return false;
        };

        chunk.set_loading(true);
        self.loader.load(id, chunk.identifier(), settings, priority);
        true
    }

    /// Load synchronously from a section already in hand
    pub fn load_chunk_now(&mut self, id: ChunkId, section: &ChunkSection) -> Result<()> {
        let chunk = self.chunks.get(id).ok_or(ChunkError::UnknownChunk(id))?;
        if chunk.loaded() || chunk.is_bound() {
            return Err(ChunkError::InvalidState {
                identifier: chunk.identifier().to_string(),
                operation: "load",
                reason: "chunk is already loaded",
            });
        }
        let settings = self.mappings.get(&chunk.mapping()).cloned().unwrap_or_default();
        let contents = ChunkContents::from_section(
            chunk.identifier(),
            section,
            settings.transform(),
            settings.grid_size,
            self.loader.factories(),
        )?;
        if chunk.loading() {
            self.loader.cancel(id);
        }
        self.apply_loaded_contents(id, contents);
        Ok(())
    }

    /// Apply every finished load; returns how many chunks became loaded
    pub fn process_loaded_chunks(&mut self) -> usize {
        let mut applied = 0;
        for completion in self.loader.drain() {
            let Some(chunk) = self.chunks.get_mut(completion.chunk) else {
                continue;
            };
            if !chunk.loading() || chunk.loaded() {
                log::debug!("Ignoring unwanted load of '{}'", chunk.identifier());
                continue;
            }

            match completion.result {
                Ok(contents) => {
                    self.apply_loaded_contents(completion.chunk, contents);
                    applied += 1;
                }
                Err(_) if completion.cancelled => chunk.set_loading(false),
                Err(e) => {
                    log::warn!("Chunk '{}' failed to load: {}", chunk.identifier(), e);
                    chunk.mark_load_failed();
                }
            }
        }
        applied
    }

    /// Apply finished loads, then report whether the chunk is loaded
    pub fn poll_loaded(&mut self, id: ChunkId) -> bool {
        self.process_loaded_chunks();
        self.chunks.get(id).is_some_and(Chunk::loaded)
    }

    /// Check whether any loads are still in flight
    pub fn loads_in_flight(&self) -> usize {
        self.loader.in_flight()
    }

    fn apply_loaded_contents(&mut self, id: ChunkId, mut contents: ChunkContents) {
        let overlappers = std::mem::take(&mut contents.overlappers);
        let Some(chunk) = self.chunks.get_mut(id) else {
            return;
        };
        chunk.apply_contents(contents);
        log::debug!("Chunk '{}' loaded", chunk.identifier());
        self.attach_overlappers(id, overlappers);
    }

    // Every outside chunk carries overlappers so it can adopt its neighbours'
    fn attach_overlappers(&mut self, id: ChunkId, sections: Vec<OverlapperSection>) {
        if !self.chunks.get(id).is_some_and(Chunk::is_outside_chunk) {
            return;
        }
        if let Some(cache) = Instance::<ChunkOverlappers>::get(self, id) {
            for section in sections {
                cache.add(ChunkOverlapper::new(section.chunk, section.bounds), false);
            }
        }
    }

    /// Drop a chunk that was loaded (or is loading) but never bound
    pub fn unload_chunk_before_binding(&mut self, id: ChunkId) -> bool {
        let Some(chunk) = self.chunks.get_mut(id) else {
            return false;
        };
        if !contract!(
            (chunk.loaded() || chunk.loading()) && !chunk.is_bound(),
            "Chunk '{}' is not waiting to be bound",
            chunk.identifier()
        ) {
            return false;
        }
        if !chunk.loaded() {
            chunk.set_loading(false);
            self.loader.cancel(id);
            return true;
        }
        chunk.set_loading(false);
        chunk.unload()
    }

    /// Unload an unbound chunk
    pub fn unload_chunk(&mut self, id: ChunkId) -> bool {
        let Some(chunk) = self.chunks.get_mut(id) else {
            return false;
        };
        if chunk.loading() && !chunk.loaded() {
            chunk.set_loading(false);
            self.loader.cancel(id);
            return true;
        }
        chunk.unload()
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Bind a loaded chunk into the world
    pub fn bind_chunk(&mut self, id: ChunkId, form_portal_connections: bool) -> Result<()> {
        let chunk = self.chunks.get(id).ok_or(ChunkError::UnknownChunk(id))?;
        if !contract!(!chunk.is_bound(), "Chunk '{}' bound twice", chunk.identifier()) {
            return Err(ChunkError::InvalidState {
                identifier: chunk.identifier().to_string(),
                operation: "bind",
                reason: "chunk is already bound",
            });
        }
        if !chunk.loaded() {
            return Err(ChunkError::InvalidState {
                identifier: chunk.identifier().to_string(),
                operation: "bind",
                reason: "chunk is not loaded",
            });
        }

        self.bind_portals(id, form_portal_connections, false);
        if let Some(chunk) = self.chunks.get_mut(id) {
            chunk.set_bound(true);
        }
        self.notify_caches_of_bind(id, false);
        self.lend_on_bind(id);
        self.blurred_chunk(id);

        if let Some(chunk) = self.chunks.get(id) {
            log::debug!(
                "Bound chunk '{}' ({} bound portals)",
                chunk.identifier(),
                chunk.bound_portals().count()
            );
        }
        Ok(())
    }

    /// Resolve portal targets to handles and, when `form` is set, connect
    /// unbound portals to matching portals of bound neighbours
    pub fn bind_portals(&mut self, id: ChunkId, form: bool, notify_caches: bool) {
        let Some(chunk) = self.chunks.get(id) else {
            return;
        };
        let mapping = chunk.mapping();
        let identifier = chunk.identifier().to_string();
        let grid_bounds = self.mappings.get(&mapping).map(|m| m.bounds);
        let tolerance = self.config.portal_tolerance;

        let mut pending = Vec::new();
        for (bi, boundary) in chunk.boundaries().iter().enumerate() {
            for (pi, portal) in boundary.unbound_portals.iter().enumerate() {
                if let Some(target) = portal.link.identifier() {
                    pending.push((bi, pi, target.to_string(), portal.world_centre(chunk.transform())));
                }
            }
        }

        let mut resolved = Vec::new();
        let mut externs = Vec::new();
        let mut connect = Vec::new();
        for (bi, pi, target, centre) in pending {
            if let (Some((x, z)), Some(bounds)) = (parse_outside_identifier(&target), grid_bounds) {
                if !bounds.contains(x, z) {
                    externs.push((bi, pi));
                    continue;
                }
            }

            let handle = self.find_or_add_chunk(&target, mapping);
            if handle == id {
                log::warn!("Chunk '{}' has a portal to itself", identifier);
                continue;
            }
            resolved.push((bi, pi, handle));
            if !form {
                continue;
            }

            let Some(other) = self.chunks.get_mut(handle) else {
                continue;
            };
            if !other.is_bound() {
                continue;
            }
            let Some((obi, opi)) = other.find_matching_portal(&identifier, centre, tolerance) else {
                log::debug!("Chunk '{}' has no portal back to '{}'", target, identifier);
                continue;
            };
            let boundary = &mut other.boundaries_mut()[obi];
            if let PortalLink::Chunk(back) = &mut boundary.unbound_portals[opi].link {
                back.handle = Some(id);
            }
            boundary.bind_portal(opi);
            connect.push((bi, pi));
        }

        let Some(chunk) = self.chunks.get_mut(id) else {
            return;
        };
        for (bi, pi, handle) in resolved {
            if let PortalLink::Chunk(target) = &mut chunk.boundaries_mut()[bi].unbound_portals[pi].link {
                target.handle = Some(handle);
            }
        }
        for (bi, pi) in externs {
            chunk.boundaries_mut()[bi].unbound_portals[pi].link = PortalLink::Extern;
        }
        // Highest index first so earlier indices stay valid
        connect.sort_unstable_by(|a, b| b.cmp(a));
        for (bi, pi) in connect {
            chunk.boundaries_mut()[bi].bind_portal(pi);
        }

        if notify_caches {
            self.notify_caches_of_bind(id, false);
        }
    }

    /// Take a chunk out of the world. With `cut` the chunk also forgets
    /// which chunks its portals led to.
    pub fn unbind_chunk(&mut self, id: ChunkId, cut: bool) -> Result<()> {
        let chunk = self.chunks.get(id).ok_or(ChunkError::UnknownChunk(id))?;
        if !chunk.is_bound() {
            return Err(ChunkError::InvalidState {
                identifier: chunk.identifier().to_string(),
                operation: "unbind",
                reason: "chunk is not bound",
            });
        }

        self.notify_caches_of_bind(id, true);
        self.withdraw_loans(id);

        let Some(chunk) = self.chunks.get_mut(id) else {
            return Err(ChunkError::UnknownChunk(id));
        };
        let mut neighbours = Vec::new();
        for boundary in chunk.boundaries_mut() {
            for index in (0..boundary.bound_portals.len()).rev() {
                let link = &mut boundary.bound_portals[index].link;
                if link.is_earth() {
                    continue;
                }
                if let PortalLink::Chunk(target) = link {
                    if let Some(handle) = target.handle {
                        neighbours.push(handle);
                    }
                    if cut {
                        target.handle = None;
                    }
                }
                boundary.unbind_portal(index);
            }
        }
        chunk.set_bound(false);
        let identifier = chunk.identifier().to_string();

        for neighbour in neighbours {
            let Some(other) = self.chunks.get_mut(neighbour) else {
                continue;
            };
            for boundary in other.boundaries_mut() {
                for index in (0..boundary.bound_portals.len()).rev() {
                    if boundary.bound_portals[index].link.handle() == Some(id) {
                        boundary.unbind_portal(index);
                    }
                }
            }
            other.set_completed(false);
        }

        self.remove_from_blurred(id);
        self.seen.remove(&id);
        log::debug!("Unbound chunk '{}'", identifier);
        Ok(())
    }

    fn notify_caches_of_bind(&mut self, id: ChunkId, is_unbind: bool) {
        let Some(chunk) = self.chunks.get_mut(id) else {
            return;
        };
        let mut detached = chunk.take_caches();
        for cache in detached.iter_mut() {
            cache.bind(self, id, is_unbind);
        }
        if let Some(chunk) = self.chunks.get_mut(id) {
            chunk.caches_mut().restore(detached);
        }
    }

    // ========================================================================
    // Focus
    // ========================================================================

    /// Focus a bound chunk. Outside chunks also focus their bound shells.
    /// Returns the new focus count.
    pub fn focus_chunk(&mut self, id: ChunkId) -> i32 {
        let Some(chunk) = self.chunks.get_mut(id) else {
            return 0;
        };
        if !contract!(chunk.is_bound(), "Chunk '{}' focused while unbound", chunk.identifier()) {
            return 0;
        }

        let mut detached = chunk.take_caches();
        let mut count = 1;
        for cache in detached.iter_mut() {
            count += cache.focus(self, id);
        }
        if let Some(chunk) = self.chunks.get_mut(id) {
            chunk.caches_mut().restore(detached);
            chunk.set_focus_count(count);
        }
        self.remove_from_blurred(id);

        let shells: Vec<ChunkId> = Instance::<ChunkOverlappers>::find(self, id)
            .map(|o| o.overlappers().iter().filter_map(ChunkOverlapper::chunk).collect())
            .unwrap_or_default();
        for shell in shells {
            if self.chunks.get(shell).is_some_and(|c| c.is_bound() && !c.focussed()) {
                self.focus_chunk(shell);
            }
        }

        self.refresh_completed(id);
        count
    }

    /// Focus every blurred chunk; returns how many were focused
    pub fn focus(&mut self) -> usize {
        let blurred = std::mem::take(&mut self.blurred);
        let mut focused = 0;
        for id in blurred {
            if self.chunks.get(id).is_some_and(Chunk::is_bound) {
                self.focus_chunk(id);
                focused += 1;
            }
        }
        focused
    }

    /// Recompute whether a chunk is completed: bound, focused, and (for an
    /// outside chunk) every overlapping shell bound and focused
    pub fn refresh_completed(&mut self, id: ChunkId) -> bool {
        let Some(chunk) = self.chunks.get(id) else {
            return false;
        };
        let complete = chunk.is_bound()
            && chunk.focussed()
            && Instance::<ChunkOverlappers>::find(self, id).map_or(true, |overlappers| {
                overlappers.overlappers().iter().all(|o| {
                    o.chunk()
                        .and_then(|shell| self.chunks.get(shell))
                        .is_some_and(|shell| shell.load_failed() || (shell.is_bound() && shell.focussed()))
                })
            });
        if let Some(chunk) = self.chunks.get_mut(id) {
            chunk.set_completed(complete);
        }
        complete
    }

    /// Drop a focused chunk's focus so the next [`focus`](Self::focus)
    /// recomputes it. Returns whether the chunk was focused.
    pub fn smudge_chunk(&mut self, id: ChunkId) -> bool {
        let Some(chunk) = self.chunks.get_mut(id) else {
            return false;
        };
        if !chunk.focussed() {
            return false;
        }
        chunk.set_focus_count(0);
        chunk.set_completed(false);
        self.blurred_chunk(id);
        true
    }

    /// Queue a bound chunk for focusing
    pub fn blurred_chunk(&mut self, id: ChunkId) {
        if !self.blurred.contains(&id) {
            self.blurred.push(id);
        }
    }

    pub fn remove_from_blurred(&mut self, id: ChunkId) -> bool {
        match self.blurred.iter().position(|b| *b == id) {
            Some(index) => {
                self.blurred.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_blurred(&self, id: ChunkId) -> bool {
        self.blurred.contains(&id)
    }

    pub fn blurred(&self) -> &[ChunkId] {
        &self.blurred
    }

    /// Mark a chunk as seen by traversal; returns false if it already was
    pub fn see_chunk(&mut self, id: ChunkId) -> bool {
        self.seen.insert(id)
    }

    pub fn has_seen(&self, id: ChunkId) -> bool {
        self.seen.contains(&id)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// The bound chunk containing a world point. Interior chunks win over
    /// outside chunks, and smaller interiors over larger ones.
    pub fn find_chunk_from_point(&self, point: Vec3) -> Option<ChunkId> {
        self.chunks
            .iter()
            .filter(|(_, c)| c.is_bound() && c.contains(point, 0.0))
            .min_by(|(_, a), (_, b)| {
                a.is_outside_chunk()
                    .cmp(&b.is_outside_chunk())
                    .then(a.volume().total_cmp(&b.volume()))
            })
            .map(|(id, _)| id)
    }

    /// Apply finished loads and focus blurred chunks
    pub fn tick(&mut self) -> usize {
        let applied = self.process_loaded_chunks();
        self.focus();
        applied
    }
}

impl Default for ChunkSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::BoundingBox;
    use crate::section::PortalSection;
    use crate::task::QueuedTaskManager;

    fn outside_space() -> (ChunkSpace, MappingId) {
        let mut space = ChunkSpace::new();
        let mapping = space.add_mapping(GeometryMapping::default());
        (space, mapping)
    }

    fn load_outside(space: &mut ChunkSpace, mapping: MappingId, x: i32, z: i32) -> ChunkId {
        let id = space.find_or_add_chunk(&outside_chunk_identifier(x, z), mapping);
        let section = ChunkSection::default_outside(x, z, 100.0, 0.0, 100.0);
        space.load_chunk_now(id, &section).unwrap();
        id
    }

    #[test]
    fn test_find_or_add_appoints_once() {
        let (mut space, mapping) = outside_space();
        let a = space.find_or_add_chunk("shell", mapping);
        let b = space.find_or_add_chunk("shell", mapping);
        assert_eq!(a, b);
        assert!(space.chunk(a).unwrap().is_appointed());
        assert_eq!(space.find_chunk("shell", mapping), Some(a));

        let other = space.add_mapping(GeometryMapping::new("other", "other"));
        assert_ne!(space.find_or_add_chunk("shell", other), a);
    }

    #[test]
    fn test_del_chunk_invalidates_handle() {
        let (mut space, mapping) = outside_space();
        let a = space.find_or_add_chunk("shell", mapping);
        assert!(space.del_chunk(a).is_some());
        assert!(space.chunk(a).is_none());
        assert_eq!(space.find_chunk("shell", mapping), None);

        let b = space.find_or_add_chunk("shell", mapping);
        assert_ne!(a, b);
    }

    #[test]
    fn test_background_load() {
        let tasks = Arc::new(QueuedTaskManager::new());
        let resource = Arc::new(MemoryResource::new());
        let mut space = ChunkSpace::with_loader(
            ChunkSpaceConfig::default(),
            tasks.clone(),
            resource.clone(),
            ItemFactories::with_defaults(),
        );
        let mapping = space.add_mapping(GeometryMapping::default());
        let identifier = outside_chunk_identifier(0, 0);
        resource.insert_section(
            format!("{identifier}.chunk"),
            &ChunkSection::default_outside(0, 0, 100.0, 0.0, 100.0),
        );

        let id = space.find_or_add_chunk(&identifier, mapping);
        assert!(space.load_chunk(id, TaskPriority::Normal));
        assert!(space.chunk(id).unwrap().loading());
        assert!(!space.poll_loaded(id));

        tasks.run_pending();
        assert!(space.poll_loaded(id));
        assert!(space.chunk(id).unwrap().loading());

        space.bind_chunk(id, true).unwrap();
        let chunk = space.chunk(id).unwrap();
        assert!(chunk.is_bound());
        assert!(!chunk.loading());
    }

    #[test]
    fn test_failed_load_is_marked() {
        let (mut space, mapping) = outside_space();
        let id = space.find_or_add_chunk("missing", mapping);
        assert!(space.load_chunk(id, TaskPriority::High));
        assert!(!space.poll_loaded(id));

        let chunk = space.chunk(id).unwrap();
        assert!(chunk.load_failed());
        assert!(!chunk.loading());
    }

    #[test]
    fn test_cancelled_load_never_applies() {
        let tasks = Arc::new(QueuedTaskManager::new());
        let resource = Arc::new(MemoryResource::new());
        resource.insert_section("room.chunk", &ChunkSection::from_box(BoundingBox::new(Vec3::ZERO, Vec3::ONE)));
        let mut space = ChunkSpace::with_loader(
            ChunkSpaceConfig::default(),
            tasks.clone(),
            resource,
            ItemFactories::new(),
        );
        let mapping = space.add_mapping(GeometryMapping::default());
        let id = space.find_or_add_chunk("room", mapping);

        space.load_chunk(id, TaskPriority::Normal);
        assert!(space.unload_chunk_before_binding(id));
        tasks.run_pending();
        assert!(!space.poll_loaded(id));
        assert!(!space.chunk(id).unwrap().loading());
    }

    #[test]
    fn test_neighbours_connect_in_either_order() {
        let (mut space, mapping) = outside_space();
        let a = load_outside(&mut space, mapping, 0, 0);
        let b = load_outside(&mut space, mapping, 1, 0);

        space.bind_chunk(b, true).unwrap();
        space.bind_chunk(a, true).unwrap();

        let a_chunk = space.chunk(a).unwrap();
        assert!(a_chunk.bound_neighbours().contains(&b));
        assert!(space.chunk(b).unwrap().bound_neighbours().contains(&a));

        space.unbind_chunk(a, false).unwrap();
        assert!(space.chunk(b).unwrap().bound_neighbours().is_empty());
        assert!(space.chunk(a).unwrap().bound_neighbours().is_empty());

        space.bind_chunk(a, true).unwrap();
        assert!(space.chunk(b).unwrap().bound_neighbours().contains(&a));
    }

    #[test]
    fn test_bind_without_forming_connections() {
        let (mut space, mapping) = outside_space();
        let a = load_outside(&mut space, mapping, 0, 0);
        let b = load_outside(&mut space, mapping, 1, 0);
        space.bind_chunk(b, true).unwrap();
        space.bind_chunk(a, false).unwrap();
        assert!(space.chunk(a).unwrap().bound_neighbours().is_empty());

        space.bind_portals(a, true, false);
        assert!(space.chunk(a).unwrap().bound_neighbours().contains(&b));
    }

    #[test]
    fn test_portals_beyond_grid_become_extern() {
        let mut space = ChunkSpace::new();
        let mapping = space.add_mapping(
            GeometryMapping::default().with_bounds(crate::mapping::GridBounds::new(0, 0, 0, 0)),
        );
        let a = load_outside(&mut space, mapping, 0, 0);
        space.bind_chunk(a, true).unwrap();

        let chunk = space.chunk(a).unwrap();
        assert_eq!(chunk.unbound_portals().filter(|p| p.link.is_extern()).count(), 4);
        assert_eq!(space.chunk_count(), 1);
    }

    #[test]
    fn test_bind_contract() {
        let (mut space, mapping) = outside_space();
        let stub = space.find_or_add_chunk(&outside_chunk_identifier(0, 0), mapping);
        assert!(matches!(
            space.bind_chunk(stub, true),
            Err(ChunkError::InvalidState { operation: "bind", .. })
        ));
        assert!(matches!(
            space.unbind_chunk(stub, false),
            Err(ChunkError::InvalidState { operation: "unbind", .. })
        ));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn test_double_bind_is_a_contract_violation() {
        let (mut space, mapping) = outside_space();
        let a = load_outside(&mut space, mapping, 0, 0);
        space.bind_chunk(a, true).unwrap();
        assert!(matches!(
            space.bind_chunk(a, true),
            Err(ChunkError::InvalidState { operation: "bind", .. })
        ));
        assert!(space.chunk(a).unwrap().is_bound());
    }

    #[test]
    fn test_focus_and_blur() {
        let (mut space, mapping) = outside_space();
        let a = load_outside(&mut space, mapping, 0, 0);
        space.bind_chunk(a, true).unwrap();
        assert!(space.is_blurred(a));
        assert!(!space.chunk(a).unwrap().focussed());

        assert_eq!(space.focus(), 1);
        assert!(!space.is_blurred(a));
        let chunk = space.chunk(a).unwrap();
        assert_eq!(chunk.focus_count(), 1);
        assert!(chunk.completed());

        assert!(space.smudge_chunk(a));
        assert!(!space.smudge_chunk(a));
        assert!(space.is_blurred(a));
        assert!(!space.chunk(a).unwrap().completed());
        assert_eq!(space.focus(), 1);
        assert!(space.chunk(a).unwrap().completed());

        assert!(space.see_chunk(a));
        assert!(!space.see_chunk(a));
        space.unbind_chunk(a, false).unwrap();
        assert!(!space.has_seen(a));
        assert_eq!(space.chunk(a).unwrap().focus_count(), 0);
    }

    #[test]
    fn test_find_chunk_from_point_prefers_interiors() {
        let (mut space, mapping) = outside_space();
        let outside = space.find_or_add_chunk(&outside_chunk_identifier(0, 0), mapping);
        let section = ChunkSection::default_outside(0, 0, 100.0, 0.0, 100.0).with_portal(
            Vec3::NEG_Y,
            PortalSection {
                chunk: "hall".into(),
                points: vec![Vec3::new(10.0, 100.0, 10.0)],
                internal: true,
                label: String::new(),
            },
        );
        space.load_chunk_now(outside, &section).unwrap();
        space.bind_chunk(outside, true).unwrap();

        let hall = space.find_chunk("hall", mapping).unwrap();
        space
            .load_chunk_now(hall, &ChunkSection::from_box(BoundingBox::new(Vec3::splat(10.0), Vec3::splat(20.0))))
            .unwrap();
        space.bind_chunk(hall, true).unwrap();

        assert_eq!(space.find_chunk_from_point(Vec3::splat(15.0)), Some(hall));
        assert_eq!(space.find_chunk_from_point(Vec3::new(50.0, 50.0, 50.0)), Some(outside));
        assert_eq!(space.find_chunk_from_point(Vec3::new(500.0, 50.0, 50.0)), None);
    }

    #[test]
    fn test_reap_stubs() {
        let (mut space, mapping) = outside_space();
        let a = load_outside(&mut space, mapping, 0, 0);
        space.bind_chunk(a, true).unwrap();
        // Four neighbour stubs appointed through the side portals
        assert_eq!(space.chunk_count(), 5);

        assert_eq!(space.reap_stubs(), 4);
        assert_eq!(space.chunk_count(), 1);
        assert!(space.chunk(a).is_some());
    }

    #[test]
    fn test_del_mapping_removes_chunks() {
        let (mut space, mapping) = outside_space();
        let a = load_outside(&mut space, mapping, 0, 0);
        space.bind_chunk(a, true).unwrap();

        assert!(space.del_mapping(mapping).is_some());
        assert_eq!(space.chunk_count(), 0);
        assert!(space.mapping(mapping).is_none());
    }
}
