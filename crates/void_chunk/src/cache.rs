//! Per-chunk typed caches
//!
//! Subsystems hang their own state off a chunk without the chunk knowing
//! their types. Each cache type gets a small integer id the first time it is
//! used with a [`ChunkSpace`]; each chunk stores its caches in a vector
//! indexed by that id, so lookups after registration never hash.
//!
//! ```ignore
//! use void_chunk::prelude::*;
//!
//! // Create-if-absent
//! let refs = Instance::<MyCache>::get(&mut space, chunk).unwrap();
//! refs.value += 1;
//!
//! assert!(Instance::<MyCache>::exists(&space, chunk));
//! Instance::<MyCache>::clear(&mut space, chunk);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::chunk::Chunk;
use crate::handle::ChunkId;
use crate::space::ChunkSpace;

/// Downcasting support for caches
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// State attached to a chunk by some subsystem.
///
/// While a hook runs the chunk's own caches are detached from it, so a hook
/// may freely reach other chunks' caches through the space but must not
/// look up caches of the chunk it was called for.
pub trait ChunkCache: AsAny + Send {
    /// The owning chunk was bound (`is_unbind == false`) or is being unbound
    fn bind(&mut self, _space: &mut ChunkSpace, _chunk: ChunkId, _is_unbind: bool) {}

    /// The owning chunk is being focused; returns the focus count this cache holds
    fn focus(&mut self, _space: &mut ChunkSpace, _chunk: ChunkId) -> i32 {
        0
    }
}

/// A cache type that can be created on demand
pub trait ChunkCacheType: ChunkCache + Sized {
    fn create(chunk: &Chunk) -> Self;
}

/// Dense id assigned to a cache type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheTypeId(pub usize);

/// Assigns stable dense ids to cache types
#[derive(Debug, Default)]
pub struct CacheRegistry {
    by_type: HashMap<TypeId, CacheTypeId>,
    names: Vec<&'static str>,
}

impl CacheRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the id of a cache type, assigning one on first use
    pub fn register<T: ChunkCache>(&mut self) -> CacheTypeId {
        let next = CacheTypeId(self.names.len());
        let id = *self.by_type.entry(TypeId::of::<T>()).or_insert(next);
        if id == next {
            self.names.push(std::any::type_name::<T>());
            log::debug!("Registered chunk cache {} as {}", std::any::type_name::<T>(), id.0);
        }
        id
    }

    /// Get the id of a cache type if it has one
    pub fn lookup<T: ChunkCache>(&self) -> Option<CacheTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Type name of a registered cache
    pub fn name(&self, id: CacheTypeId) -> Option<&'static str> {
        self.names.get(id.0).copied()
    }

    /// Number of registered cache types
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Cache slots of one chunk
#[derive(Default)]
pub struct CacheSlots {
    slots: Vec<Option<Box<dyn ChunkCache>>>,
}

impl CacheSlots {
    /// Get a cache by id
    pub fn get(&self, id: CacheTypeId) -> Option<&dyn ChunkCache> {
        self.slots.get(id.0).and_then(|slot| slot.as_deref())
    }

    /// Get a cache mutably by id
    pub fn get_mut(&mut self, id: CacheTypeId) -> Option<&mut (dyn ChunkCache + 'static)> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_deref_mut())
    }

    /// Store a cache, returning the one it replaced
    pub fn insert(&mut self, id: CacheTypeId, cache: Box<dyn ChunkCache>) -> Option<Box<dyn ChunkCache>> {
        if self.slots.len() <= id.0 {
            self.slots.resize_with(id.0 + 1, || None);
        }
        self.slots[id.0].replace(cache)
    }

    /// Remove a cache
    pub fn remove(&mut self, id: CacheTypeId) -> Option<Box<dyn ChunkCache>> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    /// Drop every cache
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Number of live caches
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Check if no cache is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate live caches mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn ChunkCache>> {
        self.slots.iter_mut().flatten()
    }

    /// Put back caches detached for a hook call. Caches created on the chunk
    /// while they were detached are dropped in favour of the originals.
    pub fn restore(&mut self, detached: CacheSlots) {
        for (index, slot) in detached.slots.into_iter().enumerate() {
            if let Some(cache) = slot {
                if let Some(created) = self.insert(CacheTypeId(index), cache) {
                    log::warn!(
                        "Chunk cache {} was recreated while detached; keeping the original",
                        index
                    );
                    drop(created);
                }
            }
        }
    }
}

/// Typed access to the `T` cache of a chunk
pub struct Instance<T>(PhantomData<fn() -> T>);

impl<T: ChunkCacheType> Instance<T> {
    /// Get the cache, creating it if absent. `None` only for a dead handle.
    pub fn get(space: &mut ChunkSpace, chunk: ChunkId) -> Option<&mut T> {
        let id = space.cache_registry_mut().register::<T>();
        let owner = space.chunk_mut(chunk)?;
        if owner.caches().get(id).is_none() {
            let cache = T::create(owner);
            owner.caches_mut().insert(id, Box::new(cache));
        }
        owner
            .caches_mut()
            .get_mut(id)
            .and_then(|cache| cache.as_any_mut().downcast_mut::<T>())
    }

    /// Get the cache without creating it
    pub fn find(space: &ChunkSpace, chunk: ChunkId) -> Option<&T> {
        let id = space.cache_registry().lookup::<T>()?;
        space
            .chunk(chunk)?
            .caches()
            .get(id)
            .and_then(|cache| cache.as_any().downcast_ref::<T>())
    }

    /// Get the cache mutably without creating it
    pub fn find_mut(space: &mut ChunkSpace, chunk: ChunkId) -> Option<&mut T> {
        let id = space.cache_registry().lookup::<T>()?;
        space
            .chunk_mut(chunk)?
            .caches_mut()
            .get_mut(id)
            .and_then(|cache| cache.as_any_mut().downcast_mut::<T>())
    }

    /// Check whether the chunk has the cache
    pub fn exists(space: &ChunkSpace, chunk: ChunkId) -> bool {
        Self::find(space, chunk).is_some()
    }

    /// Drop the cache if present
    pub fn clear(space: &mut ChunkSpace, chunk: ChunkId) {
        let Some(id) = space.cache_registry().lookup::<T>() else {
            return;
        };
        if let Some(owner) = space.chunk_mut(chunk) {
            owner.caches_mut().remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        value: u32,
    }

    impl ChunkCache for Counter {}

    impl ChunkCacheType for Counter {
        fn create(_chunk: &Chunk) -> Self {
            Self::default()
        }
    }

    #[derive(Debug, Default)]
    struct Tag;

    impl ChunkCache for Tag {}

    #[test]
    fn test_registry_ids_are_stable() {
        let mut registry = CacheRegistry::new();
        let a = registry.register::<Counter>();
        let b = registry.register::<Tag>();
        assert_ne!(a, b);
        assert_eq!(registry.register::<Counter>(), a);
        assert_eq!(registry.lookup::<Tag>(), Some(b));
        assert_eq!(registry.len(), 2);
        assert!(registry.name(a).unwrap().contains("Counter"));
    }

    #[test]
    fn test_slots_downcast() {
        let mut slots = CacheSlots::default();
        slots.insert(CacheTypeId(3), Box::new(Counter { value: 7 }));
        assert_eq!(slots.len(), 1);
        assert!(slots.get(CacheTypeId(0)).is_none());

        let counter = slots
            .get_mut(CacheTypeId(3))
            .and_then(|c| c.as_any_mut().downcast_mut::<Counter>())
            .unwrap();
        counter.value += 1;

        let counter = slots
            .get(CacheTypeId(3))
            .and_then(|c| c.as_any().downcast_ref::<Counter>())
            .unwrap();
        assert_eq!(counter.value, 8);
    }

    #[test]
    fn test_restore_keeps_originals() {
        let mut detached = CacheSlots::default();
        detached.insert(CacheTypeId(0), Box::new(Counter { value: 1 }));

        let mut live = CacheSlots::default();
        live.insert(CacheTypeId(0), Box::new(Counter { value: 99 }));
        live.insert(CacheTypeId(1), Box::new(Tag));
        live.restore(detached);

        let counter = live
            .get(CacheTypeId(0))
            .and_then(|c| c.as_any().downcast_ref::<Counter>())
            .unwrap();
        assert_eq!(counter.value, 1);
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn test_instance_lifecycle() {
        let mut space = ChunkSpace::new();
        let mapping = space.add_mapping(crate::mapping::GeometryMapping::default());
        let chunk = space.find_or_add_chunk("shell", mapping);

        assert!(!Instance::<Counter>::exists(&space, chunk));
        Instance::<Counter>::get(&mut space, chunk).unwrap().value = 5;
        assert!(Instance::<Counter>::exists(&space, chunk));
        assert_eq!(Instance::<Counter>::get(&mut space, chunk).unwrap().value, 5);

        Instance::<Counter>::clear(&mut space, chunk);
        assert!(!Instance::<Counter>::exists(&space, chunk));
        assert_eq!(Instance::<Counter>::get(&mut space, chunk).unwrap().value, 0);
    }
}
