//! Chunk items and the item factory table
//!
//! Items are the contents of a chunk: models, lights, markers and so on. They
//! are shared (`Arc`) because a chunk may lend an item to a neighbour whose
//! volume it pokes into. Items are built from chunk sections by factories
//! registered per section kind; the table is owned by whoever loads chunks
//! rather than living in a global.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use glam::Mat4;
use serde::Deserialize;

use crate::error::{ChunkError, Result};
use crate::math::BoundingBox;
use crate::section::ItemSection;

/// Something that lives in a chunk
pub trait ChunkItem: Send + Sync + fmt::Debug {
    /// Section kind this item was built from
    fn kind(&self) -> &str;

    /// Optional label for debugging
    fn label(&self) -> &str {
        ""
    }

    /// World-space bounds
    fn bounding_box(&self) -> BoundingBox;

    /// Whether the item should be lent to neighbours it overlaps
    fn wants_lending(&self) -> bool {
        false
    }
}

/// Shared pointer to a chunk item
pub type ChunkItemPtr = Arc<dyn ChunkItem>;

/// Identity comparison for item pointers
pub fn same_item(a: &ChunkItemPtr, b: &ChunkItemPtr) -> bool {
    Arc::ptr_eq(a, b)
}

/// Context handed to item factories
#[derive(Clone, Copy, Debug)]
pub struct ItemLoadContext<'a> {
    /// Identifier of the chunk being loaded
    pub chunk_identifier: &'a str,
    /// Chunk-to-world transform
    pub transform: Mat4,
}

/// Builds items of one section kind
pub trait ItemFactory: Send + Sync {
    fn create(&self, section: &ItemSection, ctx: &ItemLoadContext<'_>) -> Result<ChunkItemPtr>;
}

impl<F> ItemFactory for F
where
    F: Fn(&ItemSection, &ItemLoadContext<'_>) -> Result<ChunkItemPtr> + Send + Sync,
{
    fn create(&self, section: &ItemSection, ctx: &ItemLoadContext<'_>) -> Result<ChunkItemPtr> {
        self(section, ctx)
    }
}

/// Table of item factories keyed by section kind
#[derive(Default)]
pub struct ItemFactories {
    factories: HashMap<String, Box<dyn ItemFactory>>,
}

impl ItemFactories {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with the built-in item kinds registered
    pub fn with_defaults() -> Self {
        let mut factories = Self::new();
        factories.register(ModelItem::KIND, ModelItem::create);
        factories
    }

    /// Register a factory, replacing any previous one for the kind
    pub fn register(&mut self, kind: impl Into<String>, factory: impl ItemFactory + 'static) -> &mut Self {
        self.factories.insert(kind.into(), Box::new(factory));
        self
    }

    /// Check whether a kind has a factory
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build an item; `None` when no factory handles the kind
    pub fn create(
        &self,
        section: &ItemSection,
        ctx: &ItemLoadContext<'_>,
    ) -> Option<Result<ChunkItemPtr>> {
        self.factories
            .get(&section.kind)
            .map(|factory| factory.create(section, ctx))
    }
}

impl fmt::Debug for ItemFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("ItemFactories").field("kinds", &kinds).finish()
    }
}

#[derive(Deserialize)]
struct ModelSection {
    #[serde(default)]
    label: String,
    resource: String,
    bounds: BoundingBox,
    #[serde(default)]
    lend: bool,
}

/// A static model placed in a chunk
#[derive(Clone, Debug)]
pub struct ModelItem {
    label: String,
    resource: String,
    bounds: BoundingBox,
    lend: bool,
}

impl ModelItem {
    /// Section kind for models
    pub const KIND: &'static str = "model";

    /// Create a model with world-space bounds
    pub fn new(resource: impl Into<String>, bounds: BoundingBox) -> Self {
        Self {
            label: String::new(),
            resource: resource.into(),
            bounds,
            lend: false,
        }
    }

    /// Mark the model as lendable
    pub fn with_lending(mut self, lend: bool) -> Self {
        self.lend = lend;
        self
    }

    /// Resource the model renders
    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn create(section: &ItemSection, ctx: &ItemLoadContext<'_>) -> Result<ChunkItemPtr> {
        let model: ModelSection = section.parse().map_err(|e| ChunkError::MalformedSection {
            identifier: ctx.chunk_identifier.to_string(),
            reason: format!("bad model item: {e}"),
        })?;
        if !model.bounds.is_valid() {
            return Err(ChunkError::MalformedSection {
                identifier: ctx.chunk_identifier.to_string(),
                reason: format!("model '{}' has inverted bounds", model.resource),
            });
        }

        Ok(Arc::new(ModelItem {
            label: model.label,
            resource: model.resource,
            bounds: model.bounds.transformed(&ctx.transform),
            lend: model.lend,
        }))
    }
}

impl ChunkItem for ModelItem {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn bounding_box(&self) -> BoundingBox {
        self.bounds
    }

    fn wants_lending(&self) -> bool {
        self.lend
    }
}
