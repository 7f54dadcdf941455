//! Chunks
//!
//! A chunk is a convex volume of the world: either the outside chunk of one
//! grid cell or an interior "shell". Its lifecycle is
//!
//! ```text
//! UNLOADED ──load──▶ LOADING ──complete──▶ LOADED ──bind──▶ BOUND ──focus──▶ FOCUSED
//!     ▲                                                      │
//!     └──────────── unload ◀──────── UNBOUND ◀──── unbind ───┘
//! ```
//!
//! Operations that only touch one chunk live here. Anything that reaches a
//! neighbour (binding portals, lending items, notifying caches) goes through
//! the owning [`ChunkSpace`](crate::space::ChunkSpace).

use std::fmt;

use glam::{Mat4, Vec3};

use crate::boundary::{ChunkBoundary, Portal, PortalLink};
use crate::cache::CacheSlots;
use crate::contract;
use crate::handle::{ChunkId, MappingId};
use crate::item::{same_item, ChunkItemPtr, ItemFactories};
use crate::mapping::{GeometryMapping, GridBounds};
use crate::math::BoundingBox;
use crate::section::{parse_outside_identifier, ChunkContents, ChunkSection};

/// Items a chunk has borrowed from one neighbour
#[derive(Clone, Debug)]
pub struct Lender {
    pub lender: ChunkId,
    pub items: Vec<ChunkItemPtr>,
}

/// A convex volume of the world
pub struct Chunk {
    identifier: String,
    mapping: MappingId,
    grid: Option<(i32, i32)>,
    label: String,

    transform: Mat4,
    transform_inverse: Mat4,
    local_bounding_box: BoundingBox,
    bounding_box: BoundingBox,
    centre: Vec3,

    appointed: bool,
    loading: bool,
    loaded: bool,
    load_failed: bool,
    bound: bool,
    completed: bool,
    focus_count: i32,

    boundaries: Vec<ChunkBoundary>,
    static_items: Vec<ChunkItemPtr>,
    dynamic_items: Vec<ChunkItemPtr>,
    lenders: Vec<Lender>,
    borrowers: Vec<ChunkId>,

    caches: CacheSlots,

    // Owned by traversal and rendering; loading never writes these
    draw_mark: u32,
    traverse_mark: u32,
    path_sum: f32,
}

impl Chunk {
    /// Create an unloaded stub
    pub fn new(identifier: impl Into<String>, mapping: MappingId, settings: &GeometryMapping) -> Self {
        let identifier = identifier.into();
        let grid = parse_outside_identifier(&identifier);
        let transform = match grid {
            Some((x, z)) => {
                settings.transform()
                    * Mat4::from_translation(Vec3::new(
                        x as f32 * settings.grid_size,
                        0.0,
                        z as f32 * settings.grid_size,
                    ))
            }
            None => settings.transform(),
        };
        let centre = match grid {
            Some(_) => transform.transform_point3(Vec3::new(
                settings.grid_size * 0.5,
                0.0,
                settings.grid_size * 0.5,
            )),
            None => transform.transform_point3(Vec3::ZERO),
        };

        Self {
            identifier,
            mapping,
            grid,
            label: String::new(),
            transform,
            transform_inverse: transform.inverse(),
            local_bounding_box: BoundingBox::EMPTY,
            bounding_box: BoundingBox::EMPTY,
            centre,
            appointed: false,
            loading: false,
            loaded: false,
            load_failed: false,
            bound: false,
            completed: false,
            focus_count: 0,
            boundaries: Vec::new(),
            static_items: Vec::new(),
            dynamic_items: Vec::new(),
            lenders: Vec::new(),
            borrowers: Vec::new(),
            caches: CacheSlots::default(),
            draw_mark: 0,
            traverse_mark: 0,
            path_sum: 0.0,
        }
    }

    // ========================================================================
    // Identity and state
    // ========================================================================

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn mapping(&self) -> MappingId {
        self.mapping
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Grid cell of an outside chunk
    pub fn grid(&self) -> Option<(i32, i32)> {
        self.grid
    }

    pub fn is_outside_chunk(&self) -> bool {
        self.grid.is_some()
    }

    /// Grid x of an outside chunk, 0 for interiors
    pub fn x(&self) -> i32 {
        self.grid.map(|(x, _)| x).unwrap_or(0)
    }

    /// Grid z of an outside chunk, 0 for interiors
    pub fn z(&self) -> i32 {
        self.grid.map(|(_, z)| z).unwrap_or(0)
    }

    /// This is the authoritative instance for its identifier
    pub fn is_appointed(&self) -> bool {
        self.appointed
    }

    pub(crate) fn appoint_as_authoritative(&mut self) {
        self.appointed = true;
    }

    pub(crate) fn revoke_appointment(&mut self) {
        self.appointed = false;
    }

    /// A background load has been submitted and the chunk is not yet bound
    pub fn loading(&self) -> bool {
        self.loading
    }

    pub(crate) fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
        if loading {
            self.load_failed = false;
        }
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// The last load attempt failed; the chunk will never appear
    pub fn load_failed(&self) -> bool {
        self.load_failed
    }

    pub(crate) fn mark_load_failed(&mut self) {
        self.loading = false;
        self.load_failed = true;
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub(crate) fn set_bound(&mut self, bound: bool) {
        self.bound = bound;
        if bound {
            self.loading = false;
        } else {
            self.focus_count = 0;
            self.completed = false;
        }
    }

    /// Bound and every contained shell focused
    pub fn completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn set_completed(&mut self, completed: bool) {
        self.completed = completed;
    }

    pub fn focus_count(&self) -> i32 {
        self.focus_count
    }

    pub(crate) fn set_focus_count(&mut self, count: i32) {
        self.focus_count = count;
    }

    pub fn focussed(&self) -> bool {
        self.focus_count > 0
    }

    // ========================================================================
    // Geometry
    // ========================================================================

    /// Chunk-to-world transform
    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }

    pub fn transform_inverse(&self) -> &Mat4 {
        &self.transform_inverse
    }

    /// World-space bounds; empty until loaded
    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bounding_box
    }

    pub fn local_bounding_box(&self) -> &BoundingBox {
        &self.local_bounding_box
    }

    pub fn centre(&self) -> Vec3 {
        self.centre
    }

    /// Volume of the local bounds
    pub fn volume(&self) -> f32 {
        self.local_bounding_box.volume()
    }

    /// Check whether a world point lies inside, allowing `radius` of slack
    pub fn contains(&self, point: Vec3, radius: f32) -> bool {
        if !self.loaded || !self.bounding_box.is_valid() {
            return false;
        }
        let slack = Vec3::splat(radius.max(0.0));
        let expanded = BoundingBox::new(self.bounding_box.min - slack, self.bounding_box.max + slack);
        if !expanded.contains_point(point) {
            return false;
        }

        let local = self.transform_inverse.transform_point3(point);
        self.boundaries
            .iter()
            .all(|b| b.plane.distance_to(local) >= -radius.max(0.0))
    }

    pub fn boundaries(&self) -> &[ChunkBoundary] {
        &self.boundaries
    }

    pub(crate) fn boundaries_mut(&mut self) -> &mut [ChunkBoundary] {
        &mut self.boundaries
    }

    /// Iterate bound portals
    pub fn bound_portals(&self) -> impl Iterator<Item = &Portal> {
        self.boundaries.iter().flat_map(|b| b.bound_portals.iter())
    }

    /// Iterate unbound portals
    pub fn unbound_portals(&self) -> impl Iterator<Item = &Portal> {
        self.boundaries.iter().flat_map(|b| b.unbound_portals.iter())
    }

    /// Chunks this one currently has bound portals into
    pub fn bound_neighbours(&self) -> Vec<ChunkId> {
        let mut out: Vec<ChunkId> = Vec::new();
        for handle in self.bound_portals().filter_map(|p| p.link.handle()) {
            if !out.contains(&handle) {
                out.push(handle);
            }
        }
        out
    }

    /// Whether any portal leads into a contained shell
    pub fn has_internal_chunks(&self) -> bool {
        self.boundaries
            .iter()
            .flat_map(|b| b.portals())
            .any(|p| p.internal)
    }

    /// Turn unbound portals into outside chunks beyond `bounds` into extern
    /// portals. Returns how many were trimmed.
    pub fn trim_outside_portals(&mut self, bounds: &GridBounds) -> usize {
        if !contract!(
            self.loaded && !self.bound,
            "Chunk '{}' trimmed while not waiting to be bound",
            self.identifier
        ) {
            return 0;
        }

        let mut trimmed = 0;
        for boundary in &mut self.boundaries {
            for portal in &mut boundary.unbound_portals {
                let beyond = portal
                    .link
                    .identifier()
                    .and_then(parse_outside_identifier)
                    .is_some_and(|(x, z)| !bounds.contains(x, z));
                if beyond {
                    portal.link = PortalLink::Extern;
                    trimmed += 1;
                }
            }
        }
        if trimmed > 0 {
            log::trace!("Chunk '{}': trimmed {} portals beyond the grid", self.identifier, trimmed);
        }
        trimmed
    }

    /// The portal whose world-space centre is nearest to `point`
    pub fn find_closest_portal(&self, point: Vec3, max_distance: f32) -> Option<&Portal> {
        self.boundaries
            .iter()
            .flat_map(|b| b.portals())
            .map(|p| (p, p.world_centre(&self.transform).distance(point)))
            .filter(|(_, d)| *d <= max_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, _)| p)
    }

    /// Locate an unbound portal leading to `neighbour` whose world centre is
    /// within `tolerance` of `world_centre`; returns (boundary, index)
    pub fn find_matching_portal(
        &self,
        neighbour: &str,
        world_centre: Vec3,
        tolerance: f32,
    ) -> Option<(usize, usize)> {
        self.boundaries.iter().enumerate().find_map(|(bi, boundary)| {
            boundary
                .unbound_portals
                .iter()
                .position(|p| {
                    p.link.identifier() == Some(neighbour)
                        && p.world_centre(&self.transform).distance(world_centre) <= tolerance
                })
                .map(|pi| (bi, pi))
        })
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load synchronously from a section. Returns false (leaving the chunk
    /// untouched) when the section is malformed.
    pub fn load(&mut self, section: &ChunkSection, settings: &GeometryMapping, factories: &ItemFactories) -> bool {
        if !contract!(
            !self.loaded && !self.bound,
            "Chunk '{}' loaded twice",
            self.identifier
        ) {
            return false;
        }

        match ChunkContents::from_section(
            &self.identifier,
            section,
            settings.transform(),
            settings.grid_size,
            factories,
        ) {
            Ok(contents) => {
                self.apply_contents(contents);
                true
            }
            Err(e) => {
                log::error!("Failed to load chunk '{}': {}", self.identifier, e);
                false
            }
        }
    }

    /// Install loaded contents. Only loading-owned fields are written.
    pub(crate) fn apply_contents(&mut self, contents: ChunkContents) {
        self.label = contents.label;
        self.transform = contents.transform;
        self.transform_inverse = contents.transform.inverse();
        self.local_bounding_box = contents.local_bounding_box;
        self.bounding_box = contents.bounding_box;
        self.centre = contents.bounding_box.center();
        self.boundaries = contents.boundaries;
        self.static_items = contents.items;
        self.load_failed = false;
        self.loaded = true;
    }

    /// Drop everything loading produced. The chunk must not be bound.
    pub fn unload(&mut self) -> bool {
        if !contract!(!self.bound, "Chunk '{}' unloaded while bound", self.identifier) {
            return false;
        }
        self.boundaries.clear();
        self.static_items.clear();
        self.dynamic_items.clear();
        self.lenders.clear();
        self.borrowers.clear();
        self.caches.clear();
        self.local_bounding_box = BoundingBox::EMPTY;
        self.bounding_box = BoundingBox::EMPTY;
        self.loading = false;
        self.loaded = false;
        self.completed = false;
        self.focus_count = 0;
        true
    }

    // ========================================================================
    // Items
    // ========================================================================

    pub fn static_items(&self) -> &[ChunkItemPtr] {
        &self.static_items
    }

    pub fn dynamic_items(&self) -> &[ChunkItemPtr] {
        &self.dynamic_items
    }

    /// Items this chunk owns, static then dynamic
    pub fn own_items(&self) -> impl Iterator<Item = &ChunkItemPtr> {
        self.static_items.iter().chain(self.dynamic_items.iter())
    }

    /// Items borrowed from neighbours
    pub fn loan_items(&self) -> impl Iterator<Item = &ChunkItemPtr> {
        self.lenders.iter().flat_map(|l| l.items.iter())
    }

    pub fn lenders(&self) -> &[Lender] {
        &self.lenders
    }

    /// Chunks holding loans of this chunk's items
    pub fn borrowers(&self) -> &[ChunkId] {
        &self.borrowers
    }

    /// Add a static item; false if already present
    pub fn add_static_item(&mut self, item: ChunkItemPtr) -> bool {
        if self.static_items.iter().any(|i| same_item(i, &item)) {
            return false;
        }
        self.static_items.push(item);
        true
    }

    /// Remove a static item; false if absent
    pub fn del_static_item(&mut self, item: &ChunkItemPtr) -> bool {
        remove_item(&mut self.static_items, item)
    }

    /// Add a dynamic item; false if already present
    pub fn add_dynamic_item(&mut self, item: ChunkItemPtr) -> bool {
        if self.dynamic_items.iter().any(|i| same_item(i, &item)) {
            return false;
        }
        self.dynamic_items.push(item);
        true
    }

    /// Remove a dynamic item; false if absent
    pub fn del_dynamic_item(&mut self, item: &ChunkItemPtr) -> bool {
        remove_item(&mut self.dynamic_items, item)
    }

    /// Check whether an item is owned dynamically
    pub fn has_dynamic_item(&self, item: &ChunkItemPtr) -> bool {
        self.dynamic_items.iter().any(|i| same_item(i, item))
    }

    /// A dynamic item moved. Returns true if it is still inside this chunk;
    /// otherwise the item is removed and the caller must rehome it.
    pub fn mod_dynamic_item(&mut self, item: &ChunkItemPtr, new_position: Vec3) -> bool {
        if !contract!(
            self.has_dynamic_item(item),
            "Chunk '{}' asked to move an item it does not own",
            self.identifier
        ) {
            return false;
        }
        if self.contains(new_position, 0.0) {
            return true;
        }
        self.del_dynamic_item(item);
        false
    }

    /// Record a loan from `lender`; false if already held
    pub fn add_loan_item(&mut self, lender: ChunkId, item: ChunkItemPtr) -> bool {
        if self.is_loan_item(&item) {
            return false;
        }
        match self.lenders.iter_mut().find(|l| l.lender == lender) {
            Some(record) => record.items.push(item),
            None => self.lenders.push(Lender {
                lender,
                items: vec![item],
            }),
        }
        true
    }

    /// Drop a loan; false if not held
    pub fn del_loan_item(&mut self, item: &ChunkItemPtr) -> bool {
        let mut removed = false;
        for record in &mut self.lenders {
            removed |= remove_item(&mut record.items, item);
        }
        self.lenders.retain(|l| !l.items.is_empty());
        removed
    }

    /// Check whether an item is held on loan
    pub fn is_loan_item(&self, item: &ChunkItemPtr) -> bool {
        self.loan_items().any(|i| same_item(i, item))
    }

    pub(crate) fn add_borrower(&mut self, borrower: ChunkId) {
        if !self.borrowers.contains(&borrower) {
            self.borrowers.push(borrower);
        }
    }

    pub(crate) fn take_borrowers(&mut self) -> Vec<ChunkId> {
        std::mem::take(&mut self.borrowers)
    }

    pub(crate) fn remove_borrower(&mut self, borrower: ChunkId) {
        self.borrowers.retain(|b| *b != borrower);
    }

    pub(crate) fn take_lenders(&mut self) -> Vec<Lender> {
        std::mem::take(&mut self.lenders)
    }

    /// Drop every loan from `lender`
    pub(crate) fn drop_loans_from(&mut self, lender: ChunkId) {
        self.lenders.retain(|l| l.lender != lender);
    }

    // ========================================================================
    // Caches and marks
    // ========================================================================

    pub(crate) fn caches(&self) -> &CacheSlots {
        &self.caches
    }

    pub(crate) fn caches_mut(&mut self) -> &mut CacheSlots {
        &mut self.caches
    }

    pub(crate) fn take_caches(&mut self) -> CacheSlots {
        std::mem::take(&mut self.caches)
    }

    pub fn draw_mark(&self) -> u32 {
        self.draw_mark
    }

    pub fn set_draw_mark(&mut self, mark: u32) {
        self.draw_mark = mark;
    }

    pub fn traverse_mark(&self) -> u32 {
        self.traverse_mark
    }

    pub fn set_traverse_mark(&mut self, mark: u32) {
        self.traverse_mark = mark;
    }

    pub fn path_sum(&self) -> f32 {
        self.path_sum
    }

    pub fn set_path_sum(&mut self, sum: f32) {
        self.path_sum = sum;
    }
}

fn remove_item(items: &mut Vec<ChunkItemPtr>, item: &ChunkItemPtr) -> bool {
    match items.iter().position(|i| same_item(i, item)) {
        Some(index) => {
            items.remove(index);
            true
        }
        None => false,
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("identifier", &self.identifier)
            .field("mapping", &self.mapping)
            .field("loading", &self.loading)
            .field("loaded", &self.loaded)
            .field("bound", &self.bound)
            .field("focus_count", &self.focus_count)
            .field("items", &(self.static_items.len() + self.dynamic_items.len()))
            .field("caches", &self.caches.len())
            .finish()
    }
}
