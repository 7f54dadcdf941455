//! Chunk boundaries and portals
//!
//! Every chunk is a convex volume described by boundary planes. Each boundary
//! may carry portals: polygons through which a neighbouring chunk is (bound)
//! or may become (unbound) visible and traversable. Portal targets that are
//! not real chunks use sentinel links which must never be dereferenced.

use glam::{Mat4, Vec3};

use crate::handle::ChunkId;
use crate::math::Plane;

/// Named reference to a chunk, optionally resolved to a live handle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRef {
    /// Identifier of the target chunk within the owning chunk's mapping
    pub identifier: String,
    /// Resolved handle; may go stale once the target chunk is deleted
    pub handle: Option<ChunkId>,
}

impl ChunkRef {
    /// An unresolved reference
    pub fn named(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            handle: None,
        }
    }
}

/// What lies on the other side of a portal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortalLink {
    /// Another chunk of the same mapping
    Chunk(ChunkRef),
    /// Open sky
    Heaven,
    /// Solid ground
    Earth,
    /// Outside the mapping's loaded world
    Extern,
    /// Portal reserved for shells pushed into an outside chunk
    Invasive,
}

impl PortalLink {
    /// Parse a link from its persisted name
    pub fn from_name(name: &str) -> Self {
        match name {
            "heaven" => PortalLink::Heaven,
            "earth" => PortalLink::Earth,
            "extern" => PortalLink::Extern,
            "invasive" => PortalLink::Invasive,
            other => PortalLink::Chunk(ChunkRef::named(other)),
        }
    }

    /// Check if this link names a real chunk
    pub fn has_chunk(&self) -> bool {
        matches!(self, PortalLink::Chunk(_))
    }

    /// Identifier of the linked chunk
    pub fn identifier(&self) -> Option<&str> {
        match self {
            PortalLink::Chunk(chunk) => Some(&chunk.identifier),
            _ => None,
        }
    }

    /// Resolved handle of the linked chunk
    pub fn handle(&self) -> Option<ChunkId> {
        match self {
            PortalLink::Chunk(chunk) => chunk.handle,
            _ => None,
        }
    }

    pub fn is_earth(&self) -> bool {
        matches!(self, PortalLink::Earth)
    }

    pub fn is_extern(&self) -> bool {
        matches!(self, PortalLink::Extern)
    }
}

/// A polygon on a boundary plane
#[derive(Clone, Debug)]
pub struct Portal {
    /// Optional authored label
    pub label: String,
    /// Polygon points in chunk-local space
    pub points: Vec<Vec3>,
    /// Polygon centre in chunk-local space
    pub centre: Vec3,
    /// Portal leads into a shell contained by this chunk
    pub internal: bool,
    /// Target of the portal
    pub link: PortalLink,
}

impl Portal {
    /// Create a portal from its polygon and link
    pub fn new(points: Vec<Vec3>, link: PortalLink) -> Self {
        let centre = if points.is_empty() {
            Vec3::ZERO
        } else {
            points.iter().copied().sum::<Vec3>() / points.len() as f32
        };
        Self {
            label: String::new(),
            points,
            centre,
            internal: false,
            link,
        }
    }

    /// Portal centre in world space
    pub fn world_centre(&self, transform: &Mat4) -> Vec3 {
        transform.transform_point3(self.centre)
    }
}

/// A boundary plane with its portals
#[derive(Clone, Debug)]
pub struct ChunkBoundary {
    pub plane: Plane,
    pub bound_portals: Vec<Portal>,
    pub unbound_portals: Vec<Portal>,
}

impl ChunkBoundary {
    /// Create a boundary with no portals
    pub fn new(plane: Plane) -> Self {
        Self {
            plane,
            bound_portals: Vec::new(),
            unbound_portals: Vec::new(),
        }
    }

    /// Iterate every portal, bound ones first
    pub fn portals(&self) -> impl Iterator<Item = &Portal> {
        self.bound_portals.iter().chain(self.unbound_portals.iter())
    }

    /// Move an unbound portal into the bound list, returning its new index
    pub fn bind_portal(&mut self, unbound_index: usize) -> usize {
        let portal = self.unbound_portals.remove(unbound_index);
        self.bound_portals.push(portal);
        self.bound_portals.len() - 1
    }

    /// Move a bound portal into the unbound list, returning its new index
    pub fn unbind_portal(&mut self, bound_index: usize) -> usize {
        let portal = self.bound_portals.remove(bound_index);
        self.unbound_portals.push(portal);
        self.unbound_portals.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_names() {
        assert_eq!(PortalLink::from_name("heaven"), PortalLink::Heaven);
        assert_eq!(PortalLink::from_name("earth"), PortalLink::Earth);
        assert_eq!(PortalLink::from_name("extern"), PortalLink::Extern);
        assert_eq!(PortalLink::from_name("invasive"), PortalLink::Invasive);

        let link = PortalLink::from_name("00010002o");
        assert!(link.has_chunk());
        assert_eq!(link.identifier(), Some("00010002o"));
        assert_eq!(link.handle(), None);
    }

    #[test]
    fn test_portal_centre() {
        let portal = Portal::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.0, 10.0, 0.0),
                Vec3::new(0.0, 10.0, 10.0),
                Vec3::new(0.0, 0.0, 10.0),
            ],
            PortalLink::Heaven,
        );
        assert_eq!(portal.centre, Vec3::new(0.0, 5.0, 5.0));

        let world = portal.world_centre(&Mat4::from_translation(Vec3::X * 100.0));
        assert_eq!(world, Vec3::new(100.0, 5.0, 5.0));
    }

    #[test]
    fn test_bind_and_unbind_portal() {
        let mut boundary = ChunkBoundary::new(Plane::new(Vec3::X, 0.0));
        boundary
            .unbound_portals
            .push(Portal::new(Vec::new(), PortalLink::from_name("a")));

        let bound = boundary.bind_portal(0);
        assert_eq!(boundary.bound_portals.len(), 1);
        assert!(boundary.unbound_portals.is_empty());

        boundary.unbind_portal(bound);
        assert!(boundary.bound_portals.is_empty());
        assert_eq!(boundary.portals().count(), 1);
    }
}
