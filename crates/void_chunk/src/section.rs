//! Persisted chunk sections
//!
//! A chunk resource is a JSON document describing the chunk's bounds,
//! boundary planes with their portals, its items, and (for outside chunks)
//! the interior chunks that overlap it. Parsing into [`ChunkContents`] is
//! pure and may run on a worker thread; nothing here touches a live chunk.

use glam::{Mat4, Vec3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::boundary::{ChunkBoundary, Portal, PortalLink};
use crate::error::{ChunkError, Result};
use crate::item::{ChunkItemPtr, ItemFactories, ItemLoadContext};
use crate::math::{BoundingBox, Plane};

/// Identifier of the outside chunk at a grid cell
pub fn outside_chunk_identifier(x: i32, z: i32) -> String {
    format!("{:04x}{:04x}o", x as i16 as u16, z as i16 as u16)
}

/// Check whether an identifier names an outside chunk
pub fn is_outside_identifier(identifier: &str) -> bool {
    identifier.ends_with('o')
}

/// Grid cell encoded in an outside chunk identifier
pub fn parse_outside_identifier(identifier: &str) -> Option<(i32, i32)> {
    if identifier.len() != 9 || !is_outside_identifier(identifier) {
        return None;
    }
    let x = u16::from_str_radix(identifier.get(0..4)?, 16).ok()?;
    let z = u16::from_str_radix(identifier.get(4..8)?, 16).ok()?;
    Some((x as i16 as i32, z as i16 as i32))
}

/// A persisted chunk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkSection {
    #[serde(default)]
    pub label: String,
    /// Chunk-to-mapping transform of an interior chunk, column major
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<[f32; 16]>,
    /// Local-space bounds
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub boundaries: Vec<BoundarySection>,
    #[serde(default)]
    pub items: Vec<ItemSection>,
    /// Interior chunks overlapping this outside chunk
    #[serde(default)]
    pub overlappers: Vec<OverlapperSection>,
}

/// A persisted boundary plane
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoundarySection {
    pub normal: Vec3,
    pub d: f32,
    #[serde(default)]
    pub portals: Vec<PortalSection>,
}

/// A persisted portal
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalSection {
    /// Target chunk identifier or a sentinel name
    pub chunk: String,
    #[serde(default)]
    pub points: Vec<Vec3>,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub label: String,
}

/// A persisted item; everything but `kind` is left to the item's factory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemSection {
    pub kind: String,
    #[serde(flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl ItemSection {
    /// Deserialize the item's properties
    pub fn parse<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(serde_json::Value::Object(self.properties.clone()))
    }
}

/// A persisted overlapper record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverlapperSection {
    /// Identifier of the interior chunk
    pub chunk: String,
    /// Bounds of the interior chunk in mapping space
    pub bounds: BoundingBox,
}

impl ChunkSection {
    /// Parse a section from JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize to JSON bytes
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// A box-shaped chunk with six portal-less boundaries
    pub fn from_box(bounding_box: BoundingBox) -> Self {
        let (min, max) = (bounding_box.min, bounding_box.max);
        let planes = [
            (Vec3::X, min.x),
            (Vec3::NEG_X, -max.x),
            (Vec3::Y, min.y),
            (Vec3::NEG_Y, -max.y),
            (Vec3::Z, min.z),
            (Vec3::NEG_Z, -max.z),
        ];
        Self {
            label: String::new(),
            transform: None,
            bounding_box,
            boundaries: planes
                .iter()
                .map(|&(normal, d)| BoundarySection {
                    normal,
                    d,
                    portals: Vec::new(),
                })
                .collect(),
            items: Vec::new(),
            overlappers: Vec::new(),
        }
    }

    /// The plain outside chunk of a grid cell: four sides opening onto the
    /// neighbouring cells, earth below and heaven above
    pub fn default_outside(x: i32, z: i32, grid_size: f32, min_y: f32, max_y: f32) -> Self {
        let mut section = Self::from_box(BoundingBox::new(
            Vec3::new(0.0, min_y, 0.0),
            Vec3::new(grid_size, max_y, grid_size),
        ));
        let g = grid_size;
        let side = |a: Vec3, b: Vec3, c: Vec3, d: Vec3, chunk: String| PortalSection {
            chunk,
            points: vec![a, b, c, d],
            internal: false,
            label: String::new(),
        };

        let lo = min_y;
        let hi = max_y;
        let portals = [
            side(
                Vec3::new(0.0, lo, 0.0),
                Vec3::new(0.0, hi, 0.0),
                Vec3::new(0.0, hi, g),
                Vec3::new(0.0, lo, g),
                outside_chunk_identifier(x - 1, z),
            ),
            side(
                Vec3::new(g, lo, 0.0),
                Vec3::new(g, hi, 0.0),
                Vec3::new(g, hi, g),
                Vec3::new(g, lo, g),
                outside_chunk_identifier(x + 1, z),
            ),
            side(
                Vec3::new(0.0, lo, 0.0),
                Vec3::new(g, lo, 0.0),
                Vec3::new(g, lo, g),
                Vec3::new(0.0, lo, g),
                "earth".to_string(),
            ),
            side(
                Vec3::new(0.0, hi, 0.0),
                Vec3::new(g, hi, 0.0),
                Vec3::new(g, hi, g),
                Vec3::new(0.0, hi, g),
                "heaven".to_string(),
            ),
            side(
                Vec3::new(0.0, lo, 0.0),
                Vec3::new(g, lo, 0.0),
                Vec3::new(g, hi, 0.0),
                Vec3::new(0.0, hi, 0.0),
                outside_chunk_identifier(x, z - 1),
            ),
            side(
                Vec3::new(0.0, lo, g),
                Vec3::new(g, lo, g),
                Vec3::new(g, hi, g),
                Vec3::new(0.0, hi, g),
                outside_chunk_identifier(x, z + 1),
            ),
        ];
        for (boundary, portal) in section.boundaries.iter_mut().zip(portals) {
            boundary.portals.push(portal);
        }
        section
    }

    /// Add an item section
    pub fn with_item(mut self, item: ItemSection) -> Self {
        self.items.push(item);
        self
    }

    /// Add an overlapper record
    pub fn with_overlapper(mut self, chunk: impl Into<String>, bounds: BoundingBox) -> Self {
        self.overlappers.push(OverlapperSection {
            chunk: chunk.into(),
            bounds,
        });
        self
    }

    /// Add a portal to the boundary whose plane matches `normal`
    pub fn with_portal(mut self, normal: Vec3, portal: PortalSection) -> Self {
        if let Some(boundary) = self
            .boundaries
            .iter_mut()
            .find(|b| b.normal.abs_diff_eq(normal, 1e-4))
        {
            boundary.portals.push(portal);
        }
        self
    }
}

/// Everything a load produces, ready to be applied to a chunk on the main thread
#[derive(Clone, Debug)]
pub struct ChunkContents {
    pub label: String,
    /// Chunk-to-world transform
    pub transform: Mat4,
    /// Local-space bounds
    pub local_bounding_box: BoundingBox,
    /// World-space bounds
    pub bounding_box: BoundingBox,
    pub boundaries: Vec<ChunkBoundary>,
    pub items: Vec<ChunkItemPtr>,
    /// Overlapper records with bounds in world space
    pub overlappers: Vec<OverlapperSection>,
}

impl ChunkContents {
    /// Build contents from a parsed section.
    ///
    /// Outside chunks are placed at their grid cell, interior chunks by the
    /// section's own transform; both are then placed by `mapping_transform`.
    /// Items whose kind is unknown or whose data is bad are skipped; bad
    /// chunk-level data fails the whole load.
    pub fn from_section(
        identifier: &str,
        section: &ChunkSection,
        mapping_transform: Mat4,
        grid_size: f32,
        factories: &ItemFactories,
    ) -> Result<Self> {
        let malformed = |reason: String| ChunkError::MalformedSection {
            identifier: identifier.to_string(),
            reason,
        };

        if !section.bounding_box.is_valid() {
            return Err(malformed("inverted bounding box".into()));
        }
        if section.boundaries.is_empty() {
            return Err(malformed("no boundaries".into()));
        }

        let local = match parse_outside_identifier(identifier) {
            Some((x, z)) => {
                if section.transform.is_some() {
                    log::warn!("Outside chunk '{}' carries a transform; ignoring it", identifier);
                }
                Mat4::from_translation(Vec3::new(x as f32 * grid_size, 0.0, z as f32 * grid_size))
            }
            None => section
                .transform
                .map(|cols| Mat4::from_cols_array(&cols))
                .unwrap_or(Mat4::IDENTITY),
        };
        let transform = mapping_transform * local;
        if !transform.is_finite() {
            return Err(malformed("non-finite transform".into()));
        }

        let mut boundaries = Vec::with_capacity(section.boundaries.len());
        for boundary in &section.boundaries {
            let plane = Plane::new(boundary.normal, boundary.d);
            if !plane.is_valid() {
                return Err(malformed("degenerate boundary plane".into()));
            }
            let mut out = ChunkBoundary::new(plane);
            for portal in &boundary.portals {
                let mut p = Portal::new(portal.points.clone(), PortalLink::from_name(&portal.chunk));
                p.internal = portal.internal;
                p.label = portal.label.clone();
                // Earth is never bound to anything, so it starts bound
                if p.link.is_earth() {
                    out.bound_portals.push(p);
                } else {
                    out.unbound_portals.push(p);
                }
            }
            boundaries.push(out);
        }

        let ctx = ItemLoadContext {
            chunk_identifier: identifier,
            transform,
        };
        let mut items = Vec::with_capacity(section.items.len());
        for item in &section.items {
            match factories.create(item, &ctx) {
                Some(Ok(item)) => items.push(item),
                Some(Err(e)) => log::error!("Chunk '{}': skipping item: {}", identifier, e),
                None => log::warn!("Chunk '{}': no factory for item kind '{}'", identifier, item.kind),
            }
        }

        let overlappers = if is_outside_identifier(identifier) {
            section
                .overlappers
                .iter()
                .map(|o| OverlapperSection {
                    chunk: o.chunk.clone(),
                    bounds: o.bounds.transformed(&mapping_transform),
                })
                .collect()
        } else {
            if !section.overlappers.is_empty() {
                log::warn!("Interior chunk '{}' lists overlappers; ignoring them", identifier);
            }
            Vec::new()
        };

        Ok(Self {
            label: section.label.clone(),
            transform,
            local_bounding_box: section.bounding_box,
            bounding_box: section.bounding_box.transformed(&transform),
            boundaries,
            items,
            overlappers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outside_identifiers() {
        assert_eq!(outside_chunk_identifier(0, 0), "00000000o");
        assert_eq!(outside_chunk_identifier(1, -1), "0001ffffo");
        assert_eq!(parse_outside_identifier("0001ffffo"), Some((1, -1)));
        assert_eq!(parse_outside_identifier("house/hall"), None);
        assert_eq!(parse_outside_identifier("zzzzzzzzo"), None);
        assert!(is_outside_identifier("00000000o"));
        assert!(!is_outside_identifier("shell_a"));

        for (x, z) in [(-32768, 32767), (5, -7)] {
            assert_eq!(parse_outside_identifier(&outside_chunk_identifier(x, z)), Some((x, z)));
        }
    }

    #[test]
    fn test_default_outside_section() {
        let section = ChunkSection::default_outside(2, 3, 100.0, -50.0, 250.0);
        assert_eq!(section.boundaries.len(), 6);

        let targets: Vec<_> = section
            .boundaries
            .iter()
            .flat_map(|b| b.portals.iter().map(|p| p.chunk.clone()))
            .collect();
        assert!(targets.contains(&outside_chunk_identifier(1, 3)));
        assert!(targets.contains(&outside_chunk_identifier(3, 3)));
        assert!(targets.contains(&outside_chunk_identifier(2, 2)));
        assert!(targets.contains(&outside_chunk_identifier(2, 4)));
        assert!(targets.contains(&"earth".to_string()));
        assert!(targets.contains(&"heaven".to_string()));
    }

    #[test]
    fn test_contents_from_outside_section() {
        let section = ChunkSection::default_outside(1, 2, 100.0, 0.0, 100.0).with_overlapper(
            "shell_a",
            BoundingBox::new(Vec3::new(110.0, 0.0, 210.0), Vec3::new(120.0, 10.0, 220.0)),
        );
        let factories = ItemFactories::with_defaults();
        let contents = ChunkContents::from_section(
            &outside_chunk_identifier(1, 2),
            &section,
            Mat4::IDENTITY,
            100.0,
            &factories,
        )
        .unwrap();

        assert_eq!(contents.bounding_box.min, Vec3::new(100.0, 0.0, 200.0));
        assert_eq!(contents.overlappers.len(), 1);

        let bound: usize = contents.boundaries.iter().map(|b| b.bound_portals.len()).sum();
        let unbound: usize = contents.boundaries.iter().map(|b| b.unbound_portals.len()).sum();
        assert_eq!(bound, 1, "earth starts bound");
        assert_eq!(unbound, 5);
    }

    #[test]
    fn test_malformed_sections() {
        let factories = ItemFactories::new();
        let mut section = ChunkSection::from_box(BoundingBox::new(Vec3::ONE, Vec3::ZERO));
        let result = ChunkContents::from_section("shell", &section, Mat4::IDENTITY, 100.0, &factories);
        assert!(matches!(result, Err(ChunkError::MalformedSection { .. })));

        section.bounding_box = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        section.boundaries.clear();
        let result = ChunkContents::from_section("shell", &section, Mat4::IDENTITY, 100.0, &factories);
        assert!(matches!(result, Err(ChunkError::MalformedSection { .. })));

        assert!(ChunkSection::from_slice(b"{ not json").is_err());
    }

    #[test]
    fn test_bad_items_are_skipped() {
        let section = ChunkSection::from_box(BoundingBox::new(Vec3::ZERO, Vec3::splat(10.0)))
            .with_item(serde_json::from_value(json!({ "kind": "mystery" })).unwrap())
            .with_item(
                serde_json::from_value(json!({
                    "kind": "model",
                    "resource": "chair.model",
                    "bounds": { "min": [1.0, 0.0, 1.0], "max": [2.0, 1.0, 2.0] }
                }))
                .unwrap(),
            );
        let contents = ChunkContents::from_section(
            "room",
            &section,
            Mat4::IDENTITY,
            100.0,
            &ItemFactories::with_defaults(),
        )
        .unwrap();
        assert_eq!(contents.items.len(), 1);
    }

    #[test]
    fn test_section_json_round_trip() {
        let section = ChunkSection::default_outside(0, 0, 100.0, 0.0, 50.0);
        let bytes = section.to_vec().unwrap();
        let parsed = ChunkSection::from_slice(&bytes).unwrap();
        assert_eq!(parsed.boundaries.len(), section.boundaries.len());
        assert_eq!(parsed.bounding_box, section.bounding_box);
    }
}
