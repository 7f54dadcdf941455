//! Geometry mappings
//!
//! A geometry mapping places one gridded world (a directory of chunk
//! resources) into a space. Mappings are placed by translation only, so
//! grid-aligned rectangles stay axis aligned in world space.
//!
//! # Settings Format
//!
//! ```toml
//! name = "highlands"
//! path = "spaces/highlands"
//! grid_size = 100.0
//! translation = [0.0, 0.0, 0.0]
//!
//! [bounds]
//! min_x = -10
//! max_x = 9
//! min_z = -10
//! max_z = 9
//! ```

use std::path::Path;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Inclusive range of grid cells a mapping covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridBounds {
    pub min_x: i32,
    pub max_x: i32,
    pub min_z: i32,
    pub max_z: i32,
}

impl GridBounds {
    /// Create from inclusive cell ranges
    pub const fn new(min_x: i32, max_x: i32, min_z: i32, max_z: i32) -> Self {
        Self {
            min_x,
            max_x,
            min_z,
            max_z,
        }
    }

    /// Check whether a cell lies inside
    pub fn contains(&self, x: i32, z: i32) -> bool {
        x >= self.min_x && x <= self.max_x && z >= self.min_z && z <= self.max_z
    }

    /// Check if min <= max on both axes
    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_z <= self.max_z
    }

    /// Check every cell has a distinct outside chunk identifier, which
    /// encodes each coordinate in 16 bits
    pub fn is_addressable(&self) -> bool {
        let range = i16::MIN as i32..=i16::MAX as i32;
        [self.min_x, self.max_x, self.min_z, self.max_z]
            .iter()
            .all(|v| range.contains(v))
    }
}

impl Default for GridBounds {
    fn default() -> Self {
        Self::new(-8, 7, -8, 7)
    }
}

/// Settings of a geometry mapping
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometryMapping {
    /// Display name
    pub name: String,
    /// Resource path prefix for the mapping's chunks
    #[serde(default)]
    pub path: String,
    /// Edge length of a grid cell in metres
    #[serde(default = "default_grid_size")]
    pub grid_size: f32,
    /// Placement of the mapping in the space
    #[serde(default)]
    pub translation: Vec3,
    /// Cells that have outside chunks
    #[serde(default)]
    pub bounds: GridBounds,
}

fn default_grid_size() -> f32 {
    100.0
}

impl Default for GeometryMapping {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            path: String::new(),
            grid_size: default_grid_size(),
            translation: Vec3::ZERO,
            bounds: GridBounds::default(),
        }
    }
}

impl GeometryMapping {
    /// Create a mapping reading chunks under `path`
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the grid cell size
    pub fn with_grid_size(mut self, grid_size: f32) -> Self {
        self.grid_size = grid_size;
        self
    }

    /// Set the placement
    pub fn with_translation(mut self, translation: Vec3) -> Self {
        self.translation = translation;
        self
    }

    /// Set the covered cells
    pub fn with_bounds(mut self, bounds: GridBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Parse settings from TOML
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mapping: GeometryMapping = toml::from_str(content)?;
        mapping.validate()?;
        Ok(mapping)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.grid_size.is_finite() && self.grid_size > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "mapping '{}' has grid size {}",
                self.name, self.grid_size
            )));
        }
        if !self.bounds.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "mapping '{}' has inverted bounds {:?}",
                self.name, self.bounds
            )));
        }
        if !self.bounds.is_addressable() {
            return Err(ConfigError::Invalid(format!(
                "mapping '{}' has bounds {:?} beyond the 16-bit cell range",
                self.name, self.bounds
            )));
        }
        if !self.translation.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "mapping '{}' has a non-finite translation",
                self.name
            )));
        }
        Ok(())
    }

    /// Mapping-to-world transform
    pub fn transform(&self) -> Mat4 {
        Mat4::from_translation(self.translation)
    }

    /// Resource id of a chunk in this mapping
    pub fn resource_id(&self, identifier: &str) -> String {
        let prefix = self.path.trim_end_matches('/');
        if prefix.is_empty() {
            format!("{identifier}.chunk")
        } else {
            format!("{prefix}/{identifier}.chunk")
        }
    }

    /// Transform a world point into mapping space
    pub fn world_to_local(&self, point: Vec3) -> Vec3 {
        point - self.translation
    }

    /// Transform a mapping-space point into world space
    pub fn local_to_world(&self, point: Vec3) -> Vec3 {
        point + self.translation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml() {
        let mapping = GeometryMapping::from_toml_str(
            r#"
            name = "highlands"
            path = "spaces/highlands/"
            grid_size = 50.0
            translation = [1000.0, 0.0, -500.0]

            [bounds]
            min_x = -4
            max_x = 3
            min_z = 0
            max_z = 9
            "#,
        )
        .unwrap();

        assert_eq!(mapping.name, "highlands");
        assert_eq!(mapping.grid_size, 50.0);
        assert_eq!(mapping.bounds, GridBounds::new(-4, 3, 0, 9));
        assert_eq!(mapping.resource_id("00000000o"), "spaces/highlands/00000000o.chunk");
        assert_eq!(mapping.world_to_local(Vec3::new(1000.0, 0.0, -500.0)), Vec3::ZERO);
    }

    #[test]
    fn test_defaults() {
        let mapping = GeometryMapping::from_toml_str(r#"name = "empty""#).unwrap();
        assert_eq!(mapping.grid_size, 100.0);
        assert_eq!(mapping.resource_id("shell"), "shell.chunk");
    }

    #[test]
    fn test_invalid_settings() {
        let bad_grid = GeometryMapping::default().with_grid_size(0.0);
        assert!(matches!(bad_grid.validate(), Err(ConfigError::Invalid(_))));

        let bad_bounds = GeometryMapping::default().with_bounds(GridBounds::new(3, 2, 0, 0));
        assert!(bad_bounds.validate().is_err());

        let too_far = GeometryMapping::default().with_bounds(GridBounds::new(32767, 32768, 0, 0));
        assert!(matches!(too_far.validate(), Err(ConfigError::Invalid(_))));
        let too_far = GeometryMapping::default().with_bounds(GridBounds::new(0, 0, -32769, 0));
        assert!(too_far.validate().is_err());
        let edge = GeometryMapping::default().with_bounds(GridBounds::new(-32768, 32767, -32768, 32767));
        assert!(edge.validate().is_ok());

        assert!(matches!(
            GeometryMapping::from_toml_str("name = 5"),
            Err(ConfigError::Parse(_))
        ));
    }
}
