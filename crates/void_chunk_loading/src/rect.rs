//! Rectangles on the ground plane
//!
//! [`GridRect`] counts whole grid cells of one mapping. [`Rect`] is in world
//! metres, with `y` standing for world `z`.

use glam::Vec2;

/// Half-open range of grid cells: `left..right` by `bottom..top`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GridRect {
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
    pub top: i32,
}

impl GridRect {
    pub const fn new(left: i32, bottom: i32, right: i32, top: i32) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    /// A zero-area rect at one grid corner
    pub const fn collapsed(x: i32, z: i32) -> Self {
        Self::new(x, z, x, z)
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.top - self.bottom).max(0)
    }

    /// Number of cells covered
    pub fn area(&self) -> i64 {
        i64::from(self.width()) * i64::from(self.height())
    }

    /// Covers no cells
    pub fn is_collapsed(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn contains(&self, x: i32, z: i32) -> bool {
        x >= self.left && x < self.right && z >= self.bottom && z < self.top
    }

    /// Every covered cell, row by row
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        (self.bottom..self.top).flat_map(move |z| (self.left..self.right).map(move |x| (x, z)))
    }
}

/// Axis-aligned rectangle in world metres
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub const fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// A rect spanning `-extent..extent` on both axes
    pub fn centred(extent: f32) -> Self {
        Self::new(Vec2::splat(-extent), Vec2::splat(extent))
    }

    pub fn width(&self) -> f32 {
        (self.max.x - self.min.x).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.max.y - self.min.y).max(0.0)
    }

    /// Has no area
    pub fn is_empty(&self) -> bool {
        self.max.x <= self.min.x || self.max.y <= self.min.y
    }

    /// The overlap of two rects; empty rects stay empty
    pub fn intersection(&self, other: &Rect) -> Rect {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        Rect::new(min, max.max(min))
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x < self.max.x && point.y >= self.min.y && point.y < self.max.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_rect() {
        let rect = GridRect::new(-1, 0, 2, 2);
        assert_eq!(rect.width(), 3);
        assert_eq!(rect.area(), 6);
        assert!(rect.contains(-1, 1));
        assert!(!rect.contains(2, 1));
        assert_eq!(rect.cells().count(), 6);
        assert_eq!(rect.cells().next(), Some((-1, 0)));

        assert!(GridRect::collapsed(4, 4).is_collapsed());
        assert!(GridRect::new(0, 0, 3, 0).is_collapsed());
    }

    #[test]
    fn test_intersection() {
        let a = Rect::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0));
        let b = Rect::new(Vec2::new(5.0, -5.0), Vec2::new(20.0, 5.0));
        let both = a.intersection(&b);
        assert_eq!(both, Rect::new(Vec2::new(5.0, 0.0), Vec2::new(10.0, 5.0)));

        let apart = a.intersection(&Rect::new(Vec2::splat(50.0), Vec2::splat(60.0)));
        assert!(apart.is_empty());
        assert_eq!(apart.width(), 0.0);
    }
}
