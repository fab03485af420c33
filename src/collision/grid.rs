//! Uniform grid used to derive spatial-hash keys.

use glam::{IVec4, UVec2, Vec2};

use crate::{config::PhysicsConfig, utils::math::Aabb};

/// Inclusive rectangle of grid cells `(x0..=x1, y0..=y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpan {
    pub x0: i32,
    pub x1: i32,
    pub y0: i32,
    pub y1: i32,
}

impl KeySpan {
    /// Column value of a bound that spans no cell.
    pub const NONE: IVec4 = IVec4::splat(-1);

    pub fn from_ivec4(packed: IVec4) -> Option<Self> {
        if packed.x < 0 || packed.y < packed.x || packed.w < packed.z {
            return None;
        }
        Some(Self {
            x0: packed.x,
            x1: packed.y,
            y0: packed.z,
            y1: packed.w,
        })
    }

    pub fn to_ivec4(self) -> IVec4 {
        IVec4::new(self.x0, self.x1, self.y0, self.y1)
    }

    pub fn len(&self) -> u32 {
        ((self.x1 - self.x0 + 1) * (self.y1 - self.y0 + 1)) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the span stays within `max` cells along both axes.
    pub fn fits(&self, max: i32) -> bool {
        self.x1 - self.x0 < max && self.y1 - self.y0 < max
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    /// The lowest cell both spans share, if any.
    pub fn first_shared_cell(&self, other: &KeySpan) -> Option<(i32, i32)> {
        let x = self.x0.max(other.x0);
        let y = self.y0.max(other.y0);
        (x <= self.x1.min(other.x1) && y <= self.y1.min(other.y1)).then_some((x, y))
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> {
        let (x0, x1) = (self.x0, self.x1);
        (self.y0..=self.y1).flat_map(move |y| (x0..=x1).map(move |x| (x, y)))
    }
}

/// Partition of a rectangle of world space into equally sized cells.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformGrid {
    origin: Vec2,
    extent: Vec2,
    subdivisions: UVec2,
    cell: Vec2,
    max_key_span: i32,
}

impl UniformGrid {
    pub fn new(origin: Vec2, extent: Vec2, subdivisions: [u32; 2], max_key_span: u32) -> Self {
        let subdivisions = UVec2::from_array(subdivisions).max(UVec2::ONE);
        Self {
            origin,
            extent,
            subdivisions,
            cell: extent / subdivisions.as_vec2(),
            max_key_span: max_key_span.max(1) as i32,
        }
    }

    /// Grid of `extent` world units centred on `center`.
    pub fn centered(center: Vec2, extent: Vec2, subdivisions: [u32; 2], max_key_span: u32) -> Self {
        Self::new(center - extent * 0.5, extent, subdivisions, max_key_span)
    }

    pub fn from_config(config: &PhysicsConfig) -> Self {
        Self::centered(
            Vec2::ZERO,
            Vec2::from_array(config.grid_extent),
            config.grid_subdivisions,
            config.max_key_span,
        )
    }

    /// Moves the grid so it is centred on `center`, keeping its shape.
    pub fn recenter(&mut self, center: Vec2) {
        self.origin = center - self.extent * 0.5;
    }

    /// Grid with the same cell size grown by whole cells until it also
    /// covers `area`.
    pub fn covering(&self, area: &Aabb) -> Self {
        if !area.is_valid() {
            return self.clone();
        }
        let min = self.origin.min(area.min);
        let max = (self.origin + self.extent).max(area.max);
        let subdivisions = ((max - min) / self.cell).ceil().as_uvec2().max(UVec2::ONE);
        Self {
            origin: min,
            extent: subdivisions.as_vec2() * self.cell,
            subdivisions,
            cell: self.cell,
            max_key_span: self.max_key_span,
        }
    }

    /// Spans wider than this many cells are not keyed into the hash.
    pub fn max_key_span(&self) -> i32 {
        self.max_key_span
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.origin, self.origin + self.extent)
    }

    pub fn cell_size(&self) -> Vec2 {
        self.cell
    }

    pub fn subdivisions(&self) -> UVec2 {
        self.subdivisions
    }

    /// Total number of keys (cells).
    pub fn key_count(&self) -> usize {
        (self.subdivisions.x * self.subdivisions.y) as usize
    }

    #[inline]
    pub fn key(&self, x: i32, y: i32) -> usize {
        y as usize * self.subdivisions.x as usize + x as usize
    }

    /// Cells covered by `bounds`, clamped to the grid. Degenerate bounds
    /// still cover the cell they sit in; bounds that miss the grid cover
    /// nothing.
    pub fn key_span(&self, bounds: &Aabb) -> Option<KeySpan> {
        if !bounds.is_valid() || !bounds.overlaps(&self.bounds()) {
            return None;
        }
        let (x0, x1) = self.axis_span(bounds.min.x, bounds.max.x, 0);
        let (y0, y1) = self.axis_span(bounds.min.y, bounds.max.y, 1);
        Some(KeySpan { x0, x1, y0, y1 })
    }

    fn axis_span(&self, min: f32, max: f32, axis: usize) -> (i32, i32) {
        let last = self.subdivisions[axis] as i32 - 1;
        let cell = |value: f32| {
            let raw = ((value - self.origin[axis]) / self.cell[axis]).floor();
            (raw as i32).clamp(0, last)
        };
        let lo = cell(min);
        (lo, cell(max).max(lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> UniformGrid {
        UniformGrid::new(Vec2::ZERO, Vec2::splat(32.0), [16, 16], 4)
    }

    #[test]
    fn degenerate_bound_covers_one_cell() {
        let point = Aabb::new(Vec2::splat(5.0), Vec2::splat(5.0));
        let span = grid().key_span(&point).expect("inside the grid");
        assert_eq!(span.len(), 1);
        assert_eq!((span.x0, span.y0), (2, 2));
    }

    #[test]
    fn bounds_outside_grid_have_no_keys() {
        let far = Aabb::new(Vec2::splat(100.0), Vec2::splat(110.0));
        assert!(grid().key_span(&far).is_none());
    }

    #[test]
    fn wide_bounds_keep_their_full_span() {
        let wide = Aabb::new(Vec2::new(0.0, 0.0), Vec2::new(31.0, 1.0));
        let span = grid().key_span(&wide).unwrap();
        assert_eq!((span.x0, span.x1), (0, 15));
        assert_eq!(span.len(), 16);
        assert!(!span.fits(grid().max_key_span()));
        assert!(KeySpan { x0: 2, x1: 5, y0: 0, y1: 3 }.fits(4));
    }

    #[test]
    fn covering_grows_by_whole_cells() {
        let area = Aabb::new(Vec2::new(-5.0, 10.0), Vec2::new(20.0, 40.0));
        let grown = grid().covering(&area);
        assert_eq!(grown.cell_size(), Vec2::splat(2.0));
        assert_eq!(grown.bounds().min, Vec2::new(-5.0, 0.0));
        assert!(grown.bounds().max.y >= 40.0);
        assert_eq!(grown.subdivisions(), UVec2::new(19, 20));
        assert_eq!(grid().covering(&Aabb::new(Vec2::splat(4.0), Vec2::splat(8.0))), grid());
    }

    #[test]
    fn first_shared_cell_is_the_intersection_corner() {
        let a = KeySpan { x0: 0, x1: 3, y0: 0, y1: 3 };
        let b = KeySpan { x0: 2, x1: 5, y0: 1, y1: 2 };
        assert_eq!(a.first_shared_cell(&b), Some((2, 1)));
        let c = KeySpan { x0: 4, x1: 5, y0: 0, y1: 0 };
        assert_eq!(a.first_shared_cell(&c), None);
    }
}
