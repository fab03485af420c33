//! Additional 2D math helpers layered on top of `glam`.

use glam::{Vec2, Vec4};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    /// An inverted box that any `include` call replaces.
    pub const EMPTY: Aabb = Aabb {
        min: Vec2::splat(f32::MAX),
        max: Vec2::splat(f32::MIN),
    };

    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn from_center(center: Vec2, half_extents: Vec2) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Unpacks the `(min.x, min.y, max.x, max.y)` column layout.
    pub fn from_vec4(packed: Vec4) -> Self {
        Self {
            min: Vec2::new(packed.x, packed.y),
            max: Vec2::new(packed.z, packed.w),
        }
    }

    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(self.min.x, self.min.y, self.max.x, self.max.y)
    }

    pub fn include(&mut self, point: Vec2) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    /// Closed-interval overlap test; touching boxes overlap.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    pub fn expand(&self, by: f32) -> Self {
        Self {
            min: self.min - Vec2::splat(by),
            max: self.max + Vec2::splat(by),
        }
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }
}

/// Counter-clockwise perpendicular.
#[inline]
pub fn perp(v: Vec2) -> Vec2 {
    Vec2::new(-v.y, v.x)
}

/// Z component of the 3D cross product of two planar vectors.
#[inline]
pub fn cross(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Projects `points` onto `axis`, returning `(min, max)`.
pub fn project(points: impl IntoIterator<Item = Vec2>, axis: Vec2) -> (f32, f32) {
    points
        .into_iter()
        .map(|p| p.dot(axis))
        .fold((f32::MAX, f32::MIN), |(lo, hi), d| (lo.min(d), hi.max(d)))
}

/// Overlap of two projected intervals; negative when separated.
#[inline]
pub fn interval_overlap(a: (f32, f32), b: (f32, f32)) -> f32 {
    a.1.min(b.1) - a.0.max(b.0)
}

/// Containment test for a convex quad given in either winding order.
/// Points on the boundary count as inside.
pub fn point_in_convex_quad(point: Vec2, quad: [Vec2; 4]) -> bool {
    let mut positive = false;
    let mut negative = false;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let side = cross(b - a, point - a);
        positive |= side > 0.0;
        negative |= side < 0.0;
        if positive && negative {
            return false;
        }
    }
    true
}

/// Parameter of the closest point to `point` on segment `a..b`, clamped to `[0, 1]`.
pub fn segment_parameter(point: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return 0.0;
    }
    ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_containment_ignores_winding() {
        let quad = [
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(0.0, 2.0),
        ];
        let mut reversed = quad;
        reversed.reverse();
        for q in [quad, reversed] {
            assert!(point_in_convex_quad(Vec2::new(1.0, 1.0), q));
            assert!(point_in_convex_quad(Vec2::new(2.0, 1.0), q));
            assert!(!point_in_convex_quad(Vec2::new(3.0, 1.0), q));
        }
    }

    #[test]
    fn touching_boxes_overlap() {
        let a = Aabb::new(Vec2::ZERO, Vec2::splat(2.0));
        let b = Aabb::new(Vec2::splat(2.0), Vec2::splat(3.0));
        let c = Aabb::new(Vec2::splat(2.5), Vec2::splat(3.0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
