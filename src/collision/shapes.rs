//! Builders for the host-side records of common bodies.
//!
//! Polygons are described by their outline; the builder adds one constraint
//! per outline edge plus interior braces that keep the outline rigid. Circles
//! are a single point with the radius carried in the hull scale.

use glam::Vec2;

use crate::core::{
    layout::{edge_flags, entity_flags, hull_flags, point_flags},
    records::{EdgeRecord, EntityRecord, HullRecord, PointRecord},
};

/// Hull integrity a freshly built body starts with.
pub const DEFAULT_INTEGRITY: i32 = 100;

#[derive(Debug, Clone, PartialEq)]
enum Outline {
    Polygon(Vec<Vec2>),
    Circle(f32),
}

/// Fluent builder producing a single-hull [`EntityRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeBuilder {
    center: Vec2,
    outline: Outline,
    velocity: Vec2,
    mass: f32,
    friction: f32,
    restitution: f32,
    integrity: i32,
    model_id: i32,
    kind: i32,
    is_static: bool,
    collides: bool,
}

impl ShapeBuilder {
    fn with_outline(center: Vec2, outline: Outline) -> Self {
        Self {
            center,
            outline,
            velocity: Vec2::ZERO,
            mass: 1.0,
            friction: 0.5,
            restitution: 0.0,
            integrity: DEFAULT_INTEGRITY,
            model_id: 0,
            kind: 0,
            is_static: false,
            collides: true,
        }
    }

    /// Axis-aligned square with side `size`.
    pub fn block(center: Vec2, size: f32) -> Self {
        Self::rectangle(center, Vec2::splat(size * 0.5))
    }

    pub fn rectangle(center: Vec2, half_extents: Vec2) -> Self {
        let h = half_extents;
        Self::polygon(
            center,
            vec![
                Vec2::new(-h.x, -h.y),
                Vec2::new(h.x, -h.y),
                Vec2::new(h.x, h.y),
                Vec2::new(-h.x, h.y),
            ],
        )
    }

    /// Regular polygon with `sides` vertices on a circle of `radius`.
    pub fn regular(center: Vec2, radius: f32, sides: usize) -> Self {
        let sides = sides.max(3);
        let step = std::f32::consts::TAU / sides as f32;
        let outline = (0..sides)
            .map(|i| Vec2::from_angle(step * i as f32) * radius)
            .collect();
        Self::polygon(center, outline)
    }

    /// Convex polygon from counter-clockwise offsets relative to `center`.
    pub fn polygon(center: Vec2, outline: Vec<Vec2>) -> Self {
        Self::with_outline(center, Outline::Polygon(outline))
    }

    pub fn circle(center: Vec2, radius: f32) -> Self {
        Self::with_outline(center, Outline::Circle(radius))
    }

    /// Displacement per step, encoded as the previous position.
    pub fn velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn integrity(mut self, integrity: i32) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn model(mut self, model_id: i32) -> Self {
        self.model_id = model_id;
        self
    }

    pub fn kind(mut self, kind: i32) -> Self {
        self.kind = kind;
        self
    }

    /// Immovable body: pinned points, static hull and entity.
    pub fn fixed(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Excludes the hull from collision detection.
    pub fn without_collision(mut self) -> Self {
        self.collides = false;
        self
    }

    pub fn build_hull(&self) -> HullRecord {
        let previous = self.center - self.velocity;
        let point_flags = if self.is_static { point_flags::STATIC } else { 0 };
        let mut flags = if self.is_static { hull_flags::IS_STATIC } else { 0 };
        if !self.collides {
            flags |= hull_flags::NO_COLLISION;
        }

        let (points, edges, scale, reference) = match &self.outline {
            Outline::Circle(radius) => {
                flags |= hull_flags::IS_CIRCLE;
                let point = PointRecord {
                    previous,
                    flags: point_flags,
                    vertex_ref: 0,
                    ..PointRecord::at(self.center)
                };
                (vec![point], Vec::new(), Vec2::splat(*radius), 0.0)
            }
            Outline::Polygon(outline) => {
                flags |= hull_flags::IS_POLYGON;
                let points = outline
                    .iter()
                    .enumerate()
                    .map(|(i, offset)| PointRecord {
                        previous: previous + *offset,
                        flags: point_flags,
                        vertex_ref: i as i32,
                        ..PointRecord::at(self.center + *offset)
                    })
                    .collect();
                let reference = outline.first().map_or(0.0, |first| first.y.atan2(first.x));
                (points, polygon_edges(outline), Vec2::ONE, reference)
            }
        };

        HullRecord {
            position: self.center,
            previous,
            scale,
            rotation: Vec2::new(reference, 0.0),
            friction: self.friction,
            restitution: self.restitution,
            integrity: self.integrity,
            mesh_id: self.model_id,
            uv_offset: 0,
            flags,
            points,
            edges,
            bones: Vec::new(),
        }
    }

    pub fn build(self) -> EntityRecord {
        let hull = self.build_hull();
        EntityRecord {
            position: self.center,
            previous: hull.previous,
            mass: if self.is_static { 0.0 } else { self.mass },
            accel: Vec2::ZERO,
            anim_time: Vec2::ZERO,
            anim_previous_time: Vec2::ZERO,
            anim_blend: Vec2::ZERO,
            motion_state: Default::default(),
            anim_layers: Default::default(),
            anim_previous: Default::default(),
            model_id: self.model_id,
            transform_id: -1,
            kind: self.kind,
            flags: if self.is_static { entity_flags::STATIC } else { 0 },
            root_hull: 0,
            hulls: vec![hull],
            bones: Vec::new(),
        }
    }
}

/// Outline edges followed by interior braces fanned from the first two vertices.
fn polygon_edges(outline: &[Vec2]) -> Vec<EdgeRecord> {
    let n = outline.len();
    let edge = |a: usize, b: usize, flags: u32| EdgeRecord {
        points: [a as i32, b as i32],
        length: outline[a].distance(outline[b]),
        flags,
    };

    let mut edges: Vec<EdgeRecord> = (0..n).map(|i| edge(i, (i + 1) % n, 0)).collect();
    if n >= 4 {
        for origin in 0..2 {
            for target in origin + 2..n {
                if (target + 1) % n != origin {
                    edges.push(edge(origin, target, edge_flags::INTERIOR));
                }
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn block_is_braced_quad() {
        let entity = ShapeBuilder::block(Vec2::new(4.0, 4.0), 2.0).build();
        let hull = &entity.hulls[0];
        assert_eq!(hull.points.len(), 4);
        assert_eq!(hull.edges.len(), 6);
        let interior = hull
            .edges
            .iter()
            .filter(|e| e.flags & edge_flags::INTERIOR != 0)
            .count();
        assert_eq!(interior, 2);
        assert_relative_eq!(hull.edges[4].length, 8f32.sqrt());
        assert_eq!(entity.root_hull, 0);
    }

    #[test]
    fn circle_is_a_single_point() {
        let entity = ShapeBuilder::circle(Vec2::ZERO, 3.0).velocity(Vec2::X).build();
        let hull = &entity.hulls[0];
        assert_eq!(hull.points.len(), 1);
        assert!(hull.edges.is_empty());
        assert_eq!(hull.scale, Vec2::splat(3.0));
        assert_eq!(hull.points[0].previous, Vec2::new(-1.0, 0.0));
        assert_ne!(hull.flags & hull_flags::IS_CIRCLE, 0);
    }

    #[test]
    fn pentagon_braces_do_not_repeat_outline() {
        let hull = ShapeBuilder::regular(Vec2::ZERO, 1.0, 5).build_hull();
        assert_eq!(hull.edges.len(), 5 + 4);
    }
}
