//! Separating-axis narrow phase over candidate pairs.
//!
//! Polygon axes are the normals of outer edges only; interior braces never
//! contribute. A circle against a polygon adds the axis toward the polygon
//! vertex closest to the circle centre. The contact records the deepest
//! vertex of the other hull along the minimum-overlap axis.

use glam::{IVec2, Vec2};
use log::trace;

use crate::{
    collision::{
        broadphase::CandidatePair,
        contact::{Contact, ContactKind},
    },
    core::{
        layout::{edge_flags, hull_flags, Range},
        soa::BufferGroup,
    },
    gpu::ComputeContext,
    utils::math::{interval_overlap, perp, project},
};

/// Read-only view of one hull inside a buffer group.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HullView<'a> {
    pub index: u32,
    pub flags: u32,
    pub radius: f32,
    pub points: Range,
    pub edges: Range,
    group: &'a BufferGroup,
}

impl<'a> HullView<'a> {
    pub fn new(group: &'a BufferGroup, hull: u32) -> Option<Self> {
        let index = hull as usize;
        Some(Self {
            index: hull,
            flags: group.hulls.flags.get(index)?,
            radius: group.hulls.scale.get(index)?.x.abs(),
            points: Range::from(group.hulls.point_table.get(index)?),
            edges: Range::from(group.hulls.edge_table.get(index)?),
            group,
        })
    }

    pub fn is_circle(&self) -> bool {
        self.flags & hull_flags::IS_CIRCLE != 0
    }

    pub fn position(&self, point: usize) -> Vec2 {
        let p = self.group.points.position.as_slice()[point];
        Vec2::new(p.x, p.y)
    }

    pub fn previous(&self, point: usize) -> Vec2 {
        let p = self.group.points.position.as_slice()[point];
        Vec2::new(p.z, p.w)
    }

    pub fn vertices(&self) -> impl Iterator<Item = (usize, Vec2)> + '_ {
        self.points.indices().map(|point| (point, self.position(point)))
    }

    /// Outer edges as point-index pairs.
    pub fn outer_edges(&self) -> impl Iterator<Item = (usize, IVec2)> + '_ {
        let edges = &self.group.edges;
        self.edges.indices().filter_map(move |edge| {
            let flags = edges.flags.as_slice()[edge];
            (flags & edge_flags::INTERIOR == 0).then(|| (edge, edges.points.as_slice()[edge]))
        })
    }

    pub fn centroid(&self) -> Vec2 {
        let len = self.points.len().max(1) as f32;
        self.vertices().map(|(_, p)| p).sum::<Vec2>() / len
    }

    fn projection(&self, axis: Vec2) -> (f32, f32) {
        if self.is_circle() {
            let c = self.centroid().dot(axis);
            (c - self.radius, c + self.radius)
        } else {
            project(self.vertices().map(|(_, p)| p), axis)
        }
    }

    /// Point of this hull reaching furthest along `-axis`.
    fn deepest(&self, axis: Vec2) -> Option<usize> {
        self.vertices()
            .min_by(|(_, a), (_, b)| a.dot(axis).total_cmp(&b.dot(axis)))
            .map(|(point, _)| point)
    }
}

#[derive(Debug, Clone, Copy)]
struct Axis {
    normal: Vec2,
    depth: f32,
    /// Points defining the axis on the edge hull.
    edge: [usize; 2],
}

/// Finds the minimum-overlap outer-edge axis of `edge_hull` against `other`.
/// `Err(())` means a separating axis exists.
fn edge_axes(edge_hull: &HullView<'_>, other: &HullView<'_>) -> Result<Option<Axis>, ()> {
    let mut best: Option<Axis> = None;
    for (_, points) in edge_hull.outer_edges() {
        let (a, b) = (points.x as usize, points.y as usize);
        let normal = perp(edge_hull.position(b) - edge_hull.position(a)).normalize_or_zero();
        if normal == Vec2::ZERO {
            continue;
        }
        let depth = interval_overlap(edge_hull.projection(normal), other.projection(normal));
        if depth <= 0.0 {
            return Err(());
        }
        if best.is_none_or(|axis| depth < axis.depth) {
            best = Some(Axis { normal, depth, edge: [a, b] });
        }
    }
    Ok(best)
}

fn polygon_polygon(a: &HullView<'_>, b: &HullView<'_>) -> Option<Contact> {
    let from_a = edge_axes(a, b).ok()?;
    let from_b = edge_axes(b, a).ok()?;
    let (edge_hull, vertex_hull, axis) = match (from_a, from_b) {
        (Some(x), Some(y)) if y.depth < x.depth => (b, a, y),
        (Some(x), _) => (a, b, x),
        (None, Some(y)) => (b, a, y),
        (None, None) => return None,
    };
    finish(*edge_hull, *vertex_hull, axis)
}

fn circle_polygon(circle: &HullView<'_>, polygon: &HullView<'_>) -> Option<Contact> {
    let center = circle.centroid();
    let mut best = edge_axes(polygon, circle).ok()?;

    let (closest, closest_pos) = polygon
        .vertices()
        .min_by(|(_, p), (_, q)| p.distance_squared(center).total_cmp(&q.distance_squared(center)))?;
    let normal = (center - closest_pos).normalize_or_zero();
    if normal != Vec2::ZERO {
        let depth = interval_overlap(polygon.projection(normal), circle.projection(normal));
        if depth <= 0.0 {
            return None;
        }
        if best.is_none_or(|axis| depth < axis.depth) {
            best = Some(Axis {
                normal,
                depth,
                edge: [closest, closest],
            });
        }
    }
    finish(*polygon, *circle, best?)
}

fn circle_circle(a: &HullView<'_>, b: &HullView<'_>) -> Option<Contact> {
    let (pa, pb) = (a.points.start as usize, b.points.start as usize);
    let offset = b.position(pb) - a.position(pa);
    let distance = offset.length();
    let depth = a.radius + b.radius - distance;
    if depth <= 0.0 {
        return None;
    }
    let normal = if distance > f32::EPSILON {
        offset / distance
    } else {
        Vec2::X
    };
    Some(Contact {
        vertex_hull: b.index,
        edge_hull: a.index,
        normal,
        depth,
        vertex: pb as u32,
        edge: [pa as u32; 2],
        kind: ContactKind::Overlap,
    })
}

/// Orients the axis from the edge hull toward the vertex hull and picks the
/// deepest vertex.
fn finish(edge_hull: HullView<'_>, vertex_hull: HullView<'_>, axis: Axis) -> Option<Contact> {
    let mut normal = axis.normal;
    if (vertex_hull.centroid() - edge_hull.centroid()).dot(normal) < 0.0 {
        normal = -normal;
    }
    let vertex = vertex_hull.deepest(normal)?;
    Some(Contact {
        vertex_hull: vertex_hull.index,
        edge_hull: edge_hull.index,
        normal,
        depth: axis.depth,
        vertex: vertex as u32,
        edge: [axis.edge[0] as u32, axis.edge[1] as u32],
        kind: ContactKind::Overlap,
    })
}

/// Separating-axis test for one hull pair.
pub fn collide_hulls(group: &BufferGroup, a: u32, b: u32) -> Option<Contact> {
    let ha = HullView::new(group, a)?;
    let hb = HullView::new(group, b)?;
    if ha.points.is_empty() || hb.points.is_empty() {
        return None;
    }
    match (ha.is_circle(), hb.is_circle()) {
        (true, true) => circle_circle(&ha, &hb),
        (true, false) => circle_polygon(&ha, &hb),
        (false, true) => circle_polygon(&hb, &ha),
        (false, false) => polygon_polygon(&ha, &hb),
    }
}

/// Separating-axis pass over every candidate pair, in pair order.
pub fn detect_contacts(ctx: &ComputeContext, group: &BufferGroup, pairs: &[CandidatePair]) -> Vec<Contact> {
    let contacts = ctx.filter_map(pairs.len(), |i| {
        let CandidatePair { a, b } = pairs[i];
        collide_hulls(group, a, b)
    });
    trace!("narrowphase: {} contacts from {} pairs", contacts.len(), pairs.len());
    contacts
}
