//! Contacts and the point reactions that resolve them.

use glam::Vec2;
use log::trace;
use rayon::prelude::*;

use crate::{
    core::{
        layout::{hull_flags, point_flags, LayerCounts},
        soa::BufferGroup,
    },
    gpu::{ComputeContext, DispatchMode},
    utils::math::{perp, segment_parameter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactKind {
    /// Found by the separating-axis test on current positions.
    Overlap,
    /// Found by sweeping a fast edge over the previous step.
    Swept,
}

/// A vertex of one hull pushed into an edge of another.
///
/// `normal` is a unit vector from the edge hull toward the vertex hull;
/// separating moves the vertex along `+normal` and the edge along `-normal`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub vertex_hull: u32,
    pub edge_hull: u32,
    pub normal: Vec2,
    pub depth: f32,
    /// Point index of the penetrating vertex.
    pub vertex: u32,
    /// Point indices of the edge; both equal for a single-point hull.
    pub edge: [u32; 2],
    pub kind: ContactKind,
}

/// Positional correction for one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reaction {
    pub point: u32,
    pub offset: Vec2,
    /// Added to the previous position. Carries the part of the correction
    /// that must not turn into velocity, plus tangential friction.
    pub previous_offset: Vec2,
    pub hit: bool,
}

fn inverse_mass(group: &BufferGroup, hull: usize, point: usize) -> f32 {
    let hull_static = group
        .hulls
        .flags
        .get(hull)
        .is_none_or(|flags| flags & hull_flags::IS_STATIC != 0);
    let point_fixed = group
        .points
        .flags
        .get(point)
        .is_none_or(|flags| flags & (point_flags::STATIC | point_flags::PINNED) != 0);
    if hull_static || point_fixed {
        return 0.0;
    }
    let mass = group
        .hulls
        .entity_id
        .get(hull)
        .and_then(|entity| group.entities.mass.get(entity as usize))
        .unwrap_or(1.0);
    if mass > 0.0 {
        mass.recip()
    } else {
        1.0
    }
}

fn combined_friction(group: &BufferGroup, contact: &Contact) -> f32 {
    let a = group.hulls.friction.get(contact.vertex_hull as usize).unwrap_or(0.0);
    let b = group.hulls.friction.get(contact.edge_hull as usize).unwrap_or(0.0);
    (a.max(0.0) * b.max(0.0)).sqrt().min(1.0)
}

fn combined_restitution(group: &BufferGroup, contact: &Contact) -> f32 {
    let a = group.hulls.restitution.get(contact.vertex_hull as usize).unwrap_or(0.0);
    let b = group.hulls.restitution.get(contact.edge_hull as usize).unwrap_or(0.0);
    a.max(b).clamp(0.0, 1.0)
}

/// Splits a contact into point reactions, weighted by inverse mass.
///
/// The edge side is distributed over its two points by where the vertex sits
/// along the edge, scaled so the edge point nearest the vertex moves by the
/// full edge share.
pub fn contact_reactions(group: &BufferGroup, contact: &Contact) -> Vec<Reaction> {
    let positions = group.points.position.as_slice();
    let position = |point: u32| {
        let p = positions[point as usize];
        Vec2::new(p.x, p.y)
    };
    let previous = |point: u32| {
        let p = positions[point as usize];
        Vec2::new(p.z, p.w)
    };

    let [e1, e2] = contact.edge;
    let vertex_inv = inverse_mass(group, contact.vertex_hull as usize, contact.vertex as usize);
    let edge_inv = 0.5
        * (inverse_mass(group, contact.edge_hull as usize, e1 as usize)
            + inverse_mass(group, contact.edge_hull as usize, e2 as usize));
    let total = vertex_inv + edge_inv;
    if total <= 0.0 || contact.depth <= 0.0 {
        return Vec::new();
    }

    let correction = contact.normal * contact.depth;
    let vertex_share = vertex_inv / total;
    let edge_share = edge_inv / total;

    let vertex_pos = position(contact.vertex);
    let t = if e1 == e2 {
        0.0
    } else {
        segment_parameter(vertex_pos, position(e1), position(e2))
    };
    let (c1, c2) = (1.0 - t, t);
    let scale = (c1 * c1 + c2 * c2).recip();

    let tangent = perp(contact.normal);
    let friction = combined_friction(group, contact);
    let damping = 1.0 - combined_restitution(group, contact);
    let slide = |point: u32| {
        let velocity = position(point) - previous(point);
        tangent * velocity.dot(tangent) * friction
    };

    let mut reactions = Vec::with_capacity(3);
    if vertex_share > 0.0 {
        reactions.push(Reaction {
            point: contact.vertex,
            offset: correction * vertex_share,
            previous_offset: correction * vertex_share * damping + slide(contact.vertex),
            hit: true,
        });
    }
    if edge_share > 0.0 {
        let push = -correction * edge_share * scale;
        reactions.push(Reaction {
            point: e1,
            offset: push * c1,
            previous_offset: push * c1 * damping + slide(e1) * c1,
            hit: false,
        });
        if e2 != e1 {
            reactions.push(Reaction {
                point: e2,
                offset: push * c2,
                previous_offset: push * c2 * damping + slide(e2) * c2,
                hit: false,
            });
        }
    }
    reactions
}

/// Turns every contact into point reactions, preserving contact order.
pub fn build_reactions(ctx: &ComputeContext, group: &BufferGroup, contacts: &[Contact]) -> Vec<Reaction> {
    ctx.flat_map(contacts.len(), |i| contact_reactions(group, &contacts[i]))
}

/// Applies reactions grouped by point. Reactions are stably sorted first so
/// the accumulation order, and thus the result, does not depend on scheduling.
pub fn apply_reactions(
    ctx: &ComputeContext,
    group: &mut BufferGroup,
    counts: &LayerCounts,
    reactions: &mut [Reaction],
) {
    if reactions.is_empty() {
        return;
    }
    match ctx.mode() {
        DispatchMode::Parallel => reactions.par_sort_by_key(|r| r.point),
        DispatchMode::Serial => reactions.sort_by_key(|r| r.point),
    }

    let live = counts.points();
    let positions = group.points.position.as_mut_slice();
    let hits = group.points.hit_count.as_mut_slice();
    let flags = group.points.flags.as_mut_slice();
    for reaction in reactions.iter() {
        let point = reaction.point as usize;
        if point >= live {
            continue;
        }
        let p = &mut positions[point];
        p.x += reaction.offset.x;
        p.y += reaction.offset.y;
        p.z += reaction.previous_offset.x;
        p.w += reaction.previous_offset.y;
        if reaction.hit {
            hits[point] = hits[point].saturating_add(1);
            flags[point] |= point_flags::HIT;
        }
    }
    trace!("applied {} reactions", reactions.len());
}
