//! Swept-edge continuous collision detection.
//!
//! An edge is fast when either endpoint moved further than its rest length
//! times the displacement ratio during the last step. The quad spanned by its
//! previous and current positions is tested against the other hull's points;
//! a point inside the quad was tunnelled through and is pushed back ahead of
//! the edge along its direction of motion.

use glam::Vec2;
use log::trace;

use crate::{
    collision::{
        broadphase::CandidatePair,
        contact::{Contact, ContactKind},
        narrowphase::HullView,
    },
    core::soa::BufferGroup,
    gpu::ComputeContext,
    utils::math::{perp, point_in_convex_quad},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweptEdgeDetector {
    displacement_ratio: f32,
}

impl Default for SweptEdgeDetector {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CCD_DISPLACEMENT_RATIO)
    }
}

impl SweptEdgeDetector {
    pub fn new(displacement_ratio: f32) -> Self {
        Self {
            displacement_ratio: displacement_ratio.max(0.0),
        }
    }

    pub fn displacement_ratio(&self) -> f32 {
        self.displacement_ratio
    }

    /// Tests the fast edges of both hulls against the other's points and
    /// returns the deepest swept contact.
    pub fn sweep(&self, group: &BufferGroup, a: u32, b: u32) -> Option<Contact> {
        let ha = HullView::new(group, a)?;
        let hb = HullView::new(group, b)?;
        let lengths = group.edges.length.as_slice();

        let mut best: Option<Contact> = None;
        for (edge_hull, vertex_hull) in [(&ha, &hb), (&hb, &ha)] {
            if edge_hull.is_circle() {
                continue;
            }
            for (edge, points) in edge_hull.outer_edges() {
                let (i1, i2) = (points.x as usize, points.y as usize);
                let (p1, p2) = (edge_hull.position(i1), edge_hull.position(i2));
                let (q1, q2) = (edge_hull.previous(i1), edge_hull.previous(i2));

                let displacement = p1.distance(q1).max(p2.distance(q2));
                if displacement <= lengths[edge] * self.displacement_ratio {
                    continue;
                }
                let motion = (p1 - q1) + (p2 - q2);
                let mut normal = perp(p2 - p1).normalize_or_zero();
                if normal == Vec2::ZERO || motion == Vec2::ZERO {
                    continue;
                }
                if normal.dot(motion) < 0.0 {
                    normal = -normal;
                }

                let quad = [q1, q2, p2, p1];
                for (point, position) in vertex_hull.vertices() {
                    if !point_in_convex_quad(position, quad) {
                        continue;
                    }
                    let depth = (p1 - position).dot(normal).max(0.0);
                    if best.is_none_or(|contact| depth > contact.depth) {
                        best = Some(Contact {
                            vertex_hull: vertex_hull.index,
                            edge_hull: edge_hull.index,
                            normal,
                            depth,
                            vertex: point as u32,
                            edge: [i1 as u32, i2 as u32],
                            kind: ContactKind::Swept,
                        });
                    }
                }
            }
        }
        best
    }
}

/// Swept-edge pass over every candidate pair, independent of the
/// separating-axis pass.
pub fn detect_swept_contacts(
    ctx: &ComputeContext,
    group: &BufferGroup,
    pairs: &[CandidatePair],
    detector: &SweptEdgeDetector,
) -> Vec<Contact> {
    let contacts = ctx.filter_map(pairs.len(), |i| {
        let CandidatePair { a, b } = pairs[i];
        detector.sweep(group, a, b)
    });
    trace!("ccd: {} swept contacts from {} pairs", contacts.len(), pairs.len());
    contacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collision::shapes::ShapeBuilder,
        config::PhysicsConfig,
        core::{layout::LayerCounts, lifecycle::SectorInput, records::EntityBatch},
        world::CollisionManager,
    };

    fn world(batch: EntityBatch) -> BufferGroup {
        let ctx = ComputeContext::default();
        let mut core = BufferGroup::new(&LayerCounts::default()).unwrap();
        let mut counts = LayerCounts::default();
        let mut input = SectorInput::new(&LayerCounts::default()).unwrap();
        input.load_entity_batch(&batch).unwrap();
        input.merge_into(&ctx, &mut core, &mut counts).unwrap();
        core
    }

    #[test]
    fn tunnelled_point_is_caught() {
        // The block moved 40 units right in one step, passing over the circle.
        let core = world(
            [
                ShapeBuilder::block(Vec2::new(50.0, 0.0), 10.0)
                    .velocity(Vec2::new(40.0, 0.0))
                    .build(),
                ShapeBuilder::circle(Vec2::new(30.0, 0.0), 1.0).build(),
            ]
            .into_iter()
            .collect(),
        );
        let contact = SweptEdgeDetector::default().sweep(&core, 0, 1).expect("swept hit");
        assert_eq!(contact.kind, ContactKind::Swept);
        assert_eq!(contact.edge_hull, 0);
        assert!(contact.normal.x > 0.99);
        assert!(contact.depth > 0.0);
    }

    #[test]
    fn swept_pass_runs_alongside_an_accepted_overlap() {
        // The block ends 1 unit into the slab, but its leading edge swept
        // over the whole slab during the step.
        let batch: EntityBatch = [
            ShapeBuilder::block(Vec2::new(50.0, 0.0), 10.0)
                .velocity(Vec2::new(40.0, 0.0))
                .build(),
            ShapeBuilder::rectangle(Vec2::new(38.0, 0.0), Vec2::new(8.0, 2.0)).build(),
        ]
        .into_iter()
        .collect();
        let ctx = ComputeContext::default();
        let mut core = BufferGroup::new(&LayerCounts::default()).unwrap();
        let mut counts = LayerCounts::default();
        let mut input = SectorInput::new(&LayerCounts::default()).unwrap();
        input.load_entity_batch(&batch).unwrap();
        input.merge_into(&ctx, &mut core, &mut counts).unwrap();

        let mut manager = CollisionManager::new(&PhysicsConfig::default());
        assert_eq!(manager.broad_phase(&ctx, &mut core, &counts), 1);
        let contacts = manager.narrow_phase(&ctx, &core);

        let kinds: Vec<ContactKind> = contacts.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ContactKind::Overlap, ContactKind::Swept]);
        assert!(contacts[0].depth < 2.0);
        assert_eq!(contacts[1].edge_hull, 0);
        assert!((contacts[1].depth - 25.0).abs() < 1e-4);

        manager.ccd_enabled = false;
        assert_eq!(manager.narrow_phase(&ctx, &core).len(), 1);
    }

    #[test]
    fn slow_edges_are_ignored() {
        let core = world(
            [
                ShapeBuilder::block(Vec2::new(12.0, 0.0), 10.0)
                    .velocity(Vec2::new(2.0, 0.0))
                    .build(),
                ShapeBuilder::circle(Vec2::new(30.0, 0.0), 1.0).build(),
            ]
            .into_iter()
            .collect(),
        );
        assert!(SweptEdgeDetector::default().sweep(&core, 0, 1).is_none());
    }
}
