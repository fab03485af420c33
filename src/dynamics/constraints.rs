//! Edge distance constraints.
//!
//! Points of one hull occupy one contiguous slice of the point layer, so the
//! point layer splits into disjoint per-hull chunks. Hulls are solved in
//! parallel; within a hull, edges are relaxed sequentially (Gauss-Seidel).

use glam::{Vec2, Vec4};
use log::warn;

use crate::{
    config::PhysicsConfig,
    core::{
        layout::{point_flags, LayerCounts, Range},
        soa::BufferGroup,
    },
    gpu::ComputeContext,
};

/// Counters gathered during one solve.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ConstraintMetrics {
    pub hulls_solved: usize,
    pub edges_solved: usize,
    /// Largest `|distance - rest|` seen during the last iteration.
    pub max_error: f32,
}

impl ConstraintMetrics {
    pub fn merge(&mut self, other: &Self) {
        self.hulls_solved += other.hulls_solved;
        self.edges_solved += other.edges_solved;
        self.max_error = self.max_error.max(other.max_error);
    }
}

#[derive(Debug, Clone)]
pub struct ConstraintSolver {
    pub iterations: u32,
    pub stiffness: f32,
}

impl Default for ConstraintSolver {
    fn default() -> Self {
        Self::from_config(&PhysicsConfig::default())
    }
}

struct HullChunk<'a> {
    base: usize,
    positions: &'a mut [Vec4],
    edges: Range,
    metrics: ConstraintMetrics,
}

impl ConstraintSolver {
    pub fn new(iterations: u32, stiffness: f32) -> Self {
        Self {
            iterations,
            stiffness: stiffness.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &PhysicsConfig) -> Self {
        Self::new(config.edge_steps, config.constraint_stiffness)
    }

    /// Relaxes every live edge `iterations` times.
    pub fn solve(&self, ctx: &ComputeContext, group: &mut BufferGroup, counts: &LayerCounts) -> ConstraintMetrics {
        let live_hulls = counts.hulls();
        let point_tables = group.hulls.point_table.as_slice();
        let edge_tables = group.hulls.edge_table.as_slice();
        let edge_points = group.edges.points.as_slice();
        let rest = group.edges.length.as_slice();
        let flags = group.points.flags.as_slice();

        // Hulls are carved off the point layer in order; a hull whose points
        // overlap an earlier hull or run past the live count is skipped.
        let mut remaining = &mut group.points.position.as_mut_slice()[..counts.points()];
        let mut cursor = 0usize;
        let mut chunks: Vec<HullChunk<'_>> = Vec::with_capacity(live_hulls);
        for hull in 0..live_hulls {
            let table = Range::from(point_tables[hull]);
            if table.is_empty() {
                continue;
            }
            let start = table.start.max(0) as usize;
            if table.start < 0 || start < cursor || start + table.len() > counts.points() {
                warn!("hull {hull} has misplaced points {table:?}; constraints skipped");
                continue;
            }
            let (_, tail) = std::mem::take(&mut remaining).split_at_mut(start - cursor);
            let (positions, tail) = tail.split_at_mut(table.len());
            remaining = tail;
            cursor = start + table.len();
            chunks.push(HullChunk {
                base: start,
                positions,
                edges: Range::from(edge_tables[hull]),
                metrics: ConstraintMetrics::default(),
            });
        }

        let (iterations, stiffness) = (self.iterations, self.stiffness);
        ctx.for_each_mut(&mut chunks, |_, chunk| {
            if chunk.positions.is_empty() {
                return;
            }
            let mut error = 0.0f32;
            for _ in 0..iterations {
                error = 0.0;
                for edge in chunk.edges.indices() {
                    let pair = edge_points[edge];
                    let (a, b) = (pair.x as usize, pair.y as usize);
                    if a < chunk.base || b < chunk.base {
                        continue;
                    }
                    let (la, lb) = (a - chunk.base, b - chunk.base);
                    if la >= chunk.positions.len() || lb >= chunk.positions.len() || la == lb {
                        continue;
                    }
                    let wa = inverse_weight(flags[a]);
                    let wb = inverse_weight(flags[b]);
                    let w = wa + wb;
                    if w == 0.0 {
                        continue;
                    }

                    let pa = Vec2::new(chunk.positions[la].x, chunk.positions[la].y);
                    let pb = Vec2::new(chunk.positions[lb].x, chunk.positions[lb].y);
                    let delta = pb - pa;
                    let distance = delta.length();
                    if distance <= f32::EPSILON {
                        continue;
                    }
                    let stretch = distance - rest[edge];
                    error = error.max(stretch.abs());
                    let correction = delta * (stretch / distance) * stiffness;
                    let move_a = correction * (wa / w);
                    let move_b = -correction * (wb / w);
                    chunk.positions[la].x += move_a.x;
                    chunk.positions[la].y += move_a.y;
                    chunk.positions[lb].x += move_b.x;
                    chunk.positions[lb].y += move_b.y;
                }
            }
            chunk.metrics = ConstraintMetrics {
                hulls_solved: 1,
                edges_solved: chunk.edges.len(),
                max_error: error,
            };
        });

        let mut metrics = ConstraintMetrics::default();
        for chunk in &chunks {
            metrics.merge(&chunk.metrics);
        }
        metrics
    }
}

fn inverse_weight(flags: u32) -> f32 {
    if flags & (point_flags::STATIC | point_flags::PINNED) != 0 {
        0.0
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collision::shapes::ShapeBuilder,
        core::{lifecycle::SectorInput, records::EntityBatch},
    };
    use approx::assert_relative_eq;

    #[test]
    fn stretched_block_recovers_its_shape() {
        let ctx = ComputeContext::default();
        let batch: EntityBatch = (0..3)
            .map(|i| ShapeBuilder::block(Vec2::new(i as f32 * 20.0, 0.0), 4.0).build())
            .collect();
        let mut core = BufferGroup::new(&LayerCounts::default()).unwrap();
        let mut counts = LayerCounts::default();
        let mut input = SectorInput::new(&LayerCounts::default()).unwrap();
        input.load_entity_batch(&batch).unwrap();
        input.merge_into(&ctx, &mut core, &mut counts).unwrap();

        core.points.position.as_mut_slice()[5].x += 1.5;
        let metrics = ConstraintSolver::new(32, 1.0).solve(&ctx, &mut core, &counts);
        assert_eq!(metrics.hulls_solved, 3);
        assert_eq!(metrics.edges_solved, 18);

        let p = core.points.position.as_slice();
        let side = Vec2::new(p[4].x, p[4].y).distance(Vec2::new(p[5].x, p[5].y));
        assert_relative_eq!(side, 4.0, epsilon = 5e-2);
    }
}
