use glam::{Vec2, Vec4};

use crate::{
    config::PhysicsConfig,
    core::{
        layout::{hull_flags, point_flags, LayerCounts, Range},
        soa::BufferGroup,
    },
    gpu::ComputeContext,
};

/// Position Verlet integrator for points.
///
/// `next = pos + (pos - prev) * damping + (gravity + accel) * dt^2`; the
/// current position becomes the previous one.
#[derive(Debug, Clone)]
pub struct Integrator {
    pub gravity: Vec2,
    pub damping: f32,
}

impl Default for Integrator {
    fn default() -> Self {
        Self::from_config(&PhysicsConfig::default())
    }
}

impl Integrator {
    pub fn new(gravity: Vec2, damping: f32) -> Self {
        Self { gravity, damping }
    }

    pub fn from_config(config: &PhysicsConfig) -> Self {
        Self::new(Vec2::from_array(config.gravity), config.motion_damping)
    }

    /// Advances every live point by one step of `dt`.
    ///
    /// Static and pinned points do not move, nor do points of static hulls or
    /// of hulls outside the broad-phase grid.
    pub fn integrate(&self, ctx: &ComputeContext, group: &mut BufferGroup, counts: &LayerCounts, dt: f32) {
        let hull_of = group.points.hull_index.as_slice();
        let flags = group.points.flags.as_slice();
        let hull_flags_col = group.hulls.flags.as_slice();
        let entity_of = group.hulls.entity_id.as_slice();
        let accel = group.entities.accel.as_slice();
        let dt2 = dt * dt;
        let (gravity, damping) = (self.gravity, self.damping);

        let live = counts.points();
        ctx.for_each_mut(&mut group.points.position.as_mut_slice()[..live], |point, p| {
            let bits = flags[point];
            if bits & (point_flags::STATIC | point_flags::PINNED) != 0 {
                return;
            }
            let hull = hull_of[point] as usize;
            if hull_flags_col
                .get(hull)
                .is_some_and(|f| f & (hull_flags::IS_STATIC | hull_flags::OUT_OF_BOUNDS) != 0)
            {
                return;
            }
            let entity_accel = entity_of
                .get(hull)
                .and_then(|&entity| accel.get(entity as usize))
                .copied()
                .unwrap_or(Vec2::ZERO);
            let gravity = if bits & point_flags::NO_GRAVITY != 0 {
                Vec2::ZERO
            } else {
                gravity
            };

            let current = Vec2::new(p.x, p.y);
            let previous = Vec2::new(p.z, p.w);
            let next = current + (current - previous) * damping + (gravity + entity_accel) * dt2;
            *p = Vec4::new(next.x, next.y, current.x, current.y);
        });
    }
}

/// Derives hull positions (point centroid, current and previous) and the
/// current hull angle relative to its reference angle.
pub fn resolve_hulls(ctx: &ComputeContext, group: &mut BufferGroup, counts: &LayerCounts) {
    let positions = group.points.position.as_slice();
    let tables = group.hulls.point_table.as_slice();
    let flags = group.hulls.flags.as_slice();
    let references: Vec<f32> = group.hulls.rotation.as_slice()[..counts.hulls()]
        .iter()
        .map(|r| r.x)
        .collect();

    let resolved: Vec<Option<(Vec4, Option<f32>)>> = ctx.map(counts.hulls(), |hull| {
        let table = Range::from(tables[hull]);
        if table.is_empty() {
            return None;
        }
        let sum: Vec4 = table.indices().map(|point| positions[point]).sum();
        let centroid = sum / table.len() as f32;
        let angle = (flags[hull] & hull_flags::IS_POLYGON != 0).then(|| {
            let first = positions[table.start as usize];
            let arm = Vec2::new(first.x - centroid.x, first.y - centroid.y);
            arm.y.atan2(arm.x) - references[hull]
        });
        Some((centroid, angle))
    });

    let hulls = &mut group.hulls;
    for (hull, (position, angle)) in resolved
        .into_iter()
        .enumerate()
        .filter_map(|(hull, resolved)| Some((hull, resolved?)))
    {
        hulls.position.set(hull, position);
        if let Some(angle) = angle {
            hulls.rotation.set(hull, Vec2::new(references[hull], angle));
        }
    }
}

/// Places every entity at the centroid of its hulls.
pub fn resolve_entities(ctx: &ComputeContext, group: &mut BufferGroup, counts: &LayerCounts) {
    let hull_positions = group.hulls.position.as_slice();
    let tables = group.entities.hull_table.as_slice();
    let live = counts.entities();
    ctx.for_each_mut(&mut group.entities.position.as_mut_slice()[..live], |entity, position| {
        let table = Range::from(tables[entity]);
        if table.is_empty() {
            return;
        }
        let sum: Vec4 = table.indices().map(|hull| hull_positions[hull]).sum();
        *position = sum / table.len() as f32;
    });
}

/// Resets per-tick entity acceleration.
pub fn clear_accel(ctx: &ComputeContext, group: &mut BufferGroup, counts: &LayerCounts) {
    let live = counts.entities();
    ctx.for_each_mut(&mut group.entities.accel.as_mut_slice()[..live], |_, accel| {
        *accel = Vec2::ZERO;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collision::shapes::ShapeBuilder,
        core::{lifecycle::SectorInput, records::EntityBatch},
    };
    use approx::assert_relative_eq;

    fn core_with(batch: EntityBatch) -> (ComputeContext, BufferGroup, LayerCounts) {
        let ctx = ComputeContext::default();
        let mut core = BufferGroup::new(&LayerCounts::default()).unwrap();
        let mut counts = LayerCounts::default();
        let mut input = SectorInput::new(&LayerCounts::default()).unwrap();
        input.load_entity_batch(&batch).unwrap();
        input.merge_into(&ctx, &mut core, &mut counts).unwrap();
        (ctx, core, counts)
    }

    #[test]
    fn verlet_step_keeps_velocity_and_applies_gravity() {
        let batch = [ShapeBuilder::circle(Vec2::ZERO, 1.0).velocity(Vec2::new(2.0, 0.0)).build()]
            .into_iter()
            .collect();
        let (ctx, mut core, counts) = core_with(batch);
        Integrator::new(Vec2::new(0.0, -10.0), 1.0).integrate(&ctx, &mut core, &counts, 0.5);
        let p = core.points.position.get(0).unwrap();
        assert_relative_eq!(p.x, 2.0);
        assert_relative_eq!(p.y, -2.5);
        assert_relative_eq!(p.z, 0.0);
    }

    #[test]
    fn static_bodies_do_not_move() {
        let batch = [ShapeBuilder::block(Vec2::ZERO, 4.0).fixed().build()]
            .into_iter()
            .collect();
        let (ctx, mut core, counts) = core_with(batch);
        let before = core.points.position.as_slice()[..4].to_vec();
        Integrator::default().integrate(&ctx, &mut core, &counts, 1.0 / 24.0);
        assert_eq!(&core.points.position.as_slice()[..4], &before[..]);
    }

    #[test]
    fn hulls_outside_the_grid_are_held() {
        let batch = [ShapeBuilder::block(Vec2::ZERO, 4.0).velocity(Vec2::X).build()]
            .into_iter()
            .collect();
        let (ctx, mut core, counts) = core_with(batch);
        core.hulls.flags.set(0, core.hulls.flags.get(0).unwrap() | hull_flags::OUT_OF_BOUNDS);
        let before = core.points.position.as_slice()[..4].to_vec();
        Integrator::default().integrate(&ctx, &mut core, &counts, 1.0 / 24.0);
        assert_eq!(&core.points.position.as_slice()[..4], &before[..]);
    }

    #[test]
    fn hulls_and_entities_follow_their_points() {
        let batch = [ShapeBuilder::block(Vec2::new(3.0, 3.0), 2.0).build()]
            .into_iter()
            .collect();
        let (ctx, mut core, counts) = core_with(batch);
        for p in &mut core.points.position.as_mut_slice()[..4] {
            p.x += 5.0;
        }
        resolve_hulls(&ctx, &mut core, &counts);
        resolve_entities(&ctx, &mut core, &counts);
        assert_relative_eq!(core.hulls.position.get(0).unwrap().x, 8.0);
        assert_relative_eq!(core.entities.position.get(0).unwrap().x, 8.0);
        assert_relative_eq!(core.hulls.rotation.get(0).unwrap().y, 0.0, epsilon = 1e-5);
    }
}
