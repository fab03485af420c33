//! Entity lifecycle kernels: creation into sector buffers, the merge into
//! core buffers, and targeted per-entity updates.

use glam::{IVec2, IVec4, Vec2, Vec4};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        layout::{entity_flags, Layer, LayerCounts, Range},
        records::{
            EdgeRecord, EntityBatch, EntityBoneRecord, EntityRecord, HullBoneRecord, HullRecord,
            PointRecord,
        },
        soa::{BufferGroup, GroupBindings},
    },
    error::PhysicsResult,
    gpu::ComputeContext,
};

/// Append-only staging buffers for one sector's worth of new records.
///
/// Every create call reserves the next free slot of its layer, growing the
/// layer when needed, so records of one parent are always contiguous.
#[derive(Debug)]
pub struct SectorInput {
    group: BufferGroup,
    counts: LayerCounts,
    kernels: GroupBindings,
}

/// Child tables of a hull being created.
#[derive(Debug, Clone, Copy)]
pub struct HullTables {
    pub points: Range,
    pub edges: Range,
    pub bones: Range,
}

impl SectorInput {
    pub fn new(capacity: &LayerCounts) -> PhysicsResult<Self> {
        let mut group = BufferGroup::new(capacity)?;
        let kernels = GroupBindings::new("create");
        group.bind(&kernels);
        Ok(Self {
            group,
            counts: LayerCounts::default(),
            kernels,
        })
    }

    pub fn counts(&self) -> LayerCounts {
        self.counts
    }

    pub fn group(&self) -> &BufferGroup {
        &self.group
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Forgets staged records once they have been merged.
    pub(crate) fn reset(&mut self) {
        self.counts = LayerCounts::default();
    }

    fn reserve(&mut self, layer: Layer) -> PhysicsResult<usize> {
        let index = self.counts[layer];
        let required = index + 1;
        match layer {
            Layer::Point => self.group.points.ensure_capacity(required)?,
            Layer::Edge => self.group.edges.ensure_capacity(required)?,
            Layer::Hull => self.group.hulls.ensure_capacity(required)?,
            Layer::Entity => self.group.entities.ensure_capacity(required)?,
            Layer::HullBone => self.group.hull_bones.ensure_capacity(required)?,
            Layer::EntityBone => self.group.entity_bones.ensure_capacity(required)?,
        };
        debug_assert!(
            index < self.kernels.bound_capacities()[layer],
            "create kernel binding for {layer:?} is stale"
        );
        self.counts[layer] = required;
        Ok(index)
    }

    pub fn create_point(&mut self, record: &PointRecord, hull: i32) -> PhysicsResult<i32> {
        let index = self.reserve(Layer::Point)?;
        let points = &mut self.group.points;
        points.position.set(
            index,
            Vec4::new(
                record.position.x,
                record.position.y,
                record.previous.x,
                record.previous.y,
            ),
        );
        points.hull_index.set(index, hull);
        points.vertex_ref.set(index, record.vertex_ref);
        points.bone_table.set(index, IVec4::from_array(record.bone_table));
        points.hit_count.set(index, record.hit_count);
        points.flags.set(index, record.flags);
        Ok(index as i32)
    }

    pub fn create_edge(&mut self, points: IVec2, length: f32, flags: u32) -> PhysicsResult<i32> {
        let index = self.reserve(Layer::Edge)?;
        let edges = &mut self.group.edges;
        edges.points.set(index, points);
        edges.length.set(index, length);
        edges.flags.set(index, flags);
        edges.aabb.set(index, Vec4::ZERO);
        edges.key_range.set(index, IVec4::splat(-1));
        Ok(index as i32)
    }

    pub fn create_hull(
        &mut self,
        record: &HullRecord,
        tables: HullTables,
        entity: i32,
    ) -> PhysicsResult<i32> {
        let index = self.reserve(Layer::Hull)?;
        let hulls = &mut self.group.hulls;
        hulls.position.set(
            index,
            Vec4::new(
                record.position.x,
                record.position.y,
                record.previous.x,
                record.previous.y,
            ),
        );
        hulls.scale.set(index, record.scale);
        hulls.rotation.set(index, record.rotation);
        hulls.friction.set(index, record.friction);
        hulls.restitution.set(index, record.restitution);
        hulls.integrity.set(index, record.integrity);
        hulls.mesh_id.set(index, record.mesh_id);
        hulls.uv_offset.set(index, record.uv_offset);
        hulls.flags.set(index, record.flags);
        hulls.point_table.set(index, tables.points.into());
        hulls.edge_table.set(index, tables.edges.into());
        hulls.bone_table.set(index, tables.bones.into());
        hulls.entity_id.set(index, entity);
        hulls.aabb.set(index, Vec4::ZERO);
        hulls.key_range.set(index, IVec4::splat(-1));
        hulls.key_table.set(index, Range::EMPTY.into());
        Ok(index as i32)
    }

    pub fn create_entity(
        &mut self,
        record: &EntityRecord,
        hull_table: Range,
        bone_table: Range,
        root_hull: i32,
    ) -> PhysicsResult<i32> {
        let index = self.reserve(Layer::Entity)?;
        let entities = &mut self.group.entities;
        entities.position.set(
            index,
            Vec4::new(
                record.position.x,
                record.position.y,
                record.previous.x,
                record.previous.y,
            ),
        );
        entities.mass.set(index, record.mass);
        entities.accel.set(index, record.accel);
        entities.anim_time.set(index, record.anim_time);
        entities.anim_previous_time.set(index, record.anim_previous_time);
        entities.anim_blend.set(index, record.anim_blend);
        entities.motion_state.set(index, record.motion_state);
        entities.anim_layers.set(index, record.anim_layers);
        entities.anim_previous.set(index, record.anim_previous);
        entities.model_id.set(index, record.model_id);
        entities.transform_id.set(index, record.transform_id);
        entities.kind.set(index, record.kind);
        // transient routing flags never survive a trip through the host
        entities.flags.set(
            index,
            record.flags & !(entity_flags::SECTOR_OUT | entity_flags::DELETED),
        );
        entities.root_hull.set(index, root_hull);
        entities.hull_table.set(index, hull_table.into());
        entities.bone_table.set(index, bone_table.into());
        Ok(index as i32)
    }

    pub fn create_hull_bone(&mut self, record: &HullBoneRecord) -> PhysicsResult<i32> {
        let index = self.reserve(Layer::HullBone)?;
        let bones = &mut self.group.hull_bones;
        bones.transform.set(index, record.transform);
        bones.bind_pose_id.set(index, record.bind_pose_id);
        bones.inv_bind_pose_id.set(index, record.inv_bind_pose_id);
        Ok(index as i32)
    }

    pub fn create_entity_bone(&mut self, record: &EntityBoneRecord, parent: i32) -> PhysicsResult<i32> {
        let index = self.reserve(Layer::EntityBone)?;
        let bones = &mut self.group.entity_bones;
        bones.transform.set(index, record.transform);
        bones.reference_id.set(index, record.reference_id);
        bones.parent_id.set(index, parent);
        Ok(index as i32)
    }

    /// Creates one entity and its whole tree, translating local tables into
    /// sector-buffer indices. Returns the entity's sector index.
    pub fn load_entity(&mut self, entity: &EntityRecord) -> PhysicsResult<i32> {
        let hull_base = self.counts.hulls();
        let bone_base = self.counts.entity_bones() as i32;
        let hull_table = Range::with_len(hull_base, entity.hulls.len());
        let bone_table = Range::with_len(bone_base as usize, entity.bones.len());
        let root_hull = if entity.root_hull >= 0 {
            hull_base as i32 + entity.root_hull
        } else {
            -1
        };

        let entity_index = self.create_entity(entity, hull_table, bone_table, root_hull)?;

        for bone in &entity.bones {
            let parent = if bone.parent >= 0 {
                bone_base + bone.parent
            } else {
                -1
            };
            self.create_entity_bone(bone, parent)?;
        }

        for hull in &entity.hulls {
            let tables = HullTables {
                points: Range::with_len(self.counts.points(), hull.points.len()),
                edges: Range::with_len(self.counts.edges(), hull.edges.len()),
                bones: Range::with_len(self.counts.hull_bones(), hull.bones.len()),
            };
            let hull_index = self.create_hull(hull, tables, entity_index)?;
            for point in &hull.points {
                self.create_point(point, hull_index)?;
            }
            for edge in &hull.edges {
                let EdgeRecord {
                    points,
                    length,
                    flags,
                } = *edge;
                let base = tables.points.start;
                self.create_edge(IVec2::new(base + points[0], base + points[1]), length, flags)?;
            }
            for bone in &hull.bones {
                self.create_hull_bone(bone)?;
            }
        }
        Ok(entity_index)
    }

    /// Appends a whole batch, growing every layer once up front.
    pub fn load_entity_batch(&mut self, batch: &EntityBatch) -> PhysicsResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let required = self.counts.added(&batch.counts());
        self.group.ensure_capacity(&required)?;
        for entity in &batch.entities {
            self.load_entity(entity)?;
        }
        debug_assert_eq!(self.counts, required);
        Ok(())
    }

    /// Merges the staged records into `core` and clears the staging counts.
    pub fn merge_into(
        &mut self,
        ctx: &ComputeContext,
        core: &mut BufferGroup,
        core_counts: &mut LayerCounts,
    ) -> PhysicsResult<LayerCounts> {
        let merged = self.counts;
        if merged.is_empty() {
            return Ok(merged);
        }
        merge_group(ctx, &self.group, &merged, core, core_counts)?;
        self.reset();
        Ok(merged)
    }
}

fn offset_table(table: &mut IVec2, by: i32) {
    *table = Range::from(*table).offset(by).into();
}

/// Copies `source_counts` records of every layer to the end of `target` and
/// rebases every cross-layer index by the target's high-water marks.
pub fn merge_group(
    ctx: &ComputeContext,
    source: &BufferGroup,
    source_counts: &LayerCounts,
    target: &mut BufferGroup,
    target_counts: &mut LayerCounts,
) -> PhysicsResult<()> {
    let base = *target_counts;
    let end = base.added(source_counts);

    target
        .points
        .copy_records(&source.points, 0, base.points(), source_counts.points())?;
    target
        .edges
        .copy_records(&source.edges, 0, base.edges(), source_counts.edges())?;
    target
        .hulls
        .copy_records(&source.hulls, 0, base.hulls(), source_counts.hulls())?;
    target
        .entities
        .copy_records(&source.entities, 0, base.entities(), source_counts.entities())?;
    target.hull_bones.copy_records(
        &source.hull_bones,
        0,
        base.hull_bones(),
        source_counts.hull_bones(),
    )?;
    target.entity_bones.copy_records(
        &source.entity_bones,
        0,
        base.entity_bones(),
        source_counts.entity_bones(),
    )?;

    let hull_base = base.hulls() as i32;
    let point_base = base.points() as i32;
    let edge_base = base.edges() as i32;
    let entity_base = base.entities() as i32;
    let hull_bone_base = base.hull_bones() as i32;
    let entity_bone_base = base.entity_bones() as i32;

    ctx.for_each_mut(
        &mut target.points.hull_index.as_mut_slice()[base.points()..end.points()],
        |_, hull| *hull += hull_base,
    );
    ctx.for_each_mut(
        &mut target.edges.points.as_mut_slice()[base.edges()..end.edges()],
        |_, points| *points += IVec2::splat(point_base),
    );

    let hulls = base.hulls()..end.hulls();
    ctx.for_each_mut(&mut target.hulls.point_table.as_mut_slice()[hulls.clone()], |_, t| {
        offset_table(t, point_base)
    });
    ctx.for_each_mut(&mut target.hulls.edge_table.as_mut_slice()[hulls.clone()], |_, t| {
        offset_table(t, edge_base)
    });
    ctx.for_each_mut(&mut target.hulls.bone_table.as_mut_slice()[hulls.clone()], |_, t| {
        offset_table(t, hull_bone_base)
    });
    ctx.for_each_mut(&mut target.hulls.entity_id.as_mut_slice()[hulls], |_, entity| {
        *entity += entity_base
    });

    let entities = base.entities()..end.entities();
    ctx.for_each_mut(
        &mut target.entities.hull_table.as_mut_slice()[entities.clone()],
        |_, t| offset_table(t, hull_base),
    );
    ctx.for_each_mut(
        &mut target.entities.bone_table.as_mut_slice()[entities.clone()],
        |_, t| offset_table(t, entity_bone_base),
    );
    ctx.for_each_mut(&mut target.entities.root_hull.as_mut_slice()[entities], |_, root| {
        if *root >= 0 {
            *root += hull_base
        }
    });
    ctx.for_each_mut(
        &mut target.entity_bones.parent_id.as_mut_slice()[base.entity_bones()..end.entity_bones()],
        |_, parent| {
            if *parent >= 0 {
                *parent += entity_bone_base
            }
        },
    );

    debug!(
        "merged {} entities / {} hulls / {} points into core (now {} entities)",
        source_counts.entities(),
        source_counts.hulls(),
        source_counts.points(),
        end.entities()
    );
    *target_counts = end;
    Ok(())
}

/// Bounded readback of one entity's motion and animation state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub position: Vec2,
    pub previous: Vec2,
    pub mass: f32,
    pub accel: Vec2,
    pub anim_time: Vec2,
    pub anim_previous_time: Vec2,
    pub anim_blend: Vec2,
    pub motion_state: IVec2,
    pub anim_layers: IVec2,
    pub anim_previous: IVec2,
    pub kind: i32,
    pub flags: u32,
}

/// Reads one entity's state; `None` past the live count.
pub fn read_entity_info(group: &BufferGroup, live: usize, entity: usize) -> Option<EntityInfo> {
    if entity >= live {
        return None;
    }
    let e = &group.entities;
    let position = e.position.get(entity)?;
    Some(EntityInfo {
        position: Vec2::new(position.x, position.y),
        previous: Vec2::new(position.z, position.w),
        mass: e.mass.get(entity)?,
        accel: e.accel.get(entity)?,
        anim_time: e.anim_time.get(entity)?,
        anim_previous_time: e.anim_previous_time.get(entity)?,
        anim_blend: e.anim_blend.get(entity)?,
        motion_state: e.motion_state.get(entity)?,
        anim_layers: e.anim_layers.get(entity)?,
        anim_previous: e.anim_previous.get(entity)?,
        kind: e.kind.get(entity)?,
        flags: e.flags.get(entity)?,
    })
}

/// Writes the gameplay-owned fields back: acceleration, animation, motion
/// counters and flags. Position stays owned by the solver.
pub fn write_entity_info(group: &mut BufferGroup, live: usize, entity: usize, info: &EntityInfo) -> bool {
    if entity >= live {
        return false;
    }
    let e = &mut group.entities;
    e.accel.set(entity, info.accel);
    e.anim_time.set(entity, info.anim_time);
    e.anim_previous_time.set(entity, info.anim_previous_time);
    e.anim_blend.set(entity, info.anim_blend);
    e.motion_state.set(entity, info.motion_state);
    e.anim_layers.set(entity, info.anim_layers);
    e.anim_previous.set(entity, info.anim_previous);
    e.flags.set(entity, info.flags);
    true
}

pub fn update_accel(group: &mut BufferGroup, live: usize, entity: usize, accel: Vec2) -> bool {
    if entity >= live {
        return false;
    }
    group.entities.accel.set(entity, accel);
    true
}

pub fn read_position(group: &BufferGroup, live: usize, entity: usize) -> Option<Vec2> {
    if entity >= live {
        return None;
    }
    group.entities.position.get(entity).map(|p| Vec2::new(p.x, p.y))
}

/// Removes `amount` integrity from a hull, never going below zero; its
/// entity breaks at zero. Returns the remaining integrity.
pub fn apply_damage(group: &mut BufferGroup, live_hulls: usize, hull: usize, amount: i32) -> Option<i32> {
    if hull >= live_hulls {
        return None;
    }
    let remaining = group.hulls.integrity.get(hull)?.saturating_sub(amount).max(0);
    group.hulls.integrity.set(hull, remaining);
    if remaining <= 0 {
        let entity = group.hulls.entity_id.get(hull)?;
        if entity >= 0 {
            let flags = group.entities.flags.get(entity as usize)?;
            group
                .entities
                .flags
                .set(entity as usize, flags | entity_flags::BROKEN);
        }
    }
    Some(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::shapes::ShapeBuilder;

    fn batch_of(count: usize) -> EntityBatch {
        (0..count)
            .map(|i| ShapeBuilder::block(Vec2::new(i as f32 * 40.0, 0.0), 32.0).build())
            .collect()
    }

    #[test]
    fn create_kernels_lay_out_contiguous_trees() {
        let mut input = SectorInput::new(&LayerCounts::default()).unwrap();
        input.load_entity_batch(&batch_of(3)).unwrap();

        let counts = input.counts();
        assert_eq!(counts.entities(), 3);
        assert_eq!(counts.hulls(), 3);
        assert_eq!(counts.points(), 12);
        assert_eq!(counts.edges(), 18);
        input.group().validate_ranges(&counts).expect("contiguous");

        let second = Range::from(input.group().hulls.edge_table.get(1).unwrap());
        assert_eq!(second, Range::new(6, 11));
        let edge = input.group().edges.points.get(6).unwrap();
        assert!(edge.x >= 4 && edge.y < 8);
    }

    #[test]
    fn merge_rebases_every_index() {
        let ctx = ComputeContext::default();
        let mut core = BufferGroup::new(&LayerCounts::default()).unwrap();
        let mut core_counts = LayerCounts::default();

        let mut input = SectorInput::new(&LayerCounts::default()).unwrap();
        input.load_entity_batch(&batch_of(2)).unwrap();
        input.merge_into(&ctx, &mut core, &mut core_counts).unwrap();
        assert!(input.is_empty());

        input.load_entity_batch(&batch_of(1)).unwrap();
        let merged = input.merge_into(&ctx, &mut core, &mut core_counts).unwrap();
        assert_eq!(merged.entities(), 1);
        assert_eq!(core_counts.entities(), 3);
        core.validate_ranges(&core_counts).expect("contiguous after merge");

        assert_eq!(Range::from(core.entities.hull_table.get(2).unwrap()), Range::new(2, 2));
        assert_eq!(core.entities.root_hull.get(2), Some(2));
        assert_eq!(Range::from(core.hulls.point_table.get(2).unwrap()), Range::new(8, 11));
        assert_eq!(core.hulls.entity_id.get(2), Some(2));
        let edge = core.edges.points.get(12).unwrap();
        assert!((8..12).contains(&edge.x) && (8..12).contains(&edge.y));
    }

    #[test]
    fn damage_breaks_entity_at_zero() {
        let ctx = ComputeContext::default();
        let mut core = BufferGroup::new(&LayerCounts::default()).unwrap();
        let mut counts = LayerCounts::default();
        let mut input = SectorInput::new(&LayerCounts::default()).unwrap();
        input.load_entity_batch(&batch_of(1)).unwrap();
        input.merge_into(&ctx, &mut core, &mut counts).unwrap();

        let integrity = core.hulls.integrity.get(0).unwrap();
        assert_eq!(apply_damage(&mut core, counts.hulls(), 0, integrity - 1), Some(1));
        assert_eq!(core.entities.flags.get(0).unwrap() & entity_flags::BROKEN, 0);
        assert_eq!(apply_damage(&mut core, counts.hulls(), 0, 5), Some(0));
        assert_ne!(core.entities.flags.get(0).unwrap() & entity_flags::BROKEN, 0);
        assert_eq!(apply_damage(&mut core, counts.hulls(), 9, 1), None);
    }
}
