//! Egress: counting and copying entity trees out of the core buffers, and
//! converting the copied trees back into host records with local tables.

use glam::{IVec2, Vec2};

use crate::{
    core::{
        compact::{mark_entity_trees, remap, remap_table, scan_marks},
        layout::{entity_flags, hull_flags, point_flags, EgressCounts, Layer, LayerCounts, Range},
        records::{
            BrokenObject, CollectedObject, EdgeRecord, EntityBoneRecord, EntityRecord,
            HullBoneRecord, HullRecord, PointRecord,
        },
        soa::BufferGroup,
    },
    error::PhysicsResult,
    gpu::ComputeContext,
    utils::math::Aabb,
};

const REMOVED: u32 = entity_flags::BROKEN | entity_flags::COLLECTED | entity_flags::DELETED;

fn egresses(flags: u32) -> bool {
    flags & entity_flags::SECTOR_OUT != 0 && flags & REMOVED == 0
}

/// Destination of one tick's egress.
#[derive(Debug)]
pub struct EgressOutput {
    pub group: BufferGroup,
    pub counts: EgressCounts,
    pub broken: Vec<BrokenObject>,
    pub collected: Vec<CollectedObject>,
}

impl EgressOutput {
    pub fn new() -> PhysicsResult<Self> {
        Ok(Self {
            group: BufferGroup::new(&LayerCounts::default())?,
            counts: EgressCounts::default(),
            broken: Vec::new(),
            collected: Vec::new(),
        })
    }

    pub fn reset(&mut self) {
        self.counts = EgressCounts::default();
        self.broken.clear();
        self.collected.clear();
    }

    /// Host records of every egressed entity. `counts` must not exceed the
    /// counts published for this output.
    pub fn to_host(&self, counts: &LayerCounts) -> Vec<EntityRecord> {
        unload_entities(&self.group, counts)
    }
}

/// Flags entities outside `loaded` with [`entity_flags::SECTOR_OUT`] and
/// returns the egress contract counts for the tick.
pub fn count_egress(
    ctx: &ComputeContext,
    group: &mut BufferGroup,
    counts: &LayerCounts,
    loaded: Option<Aabb>,
) -> EgressCounts {
    let live = counts.entities();
    if let Some(bounds) = loaded {
        let positions = group.entities.position.as_slice();
        ctx.for_each_mut(&mut group.entities.flags.as_mut_slice()[..live], |i, flags| {
            if *flags & (entity_flags::NO_EGRESS | REMOVED) != 0 {
                return;
            }
            let p = positions[i];
            if !bounds.contains(Vec2::new(p.x, p.y)) {
                *flags |= entity_flags::SECTOR_OUT;
            }
        });
    }

    let flags = &group.entities.flags.as_slice()[..live];
    let broken = flags
        .iter()
        .filter(|f| **f & entity_flags::BROKEN != 0 && **f & entity_flags::DELETED == 0)
        .count();
    let collected = flags
        .iter()
        .filter(|f| {
            **f & entity_flags::COLLECTED != 0
                && **f & (entity_flags::BROKEN | entity_flags::DELETED) == 0
        })
        .count();

    let marks = mark_entity_trees(ctx, group, counts, egresses);
    EgressCounts {
        layers: marks.totals(),
        broken,
        collected,
    }
}

/// Copies every `SECTOR_OUT` tree into `out` with egress-local indices,
/// records broken and collected entities, and flags all of them deleted so
/// the next compaction frees their slots.
pub fn egress(
    ctx: &ComputeContext,
    group: &mut BufferGroup,
    counts: &LayerCounts,
    out: &mut EgressOutput,
) -> PhysicsResult<EgressCounts> {
    out.reset();

    let marks = mark_entity_trees(ctx, group, counts, egresses);
    let scan = scan_marks(ctx, &marks);
    let totals = scan.totals;
    out.group.ensure_capacity(&totals)?;

    copy_marked(marks.layer(Layer::Point), scan.offsets(Layer::Point), |s, d, n| {
        out.group.points.copy_records(&group.points, s, d, n)
    })?;
    copy_marked(marks.layer(Layer::Edge), scan.offsets(Layer::Edge), |s, d, n| {
        out.group.edges.copy_records(&group.edges, s, d, n)
    })?;
    copy_marked(marks.layer(Layer::Hull), scan.offsets(Layer::Hull), |s, d, n| {
        out.group.hulls.copy_records(&group.hulls, s, d, n)
    })?;
    copy_marked(marks.layer(Layer::Entity), scan.offsets(Layer::Entity), |s, d, n| {
        out.group.entities.copy_records(&group.entities, s, d, n)
    })?;
    copy_marked(marks.layer(Layer::HullBone), scan.offsets(Layer::HullBone), |s, d, n| {
        out.group.hull_bones.copy_records(&group.hull_bones, s, d, n)
    })?;
    copy_marked(
        marks.layer(Layer::EntityBone),
        scan.offsets(Layer::EntityBone),
        |s, d, n| out.group.entity_bones.copy_records(&group.entity_bones, s, d, n),
    )?;

    // marked children land at their scanned offset
    let dest = |layer: Layer| {
        let offsets = scan.offsets(layer);
        move |index: i32| offsets.get(index as usize).copied().unwrap_or(0) as i32
    };
    let eg = &mut out.group;
    ctx.for_each_mut(&mut eg.points.hull_index.as_mut_slice()[..totals.points()], |_, h| {
        *h = remap(dest(Layer::Hull), *h)
    });
    ctx.for_each_mut(&mut eg.edges.points.as_mut_slice()[..totals.edges()], |_, p| {
        let map = dest(Layer::Point);
        *p = IVec2::new(remap(&map, p.x), remap(&map, p.y));
    });
    ctx.for_each_mut(&mut eg.hulls.point_table.as_mut_slice()[..totals.hulls()], |_, t| {
        *t = remap_table(dest(Layer::Point), *t)
    });
    ctx.for_each_mut(&mut eg.hulls.edge_table.as_mut_slice()[..totals.hulls()], |_, t| {
        *t = remap_table(dest(Layer::Edge), *t)
    });
    ctx.for_each_mut(&mut eg.hulls.bone_table.as_mut_slice()[..totals.hulls()], |_, t| {
        *t = remap_table(dest(Layer::HullBone), *t)
    });
    ctx.for_each_mut(&mut eg.hulls.entity_id.as_mut_slice()[..totals.hulls()], |_, e| {
        *e = remap(dest(Layer::Entity), *e)
    });
    ctx.for_each_mut(&mut eg.entities.hull_table.as_mut_slice()[..totals.entities()], |_, t| {
        *t = remap_table(dest(Layer::Hull), *t)
    });
    ctx.for_each_mut(&mut eg.entities.bone_table.as_mut_slice()[..totals.entities()], |_, t| {
        *t = remap_table(dest(Layer::EntityBone), *t)
    });
    ctx.for_each_mut(&mut eg.entities.root_hull.as_mut_slice()[..totals.entities()], |_, r| {
        *r = remap(dest(Layer::Hull), *r)
    });
    ctx.for_each_mut(
        &mut eg.entity_bones.parent_id.as_mut_slice()[..totals.entity_bones()],
        |_, p| *p = remap(dest(Layer::EntityBone), *p),
    );

    let live = counts.entities();
    let positions = group.entities.position.as_slice();
    let models = group.entities.model_id.as_slice();
    let kinds = group.entities.kind.as_slice();
    let entity_marks = marks.layer(Layer::Entity);
    for (i, flags) in group.entities.flags.as_mut_slice()[..live].iter_mut().enumerate() {
        if *flags & entity_flags::DELETED != 0 {
            continue;
        }
        if *flags & entity_flags::BROKEN != 0 {
            let p = positions[i];
            out.broken.push(BrokenObject {
                position: Vec2::new(p.x, p.y),
                model_id: models[i],
                kind: kinds[i],
            });
        } else if *flags & entity_flags::COLLECTED != 0 {
            out.collected.push(CollectedObject {
                model_id: models[i],
                kind: kinds[i],
            });
        } else if entity_marks[i] == 0 {
            continue;
        }
        *flags |= entity_flags::DELETED;
    }

    out.counts = EgressCounts {
        layers: totals,
        broken: out.broken.len(),
        collected: out.collected.len(),
    };
    Ok(out.counts)
}

fn copy_marked(
    marks: &[u32],
    offsets: &[u32],
    mut copy: impl FnMut(usize, usize, usize) -> PhysicsResult<()>,
) -> PhysicsResult<()> {
    let mut index = 0;
    while index < marks.len() {
        if marks[index] == 0 {
            index += 1;
            continue;
        }
        let start = index;
        while index < marks.len() && marks[index] != 0 {
            index += 1;
        }
        copy(start, offsets[start] as usize, index - start)?;
    }
    Ok(())
}

/// Rebuilds nested host records from the first `counts` records of `group`.
/// Transient routing flags are dropped.
pub fn unload_entities(group: &BufferGroup, counts: &LayerCounts) -> Vec<EntityRecord> {
    let e = &group.entities;
    let h = &group.hulls;
    let p = &group.points;
    (0..counts.entities())
        .map(|entity| {
            let hull_table = Range::from(e.hull_table.as_slice()[entity]);
            let bone_table = Range::from(e.bone_table.as_slice()[entity]);

            let hulls = hull_table
                .indices()
                .map(|hull| {
                    let point_table = Range::from(h.point_table.as_slice()[hull]);
                    let edge_table = Range::from(h.edge_table.as_slice()[hull]);
                    let hull_bone_table = Range::from(h.bone_table.as_slice()[hull]);
                    let position = h.position.as_slice()[hull];

                    HullRecord {
                        position: Vec2::new(position.x, position.y),
                        previous: Vec2::new(position.z, position.w),
                        scale: h.scale.as_slice()[hull],
                        rotation: h.rotation.as_slice()[hull],
                        friction: h.friction.as_slice()[hull],
                        restitution: h.restitution.as_slice()[hull],
                        integrity: h.integrity.as_slice()[hull],
                        mesh_id: h.mesh_id.as_slice()[hull],
                        uv_offset: h.uv_offset.as_slice()[hull],
                        flags: h.flags.as_slice()[hull] & !hull_flags::OUT_OF_BOUNDS,
                        points: point_table
                            .indices()
                            .map(|point| {
                                let pos = p.position.as_slice()[point];
                                PointRecord {
                                    position: Vec2::new(pos.x, pos.y),
                                    previous: Vec2::new(pos.z, pos.w),
                                    vertex_ref: p.vertex_ref.as_slice()[point],
                                    bone_table: p.bone_table.as_slice()[point].to_array(),
                                    hit_count: p.hit_count.as_slice()[point],
                                    flags: p.flags.as_slice()[point] & !point_flags::HIT,
                                }
                            })
                            .collect(),
                        edges: edge_table
                            .indices()
                            .map(|edge| {
                                let pts = group.edges.points.as_slice()[edge];
                                EdgeRecord {
                                    points: [pts.x - point_table.start, pts.y - point_table.start],
                                    length: group.edges.length.as_slice()[edge],
                                    flags: group.edges.flags.as_slice()[edge],
                                }
                            })
                            .collect(),
                        bones: hull_bone_table
                            .indices()
                            .map(|bone| HullBoneRecord {
                                transform: group.hull_bones.transform.as_slice()[bone],
                                bind_pose_id: group.hull_bones.bind_pose_id.as_slice()[bone],
                                inv_bind_pose_id: group.hull_bones.inv_bind_pose_id.as_slice()[bone],
                            })
                            .collect(),
                    }
                })
                .collect();

            let bones = bone_table
                .indices()
                .map(|bone| {
                    let parent = group.entity_bones.parent_id.as_slice()[bone];
                    EntityBoneRecord {
                        transform: group.entity_bones.transform.as_slice()[bone],
                        reference_id: group.entity_bones.reference_id.as_slice()[bone],
                        parent: if parent >= 0 { parent - bone_table.start } else { -1 },
                    }
                })
                .collect();

            let position = e.position.as_slice()[entity];
            let root = e.root_hull.as_slice()[entity];
            EntityRecord {
                position: Vec2::new(position.x, position.y),
                previous: Vec2::new(position.z, position.w),
                mass: e.mass.as_slice()[entity],
                accel: e.accel.as_slice()[entity],
                anim_time: e.anim_time.as_slice()[entity],
                anim_previous_time: e.anim_previous_time.as_slice()[entity],
                anim_blend: e.anim_blend.as_slice()[entity],
                motion_state: e.motion_state.as_slice()[entity],
                anim_layers: e.anim_layers.as_slice()[entity],
                anim_previous: e.anim_previous.as_slice()[entity],
                model_id: e.model_id.as_slice()[entity],
                transform_id: e.transform_id.as_slice()[entity],
                kind: e.kind.as_slice()[entity],
                flags: e.flags.as_slice()[entity]
                    & !(entity_flags::SECTOR_OUT | entity_flags::DELETED),
                root_hull: if root >= 0 { root - hull_table.start } else { -1 },
                hulls,
                bones,
            }
        })
        .collect()
}
