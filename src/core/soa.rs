//! Structure-of-arrays buffer groups.
//!
//! Each layer is a set of [`DeviceBuffer`] columns indexed by record. All
//! columns of a layer share one growth stride and are always grown together,
//! so their capacities never diverge.

use glam::{IVec2, IVec4, Mat4, Vec2, Vec4};
use thiserror::Error;

use crate::{
    config::{DEFAULT_GROWTH_STRIDE, WIDE_GROWTH_STRIDE},
    core::layout::{Layer, LayerCounts, Range},
    error::PhysicsResult,
    gpu::{DeviceBuffer, KernelBinding},
};

macro_rules! layer_buffers {
    (
        $(#[$meta:meta])*
        pub struct $name:ident ($bindings:ident : $column:ident) {
            layer: $layer:expr,
            stride: $stride:expr,
            $($field:ident : $ty:ty => $slot:ident),+ $(,)?
        }
    ) => {
        crate::kernel_args! {
            /// Handles of every column of the layer, rebound on growth.
            pub struct $bindings: $column {
                $($field => $slot),+
            }
        }

        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            $(pub $field: DeviceBuffer<$ty>,)+
        }

        impl $name {
            pub const LAYER: Layer = $layer;
            pub const STRIDE: usize = $stride;

            pub fn new(capacity: usize) -> PhysicsResult<Self> {
                Ok(Self {
                    $($field: DeviceBuffer::new(
                        concat!(stringify!($name), ".", stringify!($field)),
                        $stride,
                        capacity,
                    )?,)+
                })
            }

            pub fn capacity(&self) -> usize {
                [$(self.$field.capacity()),+].into_iter().min().unwrap_or(0)
            }

            /// Grows every column in lock-step.
            pub fn ensure_capacity(&mut self, required: usize) -> PhysicsResult<bool> {
                let mut grew = false;
                $(grew |= self.$field.ensure_capacity(required)?;)+
                Ok(grew)
            }

            pub fn clear(&mut self) {
                $(self.$field.clear();)+
            }

            /// Copies `count` records from `source[src..]` to `self[dst..]`, growing as needed.
            pub fn copy_records(
                &mut self,
                source: &Self,
                src: usize,
                dst: usize,
                count: usize,
            ) -> PhysicsResult<()> {
                if count == 0 {
                    return Ok(());
                }
                self.ensure_capacity(dst + count)?;
                $(self.$field.as_mut_slice()[dst..dst + count]
                    .copy_from_slice(&source.$field.as_slice()[src..src + count]);)+
                Ok(())
            }

            /// Slides `count` records from `src` to `dst` inside this layer.
            pub fn move_records(&mut self, src: usize, dst: usize, count: usize) {
                if count == 0 || src == dst {
                    return;
                }
                $(self.$field.as_mut_slice().copy_within(src..src + count, dst);)+
            }

            /// Mirrors the first `count` records of `source`.
            pub fn copy_from(&mut self, source: &Self, count: usize) -> PhysicsResult<()> {
                $(self.$field.copy_from(&source.$field, count)?;)+
                Ok(())
            }

            /// Attaches `kernel` to every column of the layer.
            pub fn bind(&mut self, kernel: &KernelBinding<$bindings>) {
                $(kernel.attach(&mut self.$field, $column::$slot);)+
            }
        }
    };
}

layer_buffers! {
    /// Verlet points: `position.xy` is current, `position.zw` previous.
    pub struct PointBuffers (PointBindings: PointColumn) {
        layer: Layer::Point,
        stride: DEFAULT_GROWTH_STRIDE,
        position: Vec4 => Position,
        hull_index: i32 => HullIndex,
        vertex_ref: i32 => VertexRef,
        bone_table: IVec4 => BoneTable,
        hit_count: u32 => HitCount,
        flags: u32 => Flags,
    }
}

layer_buffers! {
    /// Distance constraints between two points of the same hull.
    pub struct EdgeBuffers (EdgeBindings: EdgeColumn) {
        layer: Layer::Edge,
        stride: DEFAULT_GROWTH_STRIDE,
        points: IVec2 => Points,
        length: f32 => Length,
        flags: u32 => Flags,
        aabb: Vec4 => Aabb,
        key_range: IVec4 => KeyRange,
    }
}

layer_buffers! {
    /// Collision hulls. `aabb` is `(min.x, min.y, max.x, max.y)`, `key_range`
    /// the spanned grid cells `(x0, x1, y0, y1)`, `key_table` the hull's slice
    /// of the per-hull key list.
    pub struct HullBuffers (HullBindings: HullColumn) {
        layer: Layer::Hull,
        stride: DEFAULT_GROWTH_STRIDE,
        position: Vec4 => Position,
        scale: Vec2 => Scale,
        rotation: Vec2 => Rotation,
        friction: f32 => Friction,
        restitution: f32 => Restitution,
        integrity: i32 => Integrity,
        mesh_id: i32 => MeshId,
        uv_offset: i32 => UvOffset,
        flags: u32 => Flags,
        point_table: IVec2 => PointTable,
        edge_table: IVec2 => EdgeTable,
        bone_table: IVec2 => BoneTable,
        entity_id: i32 => EntityId,
        aabb: Vec4 => Aabb,
        key_range: IVec4 => KeyRange,
        key_table: IVec2 => KeyTable,
    }
}

layer_buffers! {
    pub struct EntityBuffers (EntityBindings: EntityColumn) {
        layer: Layer::Entity,
        stride: DEFAULT_GROWTH_STRIDE,
        position: Vec4 => Position,
        mass: f32 => Mass,
        accel: Vec2 => Accel,
        anim_time: Vec2 => AnimTime,
        anim_previous_time: Vec2 => AnimPreviousTime,
        anim_blend: Vec2 => AnimBlend,
        motion_state: IVec2 => MotionState,
        anim_layers: IVec2 => AnimLayers,
        anim_previous: IVec2 => AnimPrevious,
        model_id: i32 => ModelId,
        transform_id: i32 => TransformId,
        kind: i32 => Kind,
        flags: u32 => Flags,
        root_hull: i32 => RootHull,
        hull_table: IVec2 => HullTable,
        bone_table: IVec2 => BoneTable,
    }
}

layer_buffers! {
    pub struct HullBoneBuffers (HullBoneBindings: HullBoneColumn) {
        layer: Layer::HullBone,
        stride: WIDE_GROWTH_STRIDE,
        transform: Mat4 => Transform,
        bind_pose_id: i32 => BindPoseId,
        inv_bind_pose_id: i32 => InvBindPoseId,
    }
}

layer_buffers! {
    pub struct EntityBoneBuffers (EntityBoneBindings: EntityBoneColumn) {
        layer: Layer::EntityBone,
        stride: WIDE_GROWTH_STRIDE,
        transform: Mat4 => Transform,
        reference_id: i32 => ReferenceId,
        parent_id: i32 => ParentId,
    }
}

/// Kernel bindings covering every layer of one group.
#[derive(Debug, Clone)]
pub struct GroupBindings {
    pub points: KernelBinding<PointBindings>,
    pub edges: KernelBinding<EdgeBindings>,
    pub hulls: KernelBinding<HullBindings>,
    pub entities: KernelBinding<EntityBindings>,
    pub hull_bones: KernelBinding<HullBoneBindings>,
    pub entity_bones: KernelBinding<EntityBoneBindings>,
}

impl GroupBindings {
    pub fn new(name: &'static str) -> Self {
        Self {
            points: KernelBinding::new(name),
            edges: KernelBinding::new(name),
            hulls: KernelBinding::new(name),
            entities: KernelBinding::new(name),
            hull_bones: KernelBinding::new(name),
            entity_bones: KernelBinding::new(name),
        }
    }

    /// Smallest bound capacity of each layer.
    pub fn bound_capacities(&self) -> LayerCounts {
        LayerCounts::new(
            self.points.args().bound_capacity(),
            self.edges.args().bound_capacity(),
            self.hulls.args().bound_capacity(),
            self.entities.args().bound_capacity(),
            self.hull_bones.args().bound_capacity(),
            self.entity_bones.args().bound_capacity(),
        )
    }
}

/// A range-table invariant that does not hold.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{parent:?} {index}: {child:?} range {range:?} {reason}")]
pub struct RangeViolation {
    pub parent: Layer,
    pub index: usize,
    pub child: Layer,
    pub range: Range,
    pub reason: &'static str,
}

/// One complete set of layers.
#[derive(Debug)]
pub struct BufferGroup {
    pub points: PointBuffers,
    pub edges: EdgeBuffers,
    pub hulls: HullBuffers,
    pub entities: EntityBuffers,
    pub hull_bones: HullBoneBuffers,
    pub entity_bones: EntityBoneBuffers,
}

impl BufferGroup {
    pub fn new(capacity: &LayerCounts) -> PhysicsResult<Self> {
        Ok(Self {
            points: PointBuffers::new(capacity.points())?,
            edges: EdgeBuffers::new(capacity.edges())?,
            hulls: HullBuffers::new(capacity.hulls())?,
            entities: EntityBuffers::new(capacity.entities())?,
            hull_bones: HullBoneBuffers::new(capacity.hull_bones())?,
            entity_bones: EntityBoneBuffers::new(capacity.entity_bones())?,
        })
    }

    pub fn capacities(&self) -> LayerCounts {
        LayerCounts::new(
            self.points.capacity(),
            self.edges.capacity(),
            self.hulls.capacity(),
            self.entities.capacity(),
            self.hull_bones.capacity(),
            self.entity_bones.capacity(),
        )
    }

    pub fn ensure_capacity(&mut self, required: &LayerCounts) -> PhysicsResult<bool> {
        let mut grew = self.points.ensure_capacity(required.points())?;
        grew |= self.edges.ensure_capacity(required.edges())?;
        grew |= self.hulls.ensure_capacity(required.hulls())?;
        grew |= self.entities.ensure_capacity(required.entities())?;
        grew |= self.hull_bones.ensure_capacity(required.hull_bones())?;
        grew |= self.entity_bones.ensure_capacity(required.entity_bones())?;
        Ok(grew)
    }

    /// Mirrors the first `counts` records of every layer of `source`.
    pub fn copy_from(&mut self, source: &BufferGroup, counts: &LayerCounts) -> PhysicsResult<()> {
        self.points.copy_from(&source.points, counts.points())?;
        self.edges.copy_from(&source.edges, counts.edges())?;
        self.hulls.copy_from(&source.hulls, counts.hulls())?;
        self.entities.copy_from(&source.entities, counts.entities())?;
        self.hull_bones.copy_from(&source.hull_bones, counts.hull_bones())?;
        self.entity_bones.copy_from(&source.entity_bones, counts.entity_bones())?;
        Ok(())
    }

    pub fn bind(&mut self, bindings: &GroupBindings) {
        self.points.bind(&bindings.points);
        self.edges.bind(&bindings.edges);
        self.hulls.bind(&bindings.hulls);
        self.entities.bind(&bindings.entities);
        self.hull_bones.bind(&bindings.hull_bones);
        self.entity_bones.bind(&bindings.entity_bones);
    }

    /// Checks every range table of the first `counts` records: each range lies
    /// inside the child layer's live count, ranges of successive parents never
    /// overlap and children point back at their parent.
    pub fn validate_ranges(&self, counts: &LayerCounts) -> Result<(), RangeViolation> {
        let entities = counts.entities();
        let hulls = counts.hulls();

        check_tables(
            Layer::Entity,
            &self.entities.hull_table.as_slice()[..entities],
            Layer::Hull,
            hulls,
        )?;
        check_tables(
            Layer::Entity,
            &self.entities.bone_table.as_slice()[..entities],
            Layer::EntityBone,
            counts.entity_bones(),
        )?;
        check_tables(
            Layer::Hull,
            &self.hulls.point_table.as_slice()[..hulls],
            Layer::Point,
            counts.points(),
        )?;
        check_tables(
            Layer::Hull,
            &self.hulls.edge_table.as_slice()[..hulls],
            Layer::Edge,
            counts.edges(),
        )?;
        check_tables(
            Layer::Hull,
            &self.hulls.bone_table.as_slice()[..hulls],
            Layer::HullBone,
            counts.hull_bones(),
        )?;

        for (entity, table) in self.entities.hull_table.as_slice()[..entities].iter().enumerate() {
            let range = Range::from(*table);
            for hull in range.indices() {
                if self.hulls.entity_id.as_slice()[hull] != entity as i32 {
                    return Err(RangeViolation {
                        parent: Layer::Entity,
                        index: entity,
                        child: Layer::Hull,
                        range,
                        reason: "child does not point back at its parent",
                    });
                }
            }
        }
        for (hull, table) in self.hulls.point_table.as_slice()[..hulls].iter().enumerate() {
            let range = Range::from(*table);
            for point in range.indices() {
                if self.points.hull_index.as_slice()[point] != hull as i32 {
                    return Err(RangeViolation {
                        parent: Layer::Hull,
                        index: hull,
                        child: Layer::Point,
                        range,
                        reason: "child does not point back at its parent",
                    });
                }
            }
        }
        Ok(())
    }
}

fn check_tables(
    parent: Layer,
    tables: &[IVec2],
    child: Layer,
    live: usize,
) -> Result<(), RangeViolation> {
    let mut previous_end = -1;
    for (index, table) in tables.iter().enumerate() {
        let range = Range::from(*table);
        if range.is_empty() {
            continue;
        }
        let violation = |reason| RangeViolation {
            parent,
            index,
            child,
            range,
            reason,
        };
        if range.start < 0 || range.end as usize >= live {
            return Err(violation("exceeds the child layer's live count"));
        }
        if range.start <= previous_end {
            return Err(violation("overlaps a preceding parent's range"));
        }
        previous_end = range.end;
    }
    Ok(())
}
