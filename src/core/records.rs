//! Host-side records.
//!
//! These are the ingestion and egress formats. Every relationship is local:
//! edges name hull-local point indices, an entity's root hull and bone parents
//! are entity-local, and child collections are nested in their parent.

use glam::{IVec2, Mat4, Vec2};
use serde::{Deserialize, Serialize};

use crate::core::layout::LayerCounts;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub position: Vec2,
    pub previous: Vec2,
    pub vertex_ref: i32,
    pub bone_table: [i32; 4],
    pub hit_count: u32,
    pub flags: u32,
}

impl PointRecord {
    /// A resting point at `position`.
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            previous: position,
            vertex_ref: -1,
            bone_table: [-1; 4],
            hit_count: 0,
            flags: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Hull-local point indices.
    pub points: [i32; 2],
    pub length: f32,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HullBoneRecord {
    pub transform: Mat4,
    pub bind_pose_id: i32,
    pub inv_bind_pose_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HullRecord {
    pub position: Vec2,
    pub previous: Vec2,
    pub scale: Vec2,
    /// Reference angle and current angle.
    pub rotation: Vec2,
    pub friction: f32,
    pub restitution: f32,
    pub integrity: i32,
    pub mesh_id: i32,
    pub uv_offset: i32,
    pub flags: u32,
    pub points: Vec<PointRecord>,
    pub edges: Vec<EdgeRecord>,
    pub bones: Vec<HullBoneRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityBoneRecord {
    pub transform: Mat4,
    pub reference_id: i32,
    /// Entity-local parent bone, `-1` for a root.
    pub parent: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
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
    pub model_id: i32,
    pub transform_id: i32,
    pub kind: i32,
    pub flags: u32,
    /// Entity-local root hull, `-1` when there is none.
    pub root_hull: i32,
    pub hulls: Vec<HullRecord>,
    pub bones: Vec<EntityBoneRecord>,
}

impl EntityRecord {
    /// Records this entity contributes to each layer.
    pub fn counts(&self) -> LayerCounts {
        let mut counts = LayerCounts::new(0, 0, self.hulls.len(), 1, 0, self.bones.len());
        for hull in &self.hulls {
            counts = counts.added(&LayerCounts::new(
                hull.points.len(),
                hull.edges.len(),
                0,
                0,
                hull.bones.len(),
                0,
            ));
        }
        counts
    }
}

/// An ordered batch of entities submitted for creation.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBatch {
    pub entities: Vec<EntityRecord>,
}

impl EntityBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entity: EntityRecord) {
        self.entities.push(entity);
    }

    pub fn append(&mut self, other: EntityBatch) {
        self.entities.extend(other.entities);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn counts(&self) -> LayerCounts {
        self.entities
            .iter()
            .fold(LayerCounts::default(), |acc, entity| acc.added(&entity.counts()))
    }
}

impl FromIterator<EntityRecord> for EntityBatch {
    fn from_iter<I: IntoIterator<Item = EntityRecord>>(iter: I) -> Self {
        Self {
            entities: iter.into_iter().collect(),
        }
    }
}

/// An entity removed because one of its hulls lost all integrity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrokenObject {
    pub position: Vec2,
    pub model_id: i32,
    pub kind: i32,
}

/// An entity removed because gameplay collected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedObject {
    pub model_id: i32,
    pub kind: i32,
}
