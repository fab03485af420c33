//! Sector Physics – a sector-streamed 2D Verlet physics core for Rust.
//!
//! Bodies are stored as structure-of-arrays columns (points, edges, hulls,
//! entities and two bone layers) linked by inclusive range tables. Every
//! tick runs a fixed-step pipeline over those columns: Verlet integration,
//! a spatial-hash broad phase, SAT and swept-edge narrow phases, contact
//! reactions and edge constraints. Background tasks stream square world
//! sectors in and out of the core as the view moves.

pub mod collision;
pub mod config;
pub mod core;
pub mod dynamics;
pub mod error;
pub mod gpu;
pub mod render;
pub mod sectors;
pub mod sync;
pub mod utils;
pub mod world;

use std::sync::Arc;

pub use glam::{IVec2, IVec4, Mat4, Vec2, Vec4};

pub use collision::{
    broadphase::{BroadPhase, CandidatePair},
    contact::{Contact, ContactKind},
    grid::{KeySpan, UniformGrid},
    scan::ExclusiveScan,
    shapes::ShapeBuilder,
};
pub use config::PhysicsConfig;
pub use crate::core::{
    layout::{entity_flags, hull_flags, point_flags, EgressCounts, Layer, LayerCounts, Range},
    lifecycle::EntityInfo,
    memory::{CoreMemory, SharedMemory, SyncReport},
    records::{BrokenObject, CollectedObject, EntityBatch, EntityRecord, HullRecord, PointRecord},
    soa::BufferGroup,
};
pub use dynamics::{ConstraintMetrics, ConstraintSolver, Integrator};
pub use error::{PhysicsError, PhysicsResult};
pub use gpu::{ComputeContext, DispatchMode};
pub use render::{RenderFrame, RenderMirror};
pub use sectors::{SectorGenerator, SectorKey, SectorState, SectorStreaming, TerrainGenerator};
pub use utils::math::Aabb;
pub use world::{PhysicsWorld, TickReport};

/// High-level convenience wrapper that owns a [`PhysicsWorld`] and, when
/// streaming is enabled, the sector tasks feeding it.
pub struct PhysicsEngine {
    world: PhysicsWorld,
    streaming: Option<SectorStreaming>,
}

impl PhysicsEngine {
    /// Creates an engine without sector streaming. Entities are only added
    /// through [`PhysicsEngine::load_entity_batch`].
    pub fn new(config: PhysicsConfig) -> PhysicsResult<Self> {
        Ok(Self {
            world: PhysicsWorld::new(config)?,
            streaming: None,
        })
    }

    /// Creates an engine whose world content comes from `generator`.
    pub fn with_streaming(config: PhysicsConfig, generator: Arc<dyn SectorGenerator>) -> PhysicsResult<Self> {
        let world = PhysicsWorld::new(config)?;
        let streaming = SectorStreaming::start(world.config(), Arc::clone(world.shared()), generator)?;
        Ok(Self {
            world,
            streaming: Some(streaming),
        })
    }

    /// Advances one tick with the camera at `view`.
    pub fn update(&mut self, view: Aabb, dt: f32) -> PhysicsResult<TickReport> {
        self.world.set_view(&view);
        if let Some(streaming) = &self.streaming {
            streaming.offer_view(view)?;
            streaming.offer_dt(dt)?;
        }
        self.world.tick(dt)
    }

    pub fn load_entity_batch(&self, batch: &EntityBatch) -> PhysicsResult<()> {
        self.world.load_entity_batch(batch)
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.world
    }

    pub fn streaming(&self) -> Option<&SectorStreaming> {
        self.streaming.as_ref()
    }

    /// The last committed render frame.
    pub fn render_frame(&self) -> Arc<RenderFrame> {
        self.world.render_frame()
    }

    /// Stops the sector tasks. The world keeps working without streaming.
    pub fn shutdown(&mut self) -> PhysicsResult<()> {
        match self.streaming.take() {
            Some(mut streaming) => streaming.shutdown(),
            None => Ok(()),
        }
    }
}
