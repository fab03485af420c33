//! Core memory and the state shared with the sector tasks.
//!
//! The simulation thread owns [`CoreMemory`]. Everything the loader and
//! unloader touch lives in [`SharedMemory`] behind its own lock, and is only
//! exchanged with the core buffers inside the sync window that follows the
//! tick barrier.

use std::sync::Arc;

use glam::Vec2;
use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::{
    config::PhysicsConfig,
    core::{
        compact::delete_and_compact,
        egress::{count_egress, egress, EgressOutput},
        layout::{EgressCounts, LayerCounts},
        lifecycle::{self, EntityInfo, SectorInput},
        records::EntityBatch,
        soa::{BufferGroup, GroupBindings},
    },
    error::PhysicsResult,
    gpu::ComputeContext,
    render::RenderMirror,
    sync::TickBarrier,
    utils::math::Aabb,
};

/// What one sync window moved.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SyncReport {
    pub merged: LayerCounts,
    pub published: EgressCounts,
}

/// State shared between the simulation thread and the sector tasks.
#[derive(Debug)]
pub struct SharedMemory {
    ingress: Mutex<SectorInput>,
    egress: Mutex<EgressOutput>,
    last_egress: Mutex<EgressCounts>,
    loaded_bounds: Mutex<Option<Aabb>>,
    barrier: TickBarrier,
    render: RenderMirror,
}

impl SharedMemory {
    pub fn new(config: &PhysicsConfig) -> PhysicsResult<Self> {
        Ok(Self {
            ingress: Mutex::new(SectorInput::new(&config.initial_counts())?),
            egress: Mutex::new(EgressOutput::new()?),
            last_egress: Mutex::new(EgressCounts::default()),
            loaded_bounds: Mutex::new(None),
            barrier: TickBarrier::new(1),
            render: RenderMirror::new()?,
        })
    }

    /// Staging buffers for records entering the core on the next sync.
    pub fn ingress(&self) -> MutexGuard<'_, SectorInput> {
        self.ingress.lock()
    }

    pub fn load_entity_batch(&self, batch: &EntityBatch) -> PhysicsResult<()> {
        self.ingress.lock().load_entity_batch(batch)
    }

    /// The egress back buffer: what the core egressed during the previous tick.
    pub fn egress(&self) -> MutexGuard<'_, EgressOutput> {
        self.egress.lock()
    }

    /// Counts of the egress back buffer, published at the last sync.
    pub fn last_egress(&self) -> EgressCounts {
        *self.last_egress.lock()
    }

    pub fn loaded_bounds(&self) -> Option<Aabb> {
        *self.loaded_bounds.lock()
    }

    pub fn set_loaded_bounds(&self, bounds: Option<Aabb>) {
        *self.loaded_bounds.lock() = bounds;
    }

    pub fn barrier(&self) -> &TickBarrier {
        &self.barrier
    }

    pub fn render(&self) -> &RenderMirror {
        &self.render
    }
}

/// The live core buffers and the egress front buffer.
#[derive(Debug)]
pub struct CoreMemory {
    group: BufferGroup,
    counts: LayerCounts,
    egress_front: EgressOutput,
    kernels: GroupBindings,
    shared: Arc<SharedMemory>,
    tick: u64,
}

impl CoreMemory {
    pub fn new(config: &PhysicsConfig, shared: Arc<SharedMemory>) -> PhysicsResult<Self> {
        let mut group = BufferGroup::new(&config.initial_counts())?;
        let kernels = GroupBindings::new("core");
        group.bind(&kernels);
        Ok(Self {
            group,
            counts: LayerCounts::default(),
            egress_front: EgressOutput::new()?,
            kernels,
            shared,
            tick: 0,
        })
    }

    pub fn counts(&self) -> LayerCounts {
        self.counts
    }

    pub fn group(&self) -> &BufferGroup {
        &self.group
    }

    /// Mutable access to the buffers together with the live counts.
    pub fn parts_mut(&mut self) -> (&mut BufferGroup, &LayerCounts) {
        (&mut self.group, &self.counts)
    }

    pub fn shared(&self) -> &Arc<SharedMemory> {
        &self.shared
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Bindings of the core kernels; their recorded capacities follow growth.
    pub fn kernels(&self) -> &GroupBindings {
        &self.kernels
    }

    /// Runs the sync window: merges staged ingress, swaps the egress front
    /// buffer into the shared back buffer and publishes the render mirror.
    pub fn synchronize(&mut self, ctx: &ComputeContext) -> PhysicsResult<SyncReport> {
        let merged = self
            .shared
            .ingress
            .lock()
            .merge_into(ctx, &mut self.group, &mut self.counts)?;

        let published = {
            let mut back = self.shared.egress.lock();
            std::mem::swap(&mut *back, &mut self.egress_front);
            *self.shared.last_egress.lock() = back.counts;
            back.counts
        };
        self.egress_front.reset();

        self.tick += 1;
        self.shared.render.commit(self.tick, &self.group, &self.counts)?;

        if !merged.is_empty() || !published.is_empty() {
            debug!(
                "sync {}: merged {} entities, published {} egressed",
                self.tick,
                merged.entities(),
                published.layers.entities()
            );
        }
        Ok(SyncReport { merged, published })
    }

    /// Egresses entities outside the loaded bounds into the front buffer,
    /// then frees every deleted tree.
    ///
    /// While the front buffer still holds egress that no sync has published,
    /// egress is deferred and flagged entities stay in the core.
    pub fn egress_and_compact(&mut self, ctx: &ComputeContext) -> PhysicsResult<EgressCounts> {
        if !self.egress_front.counts.is_empty() {
            delete_and_compact(ctx, &mut self.group, &mut self.counts);
            return Ok(EgressCounts::default());
        }
        let loaded = self.shared.loaded_bounds();
        let planned = count_egress(ctx, &mut self.group, &self.counts, loaded);
        let written = if planned.is_empty() {
            EgressCounts::default()
        } else {
            egress(ctx, &mut self.group, &self.counts, &mut self.egress_front)?
        };
        let removed = delete_and_compact(ctx, &mut self.group, &mut self.counts);
        if !removed.is_empty() {
            debug!("compacted {} entities", removed.entities());
        }
        Ok(written)
    }

    pub fn entity_info(&self, entity: usize) -> Option<EntityInfo> {
        lifecycle::read_entity_info(&self.group, self.counts.entities(), entity)
    }

    pub fn set_entity_info(&mut self, entity: usize, info: &EntityInfo) -> bool {
        lifecycle::write_entity_info(&mut self.group, self.counts.entities(), entity, info)
    }

    pub fn update_accel(&mut self, entity: usize, accel: Vec2) -> bool {
        lifecycle::update_accel(&mut self.group, self.counts.entities(), entity, accel)
    }

    pub fn entity_position(&self, entity: usize) -> Option<Vec2> {
        lifecycle::read_position(&self.group, self.counts.entities(), entity)
    }

    pub fn damage_hull(&mut self, hull: usize, amount: i32) -> Option<i32> {
        lifecycle::apply_damage(&mut self.group, self.counts.hulls(), hull, amount)
    }
}
