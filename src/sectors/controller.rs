//! Streaming controller: owns the loader and unloader threads and the
//! hand-off queues feeding them.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};
use parking_lot::Mutex;

use super::{
    cache::SectorCache,
    generator::SectorGenerator,
    loader::SectorLoader,
    sector::{SectorKey, SectorState, SectorTable},
    unloader::SectorUnloader,
};
use crate::{
    config::PhysicsConfig,
    core::{
        memory::SharedMemory,
        records::{CollectedObject, EntityBatch},
    },
    error::{PhysicsError, PhysicsResult},
    sync::{Permit, ShutdownSignal},
    utils::math::Aabb,
};

/// Iterations between a sector leaving range and its batch being cached.
/// Egress written during one tick is published at the next sync and read
/// one iteration later.
pub const UNLOAD_DELAY: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamingSettings {
    pub sector_size: f32,
    pub view_padding: f32,
    pub unload_delay: u64,
}

impl StreamingSettings {
    pub fn from_config(config: &PhysicsConfig) -> Self {
        Self {
            sector_size: config.sector_size,
            view_padding: config.view_padding,
            unload_delay: UNLOAD_DELAY,
        }
    }
}

/// Host-side streaming state shared by the loader and the unloader.
///
/// Lock order: `table`, then `cache`, then `pending`.
pub struct StreamingState {
    pub settings: StreamingSettings,
    pub table: Mutex<SectorTable>,
    pub cache: Mutex<SectorCache>,
    /// Entities waiting to be staged by the next loader iteration.
    pub pending: Mutex<EntityBatch>,
    pub collected: Mutex<Vec<CollectedObject>>,
    pub permit: Permit,
    pub generator: Arc<dyn SectorGenerator>,
}

impl StreamingState {
    pub fn new(config: &PhysicsConfig, generator: Arc<dyn SectorGenerator>) -> Self {
        Self {
            settings: StreamingSettings::from_config(config),
            table: Mutex::new(SectorTable::new()),
            cache: Mutex::new(SectorCache::new(
                config.sector_cache_capacity,
                config.sector_cache_max_records,
            )),
            pending: Mutex::new(EntityBatch::new()),
            collected: Mutex::new(Vec::new()),
            permit: Permit::new(false),
            generator,
        }
    }

    pub fn sector_state(&self, key: SectorKey) -> SectorState {
        self.table.lock().state(key)
    }

    /// Collected objects reported since the last call.
    pub fn take_collected(&self) -> Vec<CollectedObject> {
        std::mem::take(&mut *self.collected.lock())
    }
}

type TaskHandle = JoinHandle<PhysicsResult<()>>;

/// Spawns a named task thread. Whatever way the body ends, the task leaves
/// the tick barrier so the simulation thread never waits on a dead party.
fn spawn_task<B, F>(name: &'static str, shared: &Arc<SharedMemory>, on_exit: F, body: B) -> PhysicsResult<TaskHandle>
where
    B: FnOnce() -> PhysicsResult<()> + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    let barrier_owner = Arc::clone(shared);
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let result = match body() {
                Err(err) if err.is_interrupted() => Ok(()),
                other => other,
            };
            if let Err(err) = &result {
                warn!("{name} stopped: {err}");
            }
            on_exit();
            barrier_owner.barrier().deregister();
            result
        })
        .map_err(|source| PhysicsError::TaskSpawn { name, source })
}

/// Running loader and unloader tasks.
pub struct SectorStreaming {
    state: Arc<StreamingState>,
    shared: Arc<SharedMemory>,
    views: Sender<Aabb>,
    deltas: Sender<f32>,
    shutdown: ShutdownSignal,
    loader: Option<TaskHandle>,
    unloader: Option<TaskHandle>,
}

impl SectorStreaming {
    /// Registers both tasks with the tick barrier and starts them.
    pub fn start(
        config: &PhysicsConfig,
        shared: Arc<SharedMemory>,
        generator: Arc<dyn SectorGenerator>,
    ) -> PhysicsResult<Self> {
        let state = Arc::new(StreamingState::new(config, generator));
        let shutdown = ShutdownSignal::new();
        let (views, view_rx): (Sender<Aabb>, Receiver<Aabb>) = bounded(1);
        let (deltas, dt_rx): (Sender<f32>, Receiver<f32>) = bounded(1);

        let mut streaming = Self {
            state: Arc::clone(&state),
            shared: Arc::clone(&shared),
            views,
            deltas,
            shutdown: shutdown.clone(),
            loader: None,
            unloader: None,
        };

        shared.barrier().register();
        let loader = SectorLoader::new(Arc::clone(&state), Arc::clone(&shared));
        let loader_shutdown = shutdown.clone();
        let permit_owner = Arc::clone(&state);
        match spawn_task(
            "sector-loader",
            &shared,
            move || permit_owner.permit.interrupt(),
            move || loader.run(view_rx, loader_shutdown),
        ) {
            Ok(handle) => streaming.loader = Some(handle),
            Err(err) => {
                shared.barrier().deregister();
                return Err(err);
            }
        }

        shared.barrier().register();
        let unloader = SectorUnloader::new(Arc::clone(&state), Arc::clone(&shared));
        let unloader_shutdown = shutdown;
        match spawn_task(
            "sector-unloader",
            &shared,
            || {},
            move || unloader.run(dt_rx, unloader_shutdown),
        ) {
            Ok(handle) => streaming.unloader = Some(handle),
            Err(err) => {
                shared.barrier().deregister();
                // dropping `streaming` stops the loader
                return Err(err);
            }
        }

        info!(
            "sector streaming started: sector size {}, barrier parties {}",
            config.sector_size,
            shared.barrier().parties()
        );
        Ok(streaming)
    }

    /// Hands the loader the view for the coming tick. Blocks while the
    /// previous view has not been consumed.
    pub fn offer_view(&self, view: Aabb) -> PhysicsResult<()> {
        self.views.send(view).map_err(|_| {
            warn!("loader is gone; view dropped");
            PhysicsError::Disconnected("view")
        })
    }

    /// Hands the unloader the delta time of the coming tick.
    pub fn offer_dt(&self, dt: f32) -> PhysicsResult<()> {
        self.deltas.send(dt).map_err(|_| {
            warn!("unloader is gone; dt dropped");
            PhysicsError::Disconnected("dt")
        })
    }

    pub fn state(&self) -> &Arc<StreamingState> {
        &self.state
    }

    pub fn sector_state(&self, key: SectorKey) -> SectorState {
        self.state.sector_state(key)
    }

    /// Number of sectors held in the host cache.
    pub fn cached_sectors(&self) -> usize {
        self.state.cache.lock().len()
    }

    pub fn take_collected(&self) -> Vec<CollectedObject> {
        self.state.take_collected()
    }

    pub fn is_running(&self) -> bool {
        self.loader.as_ref().is_some_and(|h| !h.is_finished())
            && self.unloader.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Interrupts both tasks at their blocking points and joins them. Must be
    /// called from the thread that drives the tick, outside of `tick`.
    pub fn shutdown(&mut self) -> PhysicsResult<()> {
        if self.loader.is_none() && self.unloader.is_none() {
            return Ok(());
        }
        self.shutdown.trigger();
        self.state.permit.interrupt();
        self.shared.barrier().interrupt();

        let mut result = Ok(());
        for (name, handle) in [("sector-loader", self.loader.take()), ("sector-unloader", self.unloader.take())] {
            let Some(handle) = handle else { continue };
            let outcome = handle.join().unwrap_or(Err(PhysicsError::TaskPanicked(name)));
            if result.is_ok() {
                result = outcome;
            }
        }
        self.shared.barrier().repair();
        info!("sector streaming stopped");
        result
    }
}

impl Drop for SectorStreaming {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("sector streaming shutdown: {err}");
        }
    }
}
