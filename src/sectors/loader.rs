//! Loader task: keeps the sectors around the view live.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use log::debug;

use super::{
    cache::CachedSector,
    controller::StreamingState,
    sector::{SectorKey, SectorRange, SectorState},
};
use crate::{
    core::memory::SharedMemory,
    error::PhysicsResult,
    sync::{recv_or_shutdown, ShutdownSignal},
    utils::math::Aabb,
};

/// What one loader iteration did.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub range: SectorRange,
    /// Sectors that became live, in row-major order.
    pub loaded: Vec<SectorKey>,
    /// Sectors that left range and started unloading.
    pub unloading: Vec<SectorKey>,
    pub generated: usize,
    pub replayed: usize,
    /// Entities drained from the pending queue.
    pub queued_entities: usize,
}

impl LoadReport {
    fn new(range: SectorRange) -> Self {
        Self {
            range,
            loaded: Vec::new(),
            unloading: Vec::new(),
            generated: 0,
            replayed: 0,
            queued_entities: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.loaded.is_empty() && self.unloading.is_empty() && self.queued_entities == 0
    }
}

pub struct SectorLoader {
    state: Arc<StreamingState>,
    shared: Arc<SharedMemory>,
    iteration: u64,
}

impl SectorLoader {
    pub fn new(state: Arc<StreamingState>, shared: Arc<SharedMemory>) -> Self {
        Self {
            state,
            shared,
            iteration: 0,
        }
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Updates the sector states for `view` and stages the batches of every
    /// sector entering range, plus anything waiting in the pending queue.
    pub fn load(&mut self, view: &Aabb) -> PhysicsResult<LoadReport> {
        let settings = &self.state.settings;
        let size = settings.sector_size;
        let range = SectorRange::covering(view, settings.view_padding, size);
        self.shared.set_loaded_bounds(Some(range.bounds(size)));

        let mut report = LoadReport::new(range);
        let fresh = {
            let mut table = self.state.table.lock();
            for key in table.in_state(SectorState::Live) {
                if !range.contains(key) && table.transition(key, SectorState::Unloading, self.iteration) {
                    report.unloading.push(key);
                }
            }
            let mut fresh = Vec::new();
            for key in range.keys() {
                match table.state(key) {
                    SectorState::Unloading => {
                        table.transition(key, SectorState::Live, self.iteration);
                    }
                    SectorState::Unloaded => {
                        table.transition(key, SectorState::Loading, self.iteration);
                        fresh.push(key);
                    }
                    SectorState::Loading | SectorState::Live => {}
                }
            }
            fresh
        };

        for key in fresh {
            let cached = self.state.cache.lock().take(key);
            let batch = match cached {
                Some(CachedSector { batch, complete: true }) => {
                    report.replayed += 1;
                    batch
                }
                Some(CachedSector { batch: drifted, .. }) => {
                    report.generated += 1;
                    let mut batch = self.state.generator.generate(key, size);
                    batch.append(drifted);
                    batch
                }
                None => {
                    report.generated += 1;
                    self.state.generator.generate(key, size)
                }
            };
            if !batch.is_empty() {
                self.shared.load_entity_batch(&batch)?;
            }
            self.state.table.lock().transition(key, SectorState::Live, self.iteration);
            report.loaded.push(key);
        }

        let pending = std::mem::take(&mut *self.state.pending.lock());
        if !pending.is_empty() {
            report.queued_entities = pending.len();
            self.shared.load_entity_batch(&pending)?;
        }

        self.iteration += 1;
        Ok(report)
    }

    /// Task body: one `load` per offered view, then hands the turn to the
    /// unloader and waits for the tick.
    pub fn run(mut self, views: Receiver<Aabb>, shutdown: ShutdownSignal) -> PhysicsResult<()> {
        loop {
            let view = recv_or_shutdown(&views, &shutdown, "view")?;
            let report = self.load(&view)?;
            if !report.is_idle() {
                debug!(
                    "loader {}: {} live ({} generated, {} replayed), {} unloading, {} queued",
                    self.iteration,
                    report.loaded.len(),
                    report.generated,
                    report.replayed,
                    report.unloading.len(),
                    report.queued_entities
                );
            }
            self.state.permit.release();
            self.shared.barrier().wait()?;
        }
    }
}
