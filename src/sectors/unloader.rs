//! Unloader task: turns egressed entities back into sector batches.

use std::{collections::HashMap, sync::Arc};

use crossbeam_channel::Receiver;
use log::debug;

use super::{
    controller::StreamingState,
    sector::{SectorKey, SectorState},
};
use crate::{
    core::{memory::SharedMemory, records::EntityBatch},
    error::PhysicsResult,
    sync::{recv_or_shutdown, ShutdownSignal},
};

/// What one unloader iteration did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UnloadReport {
    pub egressed: usize,
    /// Sectors whose batch was written to the cache, sorted.
    pub finalized: Vec<SectorKey>,
    /// Egressed entities sent back to the core because their sector is live.
    pub requeued: usize,
    /// Egressed entities added to an already cached sector.
    pub appended: usize,
    pub broken: usize,
    pub collected: usize,
}

pub struct SectorUnloader {
    state: Arc<StreamingState>,
    shared: Arc<SharedMemory>,
    running: HashMap<SectorKey, EntityBatch>,
    iteration: u64,
}

impl SectorUnloader {
    pub fn new(state: Arc<StreamingState>, shared: Arc<SharedMemory>) -> Self {
        Self {
            state,
            shared,
            running: HashMap::new(),
            iteration: 0,
        }
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Entities collected for sectors that are still draining.
    pub fn running_entities(&self) -> usize {
        self.running.values().map(EntityBatch::len).sum()
    }

    /// Reads the published egress, sorts it into per-sector batches and
    /// moves the batches of drained sectors into the cache.
    pub fn unload(&mut self) -> PhysicsResult<UnloadReport> {
        let size = self.state.settings.sector_size;
        let mut report = UnloadReport::default();

        let (records, broken, collected) = {
            let back = self.shared.egress();
            if back.counts.is_empty() {
                (Vec::new(), Vec::new(), Vec::new())
            } else {
                (back.to_host(&back.counts.layers), back.broken.clone(), back.collected.clone())
            }
        };

        report.egressed = records.len();
        for record in records {
            let key = SectorKey::from_position(record.position, size);
            self.running.entry(key).or_default().push(record);
        }

        report.broken = broken.len();
        if !broken.is_empty() {
            let mut shards = EntityBatch::new();
            for object in &broken {
                shards.append(self.state.generator.shatter(object));
            }
            self.state.pending.lock().append(shards);
        }
        report.collected = collected.len();
        if !collected.is_empty() {
            self.state.collected.lock().extend(collected);
        }

        let mut table = self.state.table.lock();
        let mut cache = self.state.cache.lock();
        for key in table.unloading_since(self.iteration, self.state.settings.unload_delay) {
            let batch = self.running.remove(&key).unwrap_or_default();
            cache.put(key, batch, true);
            table.transition(key, SectorState::Unloaded, self.iteration);
            report.finalized.push(key);
        }

        for (key, batch) in std::mem::take(&mut self.running) {
            match table.state(key) {
                SectorState::Live | SectorState::Loading => {
                    report.requeued += batch.len();
                    self.state.pending.lock().append(batch);
                }
                SectorState::Unloaded => {
                    report.appended += batch.len();
                    cache.append(key, batch);
                }
                SectorState::Unloading => {
                    self.running.insert(key, batch);
                }
            }
        }

        self.iteration += 1;
        Ok(report)
    }

    /// Task body: waits for the loader's turn, unloads, then waits for the tick.
    pub fn run(mut self, deltas: Receiver<f32>, shutdown: ShutdownSignal) -> PhysicsResult<()> {
        loop {
            let _dt = recv_or_shutdown(&deltas, &shutdown, "dt")?;
            self.state.permit.acquire()?;
            let report = self.unload()?;
            if report != UnloadReport::default() {
                debug!(
                    "unloader {}: {} egressed, {} sectors cached, {} requeued, {} appended, {} broken",
                    self.iteration,
                    report.egressed,
                    report.finalized.len(),
                    report.requeued,
                    report.appended,
                    report.broken
                );
            }
            self.shared.barrier().wait()?;
        }
    }
}
