//! Render mirror: a snapshot of the core buffers that readers can hold
//! without blocking the simulation.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    core::{layout::LayerCounts, soa::BufferGroup},
    error::PhysicsResult,
};

/// Copy of the live core records as of the end of a sync window.
#[derive(Debug)]
pub struct RenderFrame {
    pub tick: u64,
    pub counts: LayerCounts,
    pub group: BufferGroup,
}

#[derive(Debug)]
pub struct RenderMirror {
    latest: RwLock<Arc<RenderFrame>>,
}

impl RenderMirror {
    pub fn new() -> PhysicsResult<Self> {
        Ok(Self {
            latest: RwLock::new(Arc::new(RenderFrame {
                tick: 0,
                counts: LayerCounts::default(),
                group: BufferGroup::new(&LayerCounts::default())?,
            })),
        })
    }

    /// Publishes the first `counts` records of `source`. The previous frame's
    /// allocation is reused unless a reader still holds it.
    pub fn commit(&self, tick: u64, source: &BufferGroup, counts: &LayerCounts) -> PhysicsResult<()> {
        let mut latest = self.latest.write();
        if let Some(frame) = Arc::get_mut(&mut latest) {
            frame.group.copy_from(source, counts)?;
            frame.tick = tick;
            frame.counts = *counts;
            return Ok(());
        }
        let mut group = BufferGroup::new(counts)?;
        group.copy_from(source, counts)?;
        *latest = Arc::new(RenderFrame {
            tick,
            counts: *counts,
            group,
        });
        Ok(())
    }

    /// The most recent frame. Holding it does not block commits.
    pub fn latest(&self) -> Arc<RenderFrame> {
        Arc::clone(&self.latest.read())
    }
}
