//! Device-memory model and compute dispatch.
//!
//! Kernels run as data-parallel passes over host-resident columns. The
//! [`ComputeContext`] is the explicit context object every pass receives: it
//! selects the dispatch mode and owns the shared exclusive-scan primitive.

pub mod buffer;
pub mod kernel;

pub use buffer::{BufferHandle, DeviceBuffer};
pub use kernel::{KernelArgs, KernelBinding};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{collision::scan::ExclusiveScan, config::PhysicsConfig};

/// How kernel passes are dispatched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Every pass runs on the calling thread.
    Serial,
    /// Passes are spread over the rayon pool.
    #[default]
    Parallel,
}

/// Explicit context handed to every compute pass.
#[derive(Debug, Clone)]
pub struct ComputeContext {
    mode: DispatchMode,
    scan: ExclusiveScan,
}

impl Default for ComputeContext {
    fn default() -> Self {
        Self::from_config(&PhysicsConfig::default())
    }
}

impl ComputeContext {
    pub fn new(mode: DispatchMode, scan_block_size: usize) -> Self {
        Self {
            mode,
            scan: ExclusiveScan::new(scan_block_size, mode),
        }
    }

    pub fn from_config(config: &PhysicsConfig) -> Self {
        Self::new(config.dispatch, config.scan_block_size)
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: DispatchMode) {
        self.mode = mode;
        self.scan = ExclusiveScan::new(self.scan.block_size(), mode);
    }

    /// The exclusive scan shared by every compaction in the pipeline.
    pub fn scan(&self) -> &ExclusiveScan {
        &self.scan
    }

    /// Runs `kernel` once per element, passing the element index.
    pub fn for_each_mut<T, F>(&self, data: &mut [T], kernel: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        match self.mode {
            DispatchMode::Parallel => data
                .par_iter_mut()
                .enumerate()
                .for_each(|(index, item)| kernel(index, item)),
            DispatchMode::Serial => data
                .iter_mut()
                .enumerate()
                .for_each(|(index, item)| kernel(index, item)),
        }
    }

    /// Runs `kernel` once per index in `0..count`.
    pub fn for_each<F>(&self, count: usize, kernel: F)
    where
        F: Fn(usize) + Sync + Send,
    {
        match self.mode {
            DispatchMode::Parallel => (0..count).into_par_iter().for_each(kernel),
            DispatchMode::Serial => (0..count).for_each(kernel),
        }
    }

    /// Runs `kernel` for `0..count` and collects the results in index order.
    pub fn map<T, F>(&self, count: usize, kernel: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match self.mode {
            DispatchMode::Parallel => (0..count).into_par_iter().map(kernel).collect(),
            DispatchMode::Serial => (0..count).map(kernel).collect(),
        }
    }

    /// Like [`ComputeContext::map`] but drops `None` results, preserving order.
    pub fn filter_map<T, F>(&self, count: usize, kernel: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> Option<T> + Sync + Send,
    {
        match self.mode {
            DispatchMode::Parallel => (0..count).into_par_iter().filter_map(kernel).collect(),
            DispatchMode::Serial => (0..count).filter_map(kernel).collect(),
        }
    }

    /// Flattens per-index result lists into one ordered list.
    pub fn flat_map<T, F>(&self, count: usize, kernel: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> Vec<T> + Sync + Send,
    {
        match self.mode {
            DispatchMode::Parallel => (0..count).into_par_iter().flat_map_iter(kernel).collect(),
            DispatchMode::Serial => (0..count).flat_map(kernel).collect(),
        }
    }
}

/// Splits `data` into consecutive disjoint slices of the given lengths.
pub(crate) fn split_by_counts<'a, T>(mut data: &'a mut [T], counts: &[u32]) -> Vec<&'a mut [T]> {
    let mut parts = Vec::with_capacity(counts.len());
    for &count in counts {
        let (head, tail) = std::mem::take(&mut data).split_at_mut(count as usize);
        parts.push(head);
        data = tail;
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_by_counts_partitions_in_order() {
        let mut data = [1, 2, 3, 4, 5, 6];
        let parts = split_by_counts(&mut data, &[2, 0, 3, 1]);
        assert_eq!(parts.len(), 4);
        assert_eq!(&*parts[0], &[1, 2]);
        assert!(parts[1].is_empty());
        assert_eq!(&*parts[2], &[3, 4, 5]);
        assert_eq!(&*parts[3], &[6]);
    }

    #[test]
    fn serial_and_parallel_map_agree() {
        let serial = ComputeContext::new(DispatchMode::Serial, 4);
        let parallel = ComputeContext::new(DispatchMode::Parallel, 4);
        let kernel = |i: usize| (i % 3 == 0).then_some(i * 2);
        assert_eq!(serial.filter_map(50, kernel), parallel.filter_map(50, kernel));
    }
}
