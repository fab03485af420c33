//! Multi-block exclusive prefix sum.
//!
//! Each block is scanned independently in a local scratch buffer with the
//! work-efficient up-sweep/down-sweep scheme. Block totals go to a partial
//! sums array, which is scanned by the same routine (recursing while it spans
//! more than one block), and the scanned partials are added back as per-block
//! base offsets. Inputs that fit in one block skip the second level.

use std::ops::Add;

use rayon::prelude::*;

use crate::gpu::DispatchMode;

/// Values the scan can sum. Integer addition keeps the result independent of
/// block size and dispatch mode.
pub trait ScanValue: Copy + Default + Send + Sync + Add<Output = Self> {}

impl<T> ScanValue for T where T: Copy + Default + Send + Sync + Add<Output = T> {}

#[derive(Debug, Clone)]
pub struct ExclusiveScan {
    block_size: usize,
    mode: DispatchMode,
}

impl ExclusiveScan {
    /// `block_size` is rounded up to a power of two, minimum 2.
    pub fn new(block_size: usize, mode: DispatchMode) -> Self {
        Self {
            block_size: block_size.max(2).next_power_of_two(),
            mode,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks needed for `len` elements.
    pub fn work_group_count(&self, len: usize) -> usize {
        len.div_ceil(self.block_size)
    }

    /// Replaces `data[i]` with the sum of `data[..i]` and returns the total.
    pub fn scan_in_place<T: ScanValue>(&self, data: &mut [T]) -> T {
        match self.work_group_count(data.len()) {
            0 => T::default(),
            1 => scan_block(data),
            _ => self.scan_multi_block(data),
        }
    }

    /// Writes the exclusive scan of `input` into `output` and returns the total.
    pub fn scan<T: ScanValue>(&self, input: &[T], output: &mut [T]) -> T {
        debug_assert_eq!(input.len(), output.len());
        output.copy_from_slice(input);
        self.scan_in_place(output)
    }

    fn scan_multi_block<T: ScanValue>(&self, data: &mut [T]) -> T {
        let mut partials: Vec<T> = match self.mode {
            DispatchMode::Parallel => data
                .par_chunks_mut(self.block_size)
                .map(scan_block::<T>)
                .collect(),
            DispatchMode::Serial => data
                .chunks_mut(self.block_size)
                .map(scan_block::<T>)
                .collect(),
        };

        let total = self.scan_in_place(&mut partials);

        let complete = |(block, base): (&mut [T], &T)| {
            for value in block.iter_mut() {
                *value = *base + *value;
            }
        };
        match self.mode {
            DispatchMode::Parallel => data
                .par_chunks_mut(self.block_size)
                .zip(partials.par_iter())
                .for_each(complete),
            DispatchMode::Serial => data
                .chunks_mut(self.block_size)
                .zip(partials.iter())
                .for_each(complete),
        }
        total
    }
}

/// Scans one block in a power-of-two local buffer and returns its total.
fn scan_block<T: ScanValue>(block: &mut [T]) -> T {
    let len = block.len();
    if len == 0 {
        return T::default();
    }
    let size = len.next_power_of_two();
    let mut local = vec![T::default(); size];
    local[..len].copy_from_slice(block);

    let mut offset = 1;
    while offset < size {
        let step = offset * 2;
        let mut i = step - 1;
        while i < size {
            local[i] = local[i - offset] + local[i];
            i += step;
        }
        offset = step;
    }

    let total = local[size - 1];
    local[size - 1] = T::default();

    let mut offset = size / 2;
    while offset >= 1 {
        let step = offset * 2;
        let mut i = step - 1;
        while i < size {
            let left = local[i - offset];
            local[i - offset] = local[i];
            local[i] = local[i] + left;
            i += step;
        }
        offset /= 2;
    }

    block.copy_from_slice(&local[..len]);
    total
}
