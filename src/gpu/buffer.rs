use std::fmt;

use bytemuck::Pod;
use log::debug;

use crate::{
    config::DEFAULT_ITEM_CAPACITY,
    error::{PhysicsError, PhysicsResult},
};

/// Identity of a live allocation as seen by a bound kernel.
///
/// `generation` changes every time the backing allocation is replaced, so a
/// kernel can tell whether its binding is current.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle {
    pub label: &'static str,
    pub generation: u32,
    pub capacity: usize,
}

type Rebind = Box<dyn Fn(BufferHandle) + Send + Sync>;

/// A growable, type-tagged column of fixed-size elements.
pub struct DeviceBuffer<T: Pod> {
    label: &'static str,
    stride: usize,
    generation: u32,
    data: Vec<T>,
    consumers: Vec<Rebind>,
}

impl<T: Pod> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("label", &self.label)
            .field("capacity", &self.data.len())
            .field("stride", &self.stride)
            .field("generation", &self.generation)
            .field("consumers", &self.consumers.len())
            .finish()
    }
}

impl<T: Pod> DeviceBuffer<T> {
    /// Allocates a zeroed buffer holding at least `capacity` elements.
    pub fn new(label: &'static str, stride: usize, capacity: usize) -> PhysicsResult<Self> {
        let mut buffer = Self {
            label,
            stride: stride.max(1),
            generation: 0,
            data: Vec::new(),
            consumers: Vec::new(),
        };
        buffer.allocate(capacity.max(DEFAULT_ITEM_CAPACITY))?;
        Ok(buffer)
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn handle(&self) -> BufferHandle {
        BufferHandle {
            label: self.label,
            generation: self.generation,
            capacity: self.data.len(),
        }
    }

    /// Grows the allocation so that index `required - 1` is addressable.
    ///
    /// Returns `true` when a reallocation happened. Existing elements keep
    /// their indices, the new tail is zeroed and every registered consumer is
    /// rebound to the new allocation. Never shrinks.
    pub fn ensure_capacity(&mut self, required: usize) -> PhysicsResult<bool> {
        if required <= self.data.len() {
            return Ok(false);
        }
        let target = required.div_ceil(self.stride) * self.stride;
        self.allocate(target)?;
        Ok(true)
    }

    fn allocate(&mut self, capacity: usize) -> PhysicsResult<()> {
        let mut next: Vec<T> = Vec::new();
        next.try_reserve_exact(capacity)
            .map_err(|_| PhysicsError::DeviceAllocation {
                label: self.label,
                requested: capacity,
            })?;
        next.extend_from_slice(&self.data);
        next.resize(capacity, T::zeroed());

        let previous = self.data.len();
        self.data = next;
        self.generation = self.generation.wrapping_add(1);
        if previous > 0 {
            debug!("{}: grew {} -> {} elements", self.label, previous, capacity);
        }

        let handle = self.handle();
        for rebind in &self.consumers {
            rebind(handle);
        }
        Ok(())
    }

    /// Registers a consumer that is bound now and rebound after every growth.
    pub fn register<F>(&mut self, rebind: F)
    where
        F: Fn(BufferHandle) + Send + Sync + 'static,
    {
        rebind(self.handle());
        self.consumers.push(Box::new(rebind));
    }

    /// Zeroes every element.
    pub fn clear(&mut self) {
        bytemuck::cast_slice_mut::<T, u8>(&mut self.data).fill(0);
    }

    /// Sets every byte to `0xFF`, i.e. `-1` for signed integer columns.
    pub fn fill_negative(&mut self) {
        bytemuck::cast_slice_mut::<T, u8>(&mut self.data).fill(0xFF);
    }

    /// Copies at most `count` elements starting at `offset` back to the host.
    pub fn read_back(&self, offset: usize, count: usize) -> Vec<T> {
        let start = offset.min(self.data.len());
        let end = offset.saturating_add(count).min(self.data.len());
        self.data[start..end].to_vec()
    }

    /// Replaces this buffer's first `count` elements with `source`'s.
    pub fn copy_from(&mut self, source: &DeviceBuffer<T>, count: usize) -> PhysicsResult<()> {
        let count = count.min(source.capacity());
        self.ensure_capacity(count)?;
        self.data[..count].copy_from_slice(&source.data[..count]);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.data.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: T) {
        debug_assert!(index < self.data.len(), "{} index {index} out of capacity", self.label);
        if let Some(slot) = self.data.get_mut(index) {
            *slot = value;
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}
