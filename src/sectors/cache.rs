//! Host-side cache of unloaded sectors with least-recently-used eviction.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use super::sector::SectorKey;
use crate::core::records::EntityBatch;

/// Cached content of one sector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedSector {
    pub batch: EntityBatch,
    /// False when the sector was never generated and only holds entities
    /// that drifted into it; loading it still runs the generator.
    pub complete: bool,
}

#[derive(Debug)]
struct Slot {
    sector: CachedSector,
    stamp: u64,
    records: usize,
}

/// Bounded map from sector key to cached batch. Eviction starts with the
/// least recently touched entry once either the entry limit or the record
/// limit is exceeded.
#[derive(Debug)]
pub struct SectorCache {
    slots: HashMap<SectorKey, Slot>,
    recency: BTreeMap<u64, SectorKey>,
    clock: u64,
    capacity: usize,
    max_records: usize,
    records: usize,
    evicted: u64,
}

fn record_count(batch: &EntityBatch) -> usize {
    batch.counts().total()
}

impl SectorCache {
    pub fn new(capacity: usize, max_records: usize) -> Self {
        Self {
            slots: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
            capacity: capacity.max(1),
            max_records,
            records: 0,
            evicted: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Records held across all entries, every layer included.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Entries dropped by eviction since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn contains(&self, key: SectorKey) -> bool {
        self.slots.contains_key(&key)
    }

    /// Looks up `key` and marks it most recently used.
    pub fn get(&mut self, key: SectorKey) -> Option<&CachedSector> {
        let stamp = self.next_stamp();
        let slot = self.slots.get_mut(&key)?;
        self.recency.remove(&slot.stamp);
        slot.stamp = stamp;
        self.recency.insert(stamp, key);
        Some(&slot.sector)
    }

    /// Replaces the entry for `key`.
    pub fn put(&mut self, key: SectorKey, batch: EntityBatch, complete: bool) {
        self.remove(key);
        self.insert(key, CachedSector { batch, complete });
        self.evict();
    }

    /// Adds `batch` to the entry for `key`, creating an incomplete entry when
    /// the sector is not cached.
    pub fn append(&mut self, key: SectorKey, batch: EntityBatch) {
        let sector = match self.remove(key) {
            Some(mut sector) => {
                sector.batch.append(batch);
                sector
            }
            None => CachedSector { batch, complete: false },
        };
        self.insert(key, sector);
        self.evict();
    }

    /// Removes and returns the entry for `key`.
    pub fn take(&mut self, key: SectorKey) -> Option<CachedSector> {
        self.remove(key)
    }

    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, key: SectorKey, sector: CachedSector) {
        let stamp = self.next_stamp();
        let records = record_count(&sector.batch);
        self.records += records;
        self.recency.insert(stamp, key);
        self.slots.insert(key, Slot { sector, stamp, records });
    }

    fn remove(&mut self, key: SectorKey) -> Option<CachedSector> {
        let slot = self.slots.remove(&key)?;
        self.recency.remove(&slot.stamp);
        self.records -= slot.records;
        Some(slot.sector)
    }

    // The most recent entry always survives.
    fn evict(&mut self) {
        while self.slots.len() > 1 && (self.slots.len() > self.capacity || self.records > self.max_records) {
            let Some((_, key)) = self.recency.pop_first() else {
                break;
            };
            if let Some(slot) = self.slots.remove(&key) {
                self.records -= slot.records;
                self.evicted += 1;
                debug!(
                    "evicted sector ({}, {}) with {} entities",
                    key.x,
                    key.y,
                    slot.sector.batch.len()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::shapes::ShapeBuilder;
    use glam::Vec2;

    fn blocks(n: usize) -> EntityBatch {
        (0..n)
            .map(|i| ShapeBuilder::block(Vec2::new(i as f32 * 10.0, 0.0), 2.0).build())
            .collect()
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = SectorCache::new(2, usize::MAX);
        cache.put(SectorKey::new(0, 0), blocks(1), true);
        cache.put(SectorKey::new(1, 0), blocks(1), true);
        assert!(cache.get(SectorKey::new(0, 0)).is_some());
        cache.put(SectorKey::new(2, 0), blocks(1), true);

        assert!(cache.contains(SectorKey::new(0, 0)));
        assert!(!cache.contains(SectorKey::new(1, 0)));
        assert!(cache.contains(SectorKey::new(2, 0)));
        assert_eq!(cache.evicted(), 1);
    }

    #[test]
    fn record_limit_bounds_memory() {
        // one block: 1 entity, 1 hull, 4 points, 6 edges
        let per_block = blocks(1).counts().total();
        let mut cache = SectorCache::new(16, per_block * 3);
        cache.put(SectorKey::new(0, 0), blocks(2), true);
        cache.put(SectorKey::new(1, 0), blocks(2), true);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.records(), per_block * 2);
    }

    #[test]
    fn append_creates_incomplete_entries() {
        let mut cache = SectorCache::new(4, usize::MAX);
        cache.append(SectorKey::new(5, 5), blocks(1));
        cache.append(SectorKey::new(5, 5), blocks(2));
        let entry = cache.take(SectorKey::new(5, 5)).unwrap();
        assert!(!entry.complete);
        assert_eq!(entry.batch.len(), 3);
        assert_eq!(cache.records(), 0);

        cache.put(SectorKey::new(1, 1), blocks(1), true);
        cache.append(SectorKey::new(1, 1), blocks(1));
        assert!(cache.get(SectorKey::new(1, 1)).unwrap().complete);
    }
}
