//! Sector keys, the sector range covering a view and the per-sector state
//! machine shared by the loader and the unloader.

use std::collections::HashMap;

use glam::Vec2;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::utils::math::Aabb;

/// Integer coordinate of one square sector of the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SectorKey {
    pub x: i32,
    pub y: i32,
}

impl SectorKey {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The sector containing `position`. Sector edges belong to the sector
    /// on their positive side.
    pub fn from_position(position: Vec2, sector_size: f32) -> Self {
        let cell = (position / sector_size).floor();
        Self {
            x: cell.x as i32,
            y: cell.y as i32,
        }
    }

    pub fn origin(self, sector_size: f32) -> Vec2 {
        Vec2::new(self.x as f32, self.y as f32) * sector_size
    }

    pub fn bounds(self, sector_size: f32) -> Aabb {
        let origin = self.origin(sector_size);
        Aabb::new(origin, origin + Vec2::splat(sector_size))
    }
}

/// Inclusive rectangle of sector keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRange {
    pub min: SectorKey,
    pub max: SectorKey,
}

impl SectorRange {
    /// Every sector touched by `view` grown by `padding` on each side.
    pub fn covering(view: &Aabb, padding: f32, sector_size: f32) -> Self {
        let padded = view.expand(padding);
        Self {
            min: SectorKey::from_position(padded.min, sector_size),
            max: SectorKey::from_position(padded.max, sector_size),
        }
    }

    pub fn contains(&self, key: SectorKey) -> bool {
        key.x >= self.min.x && key.x <= self.max.x && key.y >= self.min.y && key.y <= self.max.y
    }

    pub fn len(&self) -> usize {
        let width = (self.max.x - self.min.x + 1).max(0) as usize;
        let height = (self.max.y - self.min.y + 1).max(0) as usize;
        width * height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in row-major order.
    pub fn keys(&self) -> impl Iterator<Item = SectorKey> + '_ {
        (self.min.y..=self.max.y).flat_map(move |y| (self.min.x..=self.max.x).map(move |x| SectorKey::new(x, y)))
    }

    /// World-space area covered by the range; entities outside it egress.
    pub fn bounds(&self, sector_size: f32) -> Aabb {
        Aabb::new(
            self.min.origin(sector_size),
            self.max.origin(sector_size) + Vec2::splat(sector_size),
        )
    }
}

/// Lifecycle of one sector.
///
/// `Unloaded -> Loading -> Live -> Unloading -> Unloaded`. A sector that
/// re-enters range while its entities are still draining goes straight
/// back from `Unloading` to `Live`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SectorState {
    #[default]
    Unloaded,
    Loading,
    Live,
    Unloading,
}

impl SectorState {
    pub fn can_transition_to(self, next: SectorState) -> bool {
        use SectorState::*;
        matches!(
            (self, next),
            (Unloaded, Loading) | (Loading, Live) | (Live, Unloading) | (Unloading, Unloaded) | (Unloading, Live)
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct SectorEntry {
    state: SectorState,
    since: u64,
}

/// States of every sector that is not `Unloaded`.
#[derive(Debug, Default)]
pub struct SectorTable {
    entries: HashMap<SectorKey, SectorEntry>,
}

impl SectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: SectorKey) -> SectorState {
        self.entries.get(&key).map_or(SectorState::Unloaded, |entry| entry.state)
    }

    /// Moves `key` to `next` if the transition is legal. `iteration` stamps
    /// the time the sector entered its new state.
    pub fn transition(&mut self, key: SectorKey, next: SectorState, iteration: u64) -> bool {
        let current = self.state(key);
        if !current.can_transition_to(next) {
            return false;
        }
        debug!("sector ({}, {}): {current:?} -> {next:?}", key.x, key.y);
        if next == SectorState::Unloaded {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, SectorEntry { state: next, since: iteration });
        }
        true
    }

    /// Keys currently in `state`, sorted.
    pub fn in_state(&self, state: SectorState) -> Vec<SectorKey> {
        let mut keys: Vec<SectorKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == state)
            .map(|(key, _)| *key)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// `Unloading` sectors that entered that state at least `delay`
    /// iterations before `iteration`, sorted.
    pub fn unloading_since(&self, iteration: u64, delay: u64) -> Vec<SectorKey> {
        let mut keys: Vec<SectorKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.state == SectorState::Unloading && iteration.saturating_sub(entry.since) >= delay
            })
            .map(|(key, _)| *key)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Number of sectors that are not `Unloaded`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
