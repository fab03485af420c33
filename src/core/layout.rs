//! Layer identities, range tables, per-layer counters and flag bits.

use std::ops::{Index, IndexMut};

use glam::IVec2;
use serde::{Deserialize, Serialize};

/// The parallel record layers of a buffer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    Point,
    Edge,
    Hull,
    Entity,
    HullBone,
    EntityBone,
}

impl Layer {
    pub const ALL: [Layer; 6] = [
        Layer::Point,
        Layer::Edge,
        Layer::Hull,
        Layer::Entity,
        Layer::HullBone,
        Layer::EntityBone,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Inclusive `(start, end)` slice of a child layer. Empty when `end < start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: i32,
    pub end: i32,
}

impl Default for Range {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Range {
    pub const EMPTY: Range = Range { start: 0, end: -1 };

    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    /// Range of `len` records starting at `start`.
    pub fn with_len(start: usize, len: usize) -> Self {
        if len == 0 {
            return Self::EMPTY;
        }
        Self {
            start: start as i32,
            end: (start + len) as i32 - 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start + 1) as usize
        }
    }

    pub fn contains(&self, index: i32) -> bool {
        index >= self.start && index <= self.end
    }

    /// Shifts both ends; empty ranges stay canonical.
    pub fn offset(self, by: i32) -> Self {
        if self.is_empty() {
            return Self::EMPTY;
        }
        Self {
            start: self.start + by,
            end: self.end + by,
        }
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        if self.is_empty() {
            0..0
        } else {
            self.start as usize..self.end as usize + 1
        }
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        !self.is_empty() && !other.is_empty() && self.start <= other.end && other.start <= self.end
    }
}

impl From<IVec2> for Range {
    fn from(value: IVec2) -> Self {
        Self {
            start: value.x,
            end: value.y,
        }
    }
}

impl From<Range> for IVec2 {
    fn from(value: Range) -> Self {
        IVec2::new(value.start, value.end)
    }
}

/// One counter per layer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerCounts {
    counts: [usize; 6],
}

impl LayerCounts {
    pub fn new(
        points: usize,
        edges: usize,
        hulls: usize,
        entities: usize,
        hull_bones: usize,
        entity_bones: usize,
    ) -> Self {
        Self {
            counts: [points, edges, hulls, entities, hull_bones, entity_bones],
        }
    }

    pub fn points(&self) -> usize {
        self[Layer::Point]
    }

    pub fn edges(&self) -> usize {
        self[Layer::Edge]
    }

    pub fn hulls(&self) -> usize {
        self[Layer::Hull]
    }

    pub fn entities(&self) -> usize {
        self[Layer::Entity]
    }

    pub fn hull_bones(&self) -> usize {
        self[Layer::HullBone]
    }

    pub fn entity_bones(&self) -> usize {
        self[Layer::EntityBone]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn added(&self, other: &LayerCounts) -> LayerCounts {
        let mut out = *self;
        for layer in Layer::ALL {
            out[layer] += other[layer];
        }
        out
    }

    pub fn saturating_sub(&self, other: &LayerCounts) -> LayerCounts {
        let mut out = *self;
        for layer in Layer::ALL {
            out[layer] = out[layer].saturating_sub(other[layer]);
        }
        out
    }
}

impl Index<Layer> for LayerCounts {
    type Output = usize;

    fn index(&self, layer: Layer) -> &usize {
        &self.counts[layer.index()]
    }
}

impl IndexMut<Layer> for LayerCounts {
    fn index_mut(&mut self, layer: Layer) -> &mut usize {
        &mut self.counts[layer.index()]
    }
}

/// Per-tick egress contract: six layer counts plus broken and collected objects.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressCounts {
    pub layers: LayerCounts,
    pub broken: usize,
    pub collected: usize,
}

impl EgressCounts {
    /// Counter slots in their fixed order: entity, hull, point, edge,
    /// hull-bone, entity-bone, broken, collected.
    pub fn to_array(&self) -> [usize; 8] {
        [
            self.layers.entities(),
            self.layers.hulls(),
            self.layers.points(),
            self.layers.edges(),
            self.layers.hull_bones(),
            self.layers.entity_bones(),
            self.broken,
            self.collected,
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.broken == 0 && self.collected == 0
    }
}

pub mod point_flags {
    /// Never moved by integration, constraints or reactions.
    pub const STATIC: u32 = 1 << 0;
    /// Held in place by gameplay; constraints push only the other end.
    pub const PINNED: u32 = 1 << 1;
    /// Touched by a contact during the last sub-step.
    pub const HIT: u32 = 1 << 2;
    /// Ignores gravity.
    pub const NO_GRAVITY: u32 = 1 << 3;
}

pub mod edge_flags {
    /// Internal bracing edge; not a separating axis.
    pub const INTERIOR: u32 = 1 << 0;
}

pub mod hull_flags {
    pub const IS_POLYGON: u32 = 1 << 0;
    pub const IS_CIRCLE: u32 = 1 << 1;
    pub const IS_STATIC: u32 = 1 << 2;
    pub const NO_COLLISION: u32 = 1 << 3;
    /// Set by the bounds pass when the hull lies outside the broad-phase grid.
    pub const OUT_OF_BOUNDS: u32 = 1 << 4;
}

pub mod entity_flags {
    pub const STATIC: u32 = 1 << 0;
    /// Outside the loaded sector area; egresses at the end of the tick.
    pub const SECTOR_OUT: u32 = 1 << 1;
    pub const BROKEN: u32 = 1 << 2;
    pub const COLLECTED: u32 = 1 << 3;
    pub const DELETED: u32 = 1 << 4;
    /// Never egresses (the player, for example).
    pub const NO_EGRESS: u32 = 1 << 5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_range_is_canonical() {
        assert!(Range::EMPTY.is_empty());
        assert_eq!(Range::with_len(7, 0), Range::EMPTY);
        assert_eq!(Range::EMPTY.offset(40), Range::EMPTY);
        assert_eq!(Range::EMPTY.indices().len(), 0);
    }

    #[test]
    fn inclusive_length() {
        let range = Range::with_len(10, 4);
        assert_eq!(range, Range::new(10, 13));
        assert_eq!(range.len(), 4);
        assert!(range.contains(13));
        assert!(!range.contains(14));
        assert_eq!(range.offset(5).indices(), 15..19);
    }

    #[test]
    fn egress_slots_follow_contract_order() {
        let counts = EgressCounts {
            layers: LayerCounts::new(3, 4, 2, 1, 5, 6),
            broken: 7,
            collected: 8,
        };
        assert_eq!(counts.to_array(), [1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
