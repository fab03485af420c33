//! Core memory model: layer layout, structure-of-arrays buffers, host
//! records and the lifecycle kernels that move entity trees between them.

pub mod compact;
pub mod egress;
pub mod layout;
pub mod lifecycle;
pub mod memory;
pub mod records;
pub mod soa;

pub use layout::{EgressCounts, Layer, LayerCounts, Range};
pub use lifecycle::{EntityInfo, SectorInput};
pub use memory::{CoreMemory, SharedMemory, SyncReport};
pub use records::{
    BrokenObject, CollectedObject, EdgeRecord, EntityBatch, EntityBoneRecord, EntityRecord,
    HullBoneRecord, HullRecord, PointRecord,
};
pub use soa::BufferGroup;
