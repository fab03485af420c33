//! Sector streaming: the world is split into square sectors that are
//! generated or replayed from a host cache as they come into view, and
//! written back to the cache as they leave it.

pub mod cache;
pub mod controller;
pub mod generator;
pub mod loader;
pub mod sector;
pub mod unloader;

pub use cache::{CachedSector, SectorCache};
pub use controller::{SectorStreaming, StreamingSettings, StreamingState, UNLOAD_DELAY};
pub use generator::{SectorGenerator, TerrainGenerator};
pub use loader::{LoadReport, SectorLoader};
pub use sector::{SectorKey, SectorRange, SectorState, SectorTable};
pub use unloader::{SectorUnloader, UnloadReport};
