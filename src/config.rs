//! Global configuration constants and the runtime [`PhysicsConfig`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    core::layout::LayerCounts,
    error::{PhysicsError, PhysicsResult},
    gpu::DispatchMode,
};

/// Target simulation rate in ticks per second.
pub const TARGET_FPS: f32 = 24.0;

/// Duration of one simulation tick (in seconds).
pub const DEFAULT_TICK_RATE: f32 = 1.0 / TARGET_FPS;

/// Fixed sub-steps simulated per tick.
pub const DEFAULT_SUB_STEPS: u32 = 16;

/// Upper bound on sub-steps simulated by one call to `step`.
pub const DEFAULT_MAX_SUB_STEPS: u32 = 16;

/// Edge relaxation passes per sub-step.
pub const DEFAULT_EDGE_STEPS: u32 = 8;

/// Velocity retention factor applied by the Verlet integrator.
pub const DEFAULT_MOTION_DAMPING: f32 = 0.990;

/// Default gravity vector (Y-up).
pub const DEFAULT_GRAVITY: [f32; 2] = [0.0, -9.8 * 10.0 * TARGET_FPS];

/// Elements scanned by one block of the exclusive scan.
pub const DEFAULT_SCAN_BLOCK_SIZE: usize = 512;

/// Grid subdivisions along each axis of the broad-phase grid.
pub const DEFAULT_GRID_SUBDIVISIONS: [u32; 2] = [120, 120];

/// World-space extent covered by the broad-phase grid.
pub const DEFAULT_GRID_EXTENT: [f32; 2] = [4096.0, 4096.0];

/// Maximum number of cells a single bound may span along one axis.
pub const DEFAULT_MAX_KEY_SPAN: u32 = 8;

/// Fixed upper bound on candidate pairs emitted per hull.
pub const DEFAULT_MAX_CANDIDATES_PER_HULL: u32 = 64;

/// Ratio of per-tick displacement to edge length above which an edge is swept.
pub const DEFAULT_CCD_DISPLACEMENT_RATIO: f32 = 1.0;

/// Side length of one streaming sector in world units.
pub const DEFAULT_SECTOR_SIZE: f32 = 1024.0;

/// Number of unloaded sectors kept in the host-side cache.
pub const DEFAULT_SECTOR_CACHE_CAPACITY: usize = 256;

/// Total records (all layers) kept in the host-side cache before eviction.
pub const DEFAULT_SECTOR_CACHE_MAX_RECORDS: usize = 2_000_000;

/// Padding added around the view bounds before computing the live sector range.
pub const DEFAULT_VIEW_PADDING: f32 = 256.0;

/// Frame budget used for overrun warnings (milliseconds).
pub const DEFAULT_FRAME_BUDGET_MS: f32 = 1000.0 / TARGET_FPS;

/// Initial element capacity of a freshly created device buffer.
pub const DEFAULT_ITEM_CAPACITY: usize = 1024;

/// Growth stride for ordinary columns.
pub const DEFAULT_GROWTH_STRIDE: usize = 32_768;

/// Growth stride for 4x4 transform columns.
pub const WIDE_GROWTH_STRIDE: usize = 8_192;

/// Initial core buffer sizes.
pub const INITIAL_ENTITY_CAPACITY: usize = 10_000;
pub const INITIAL_HULL_CAPACITY: usize = 10_000;
pub const INITIAL_EDGE_CAPACITY: usize = 24_000;
pub const INITIAL_POINT_CAPACITY: usize = 50_000;

/// Runtime tunables. Every field defaults to the matching `DEFAULT_*` constant,
/// so a TOML file only has to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub tick_rate: f32,
    pub sub_steps: u32,
    pub max_sub_steps: u32,
    pub edge_steps: u32,
    pub motion_damping: f32,
    pub gravity: [f32; 2],
    pub constraint_stiffness: f32,

    pub scan_block_size: usize,
    pub dispatch: DispatchMode,

    pub grid_extent: [f32; 2],
    pub grid_subdivisions: [u32; 2],
    pub max_key_span: u32,
    pub max_candidates_per_hull: u32,

    pub ccd_enabled: bool,
    pub ccd_displacement_ratio: f32,

    pub sector_size: f32,
    pub sector_cache_capacity: usize,
    pub sector_cache_max_records: usize,
    pub view_padding: f32,

    pub frame_budget_ms: f32,

    /// Core buffer capacities reserved at startup: entity, hull, edge, point.
    pub initial_capacity: [usize; 4],
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            sub_steps: DEFAULT_SUB_STEPS,
            max_sub_steps: DEFAULT_MAX_SUB_STEPS,
            edge_steps: DEFAULT_EDGE_STEPS,
            motion_damping: DEFAULT_MOTION_DAMPING,
            gravity: DEFAULT_GRAVITY,
            constraint_stiffness: 1.0,
            scan_block_size: DEFAULT_SCAN_BLOCK_SIZE,
            dispatch: DispatchMode::Parallel,
            grid_extent: DEFAULT_GRID_EXTENT,
            grid_subdivisions: DEFAULT_GRID_SUBDIVISIONS,
            max_key_span: DEFAULT_MAX_KEY_SPAN,
            max_candidates_per_hull: DEFAULT_MAX_CANDIDATES_PER_HULL,
            ccd_enabled: true,
            ccd_displacement_ratio: DEFAULT_CCD_DISPLACEMENT_RATIO,
            sector_size: DEFAULT_SECTOR_SIZE,
            sector_cache_capacity: DEFAULT_SECTOR_CACHE_CAPACITY,
            sector_cache_max_records: DEFAULT_SECTOR_CACHE_MAX_RECORDS,
            view_padding: DEFAULT_VIEW_PADDING,
            frame_budget_ms: DEFAULT_FRAME_BUDGET_MS,
            initial_capacity: [
                INITIAL_ENTITY_CAPACITY,
                INITIAL_HULL_CAPACITY,
                INITIAL_EDGE_CAPACITY,
                INITIAL_POINT_CAPACITY,
            ],
        }
    }
}

impl PhysicsConfig {
    /// Parses a TOML document and validates the result.
    pub fn from_toml_str(source: &str) -> PhysicsResult<Self> {
        let config: PhysicsConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> PhysicsResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Core buffer capacities to reserve at startup.
    pub fn initial_counts(&self) -> LayerCounts {
        let [entities, hulls, edges, points] = self.initial_capacity;
        LayerCounts::new(
            points,
            edges,
            hulls,
            entities,
            DEFAULT_ITEM_CAPACITY,
            DEFAULT_ITEM_CAPACITY,
        )
    }

    /// Duration of one fixed sub-step.
    pub fn fixed_time_step(&self) -> f32 {
        self.tick_rate / self.sub_steps.max(1) as f32
    }

    pub fn validate(&self) -> PhysicsResult<()> {
        fn reject(field: &'static str, reason: &str) -> PhysicsResult<()> {
            Err(PhysicsError::InvalidConfig {
                field,
                reason: reason.to_string(),
            })
        }

        if !(self.tick_rate > 0.0) {
            return reject("tick_rate", "must be positive");
        }
        if self.sub_steps == 0 {
            return reject("sub_steps", "must be at least 1");
        }
        if self.scan_block_size < 2 {
            return reject("scan_block_size", "must be at least 2");
        }
        if self.grid_subdivisions.contains(&0) {
            return reject("grid_subdivisions", "must be non-zero on both axes");
        }
        if self.grid_extent.iter().any(|extent| !(*extent > 0.0)) {
            return reject("grid_extent", "must be positive on both axes");
        }
        if self.max_key_span == 0 {
            return reject("max_key_span", "must be at least 1");
        }
        if !(self.sector_size > 0.0) {
            return reject("sector_size", "must be positive");
        }
        if !(0.0..=1.0).contains(&self.motion_damping) {
            return reject("motion_damping", "must lie in [0, 1]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PhysicsConfig::from_toml_str("edge_steps = 4\nsector_size = 512.0\n")
            .expect("valid config");
        assert_eq!(config.edge_steps, 4);
        assert_eq!(config.sector_size, 512.0);
        assert_eq!(config.sub_steps, DEFAULT_SUB_STEPS);
        assert_eq!(config.dispatch, DispatchMode::Parallel);
    }

    #[test]
    fn rejects_zero_sub_steps() {
        let err = PhysicsConfig::from_toml_str("sub_steps = 0").unwrap_err();
        assert!(matches!(err, PhysicsError::InvalidConfig { field: "sub_steps", .. }));
    }

    #[test]
    fn dispatch_mode_parses_lowercase() {
        let config = PhysicsConfig::from_toml_str("dispatch = \"serial\"").expect("valid config");
        assert_eq!(config.dispatch, DispatchMode::Serial);
    }
}
