use crate::{
    collision::{
        broadphase::{detect_candidates, update_bounds, BroadPhase},
        ccd::{detect_swept_contacts, SweptEdgeDetector},
        contact::Contact,
        grid::UniformGrid,
        narrowphase::detect_contacts,
    },
    config::PhysicsConfig,
    core::{layout::LayerCounts, soa::BufferGroup},
    gpu::ComputeContext,
    utils::math::Aabb,
};

/// Broad-phase grid and state plus the optional swept-edge pass.
#[derive(Debug)]
pub struct CollisionManager {
    /// Configured grid, centred on the view.
    view_grid: UniformGrid,
    /// Grid used by the broad phase: the view grid grown over the loaded area.
    pub grid: UniformGrid,
    pub broadphase: BroadPhase,
    pub ccd: SweptEdgeDetector,
    pub ccd_enabled: bool,
}

impl CollisionManager {
    pub fn new(config: &PhysicsConfig) -> Self {
        let grid = UniformGrid::from_config(config);
        Self {
            view_grid: grid.clone(),
            grid,
            broadphase: BroadPhase::new(config.max_candidates_per_hull),
            ccd: SweptEdgeDetector::new(config.ccd_displacement_ratio),
            ccd_enabled: config.ccd_enabled,
        }
    }

    pub fn set_view(&mut self, view: &Aabb) {
        self.view_grid.recenter(view.center());
        self.grid = self.view_grid.clone();
    }

    /// Grows the broad-phase grid so every hull inside `loaded` is keyed.
    pub fn cover_loaded(&mut self, loaded: Option<Aabb>) {
        self.grid = match loaded {
            Some(area) => self.view_grid.covering(&area),
            None => self.view_grid.clone(),
        };
    }

    /// Refreshes hull bounds and emits this sub-step's candidate pairs.
    pub fn broad_phase(&mut self, ctx: &ComputeContext, group: &mut BufferGroup, counts: &LayerCounts) -> usize {
        update_bounds(ctx, group, counts, &self.grid);
        detect_candidates(ctx, &mut self.broadphase, group, counts, &self.grid).len()
    }

    /// Separating-axis contacts for the candidates of the last broad phase,
    /// followed by the swept-edge contacts when CCD is enabled.
    pub fn narrow_phase(&self, ctx: &ComputeContext, group: &BufferGroup) -> Vec<Contact> {
        let pairs = self.broadphase.candidates();
        let mut contacts = detect_contacts(ctx, group, pairs);
        if self.ccd_enabled {
            contacts.extend(detect_swept_contacts(ctx, group, pairs, &self.ccd));
        }
        contacts
    }
}
