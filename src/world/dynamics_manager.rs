use crate::{
    config::PhysicsConfig,
    dynamics::{constraints::ConstraintMetrics, ConstraintSolver, Integrator},
};

#[derive(Debug, Clone)]
pub struct DynamicsManager {
    pub integrator: Integrator,
    pub constraints: ConstraintSolver,
    /// Metrics of the most recent constraint solve.
    pub last_metrics: ConstraintMetrics,
}

impl DynamicsManager {
    pub fn new(config: &PhysicsConfig) -> Self {
        Self {
            integrator: Integrator::from_config(config),
            constraints: ConstraintSolver::from_config(config),
            last_metrics: ConstraintMetrics::default(),
        }
    }
}
