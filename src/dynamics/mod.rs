//! Simulation dynamics: Verlet integration, edge constraints and the
//! hull/entity resolve passes.

pub mod constraints;
pub mod integrator;

pub use constraints::{ConstraintMetrics, ConstraintSolver};
pub use integrator::{clear_accel, resolve_entities, resolve_hulls, Integrator};
