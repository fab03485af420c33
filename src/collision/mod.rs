//! Collision detection: scan primitive, spatial-hash broad phase, SAT narrow
//! phase, swept-edge CCD and contact reactions.

pub mod broadphase;
pub mod ccd;
pub mod contact;
pub mod grid;
pub mod narrowphase;
pub mod scan;
pub mod shapes;

pub use broadphase::{BoundsInput, BroadPhase, CandidatePair};
pub use ccd::SweptEdgeDetector;
pub use contact::{Contact, ContactKind, Reaction};
pub use grid::{KeySpan, UniformGrid};
pub use scan::ExclusiveScan;
pub use shapes::ShapeBuilder;
