//! # Strata Sim
//!
//! In-memory physics engine for Project Strata.
//!
//! This crate provides:
//! - Rigid bodies with positions only
//! - Resident terrains with conical excavation and soil particles
//! - A terrain pager loading tiles on its own thread
//! - Shovels with the engine's edge orientation rule

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod engine;
pub mod pager;
pub mod shovel;
pub mod terrain;
pub mod world;


/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::*;
    pub use crate::pager::*;
    pub use crate::shovel::*;
    pub use crate::terrain::*;
    pub use crate::world::*;
}

pub use prelude::*;
