//! # Strata Common
//!
//! Common types, utilities, and shared abstractions for Project Strata.
//!
//! This crate provides foundational types used across all Strata subsystems:
//! - Coordinate types (vertex, tile) and rigid transforms
//! - Handle types for engine-owned objects (bodies, shovels)
//! - The error taxonomy shared by the terrain core and its backends
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod ids;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::ids::*;
    pub use crate::transform::*;
}

pub use prelude::*;
