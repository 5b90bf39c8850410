//! # Strata Terrain
//!
//! Deformable terrain core for Project Strata.
//!
//! This crate handles:
//! - Bounds resolution aligned to the height source grid
//! - The height cache shared with the pager's loading thread
//! - Tile streaming around tracked bodies and shovels
//! - Per-step publication of height deltas and particles to render targets

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod bounds;
pub mod config;
pub mod controller;
pub mod grid;
pub mod height_cache;
pub mod native;
pub mod render;
pub mod shovel;
pub mod source;
pub mod streamer;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bounds::*;
    pub use crate::config::*;
    pub use crate::controller::*;
    pub use crate::grid::*;
    pub use crate::height_cache::*;
    pub use crate::native::*;
    pub use crate::render::*;
    pub use crate::shovel::*;
    pub use crate::source::*;
    pub use crate::streamer::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{DVec2, DVec3};
    use strata_common::Transform;

    #[test]
    fn test_bounds_to_grid() {
        let source = GridHeightSource::new(10, 10, DVec3::new(100.0, 100.0, 1.0), Transform::IDENTITY);
        let owner = Transform::from_translation(DVec3::new(500.0, 500.0, 0.0));
        let request = BoundsRequest {
            infinite: false,
            half_extent: DVec3::new(450.0, 450.0, 1000.0),
        };
        let bounds = resolve_grid_aligned_bounds(&source, &owner, &request).expect("valid");
        let grid = GridCoordinateMapper::new(&bounds, DVec2::splat(100.0)).expect("fits");
        assert_eq!(grid.num_vertices_x(), 9);
        assert_eq!(grid.num_vertices_y(), 9);
    }
}
