//! Procedural height source for the demo.

use glam::DVec3;
use noise::{NoiseFn, Perlin};
use strata_common::Transform;
use strata_terrain::GridHeightSource;

use crate::config::LandscapeConfig;

/// Builds a rolling landscape from two octaves of Perlin noise.
///
/// Heights lie in `[0, height_scale]`. The source frame is the identity, so
/// the landscape covers `[0, num_quads * cell_size]` on both axes.
#[must_use]
pub fn build_landscape(config: &LandscapeConfig) -> GridHeightSource {
    let base = Perlin::new(config.seed);
    let detail = Perlin::new(config.seed.wrapping_add(1));
    let scale = config.terrain_scale;
    let cell = config.cell_size;

    GridHeightSource::from_fn(
        config.num_quads_x,
        config.num_quads_y,
        DVec3::new(cell, cell, 1.0),
        Transform::IDENTITY,
        |x, y| {
            let wx = x as f64 * cell / scale;
            let wy = y as f64 * cell / scale;
            let height = base.get([wx, wy]) + detail.get([wx * 4.0, wy * 4.0]) * 0.1;
            // Normalize to 0-1
            let normalized = ((height + 1.1) / 2.2).clamp(0.0, 1.0);
            (normalized * config.height_scale) as f32
        },
    )
}

/// Centre of the landscape in world space.
#[must_use]
pub fn landscape_center(config: &LandscapeConfig) -> DVec3 {
    DVec3::new(
        config.num_quads_x as f64 * config.cell_size * 0.5,
        config.num_quads_y as f64 * config.cell_size * 0.5,
        0.0,
    )
}
