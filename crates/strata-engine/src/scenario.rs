//! Scripted digging run.
//!
//! A body drives in a circle around the terrain centre and cuts into the
//! soil every tick. The terrain is published to in-memory render targets.

use std::sync::Arc;

use anyhow::{Context, Result};
use glam::DVec3;
use strata_common::Transform;
use strata_sim::SimEngine;
use strata_terrain::{
    EdgeLine, EndPlayReason, MemoryRenderTarget, PixelFormat, ShovelDesc, TerrainSyncController,
};
use tracing::{debug, info};

use crate::config::DemoConfig;
use crate::landscape::{build_landscape, landscape_center};

/// Totals of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScenarioSummary {
    /// Ticks simulated
    pub ticks: u32,
    /// Displacement cells republished over all ticks
    pub modified_cells: usize,
    /// Most particles rendered in one tick
    pub peak_particles: usize,
    /// Most tiles resident after one tick
    pub peak_loaded_tiles: usize,
}

/// Runs the scenario and tears the terrain down.
pub fn run(config: &DemoConfig) -> Result<ScenarioSummary> {
    let engine = SimEngine::new();
    let source = Arc::new(build_landscape(&config.landscape));
    let center = landscape_center(&config.landscape);
    let scenario = &config.scenario;

    let start = center + DVec3::X * scenario.path_radius;
    let digger = engine.create_body(start);

    let mut controller = TerrainSyncController::new(config.terrain.clone());
    controller.set_height_source(source);
    controller.set_owner_transform(Transform::from_translation(center));
    controller.add_tracked_body_with_defaults(digger);
    let mut shovel = ShovelDesc::new(
        digger,
        EdgeLine::new(DVec3::new(0.0, 1.0, 1.0), DVec3::new(0.0, -1.0, 1.0)),
        EdgeLine::new(DVec3::new(0.0, 1.0, 0.0), DVec3::new(0.0, -1.0, 0.0)),
        DVec3::X,
    );
    shovel.properties.required_radius = config.terrain.paging.default_required_radius;
    shovel.properties.preload_radius = config.terrain.paging.default_preload_radius;
    controller.add_shovel(shovel);

    let displacement = MemoryRenderTarget::new(PixelFormat::R16F, 1, 1);
    let particles = MemoryRenderTarget::new(PixelFormat::Rgba32F, 1, 1);
    controller.set_displacement_target(Box::new(displacement.clone()));
    controller.set_particle_target(Box::new(particles));

    controller
        .initialize(&engine)
        .context("Failed to initialize the terrain")?;
    if let Some((x, y)) = controller.num_vertices() {
        info!(
            "Terrain ready: {x} x {y} vertices, paged: {}, shovels: {}",
            controller.is_paged(),
            controller.shovel_count()
        );
    }

    let mut rng = fastrand::Rng::with_seed(u64::from(config.landscape.seed));
    let mut summary = ScenarioSummary::default();
    for tick in 0..scenario.ticks {
        let angle = f64::from(tick) * scenario.angular_speed;
        let sideways = (rng.f64() - 0.5) * 2.0 * scenario.jitter;
        let radius = scenario.path_radius + sideways;
        let position = center + DVec3::new(angle.cos(), angle.sin(), 0.0) * radius;
        engine.set_body_position(digger, position);
        engine.excavate(position, scenario.excavation_radius, scenario.excavation_depth);

        let report = engine.step();
        let stats = controller.step_sync();

        summary.ticks += 1;
        summary.modified_cells += stats.modified_cells;
        summary.peak_particles = summary.peak_particles.max(stats.particles);
        summary.peak_loaded_tiles = summary.peak_loaded_tiles.max(report.loaded_tiles);

        debug!(
            "Tick {tick}: {} vertices deformed, {} cells published",
            report.deformed_vertices, stats.modified_cells
        );
        if scenario.log_interval > 0 && (tick + 1) % scenario.log_interval == 0 {
            info!(
                "Tick {}: {} cells published so far, {} tiles loaded, {} particles",
                tick + 1,
                summary.modified_cells,
                report.loaded_tiles,
                stats.particles
            );
        }
    }

    controller.end_play(EndPlayReason::Destroyed);
    info!(
        "Scenario finished after {} ticks: {} cells published, peak {} tiles, peak {} particles, {} display updates",
        summary.ticks,
        summary.modified_cells,
        summary.peak_loaded_tiles,
        summary.peak_particles,
        displacement.update_count()
    );
    Ok(summary)
}
