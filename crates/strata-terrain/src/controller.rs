//! Per-step terrain synchronization.
//!
//! [`TerrainSyncController`] allocates the engine terrain (and pager when
//! paging), and once per tick publishes height deltas, particles and
//! material bindings to the render side.

use std::sync::Arc;

use glam::{DVec2, DVec3};
use strata_common::{BodyHandle, ConfigError, StrataResult, TileId, Transform, VertexCoord};
use tracing::{debug, error, info, warn};

use crate::bounds::{resolve_grid_aligned_bounds, resolve_user_bounds, BoundsSpec};
use crate::config::TerrainConfig;
use crate::grid::GridCoordinateMapper;
use crate::height_cache::HeightCache;
use crate::native::{
    NativeShovel, NativeTerrain, PagerParams, ParticleData, PhysicsEngine, TerrainAllocation,
};
use crate::render::{
    DisplacementMap, MaterialBindings, MaterialParameterSink, ParticleTexture, RenderTarget,
};
use crate::shovel::{apply_excavation_settings, attach_with_edge_fallback, ShovelDesc};
use crate::source::HeightSampleSource;
use crate::streamer::{
    enforce_paging_exclusivity, TerrainTileStreamer, TileHeightProvider, TrackedBody,
};

/// Why play is ending for the terrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndPlayReason {
    /// The terrain itself is destroyed
    Destroyed,
    /// The level is being replaced
    LevelTransition,
    /// An editor play session stopped
    EndPlayInEditor,
    /// The terrain was removed from a live world
    RemovedFromWorld,
    /// The application is quitting
    Quit,
}

impl EndPlayReason {
    /// True if the terrain must release its engine objects itself. For the
    /// other reasons the whole simulation is torn down anyway.
    #[must_use]
    pub const fn tears_down(self) -> bool {
        matches!(self, Self::Destroyed | Self::RemovedFromWorld)
    }
}

/// Which engine objects exist.
pub enum NativeState {
    /// Nothing allocated
    NoNative,
    /// A single resident terrain
    Terrain {
        /// Engine terrain
        terrain: Box<dyn NativeTerrain>,
    },
    /// A paged terrain. The streamer is declared first so it is released
    /// before the template terrain it references.
    Paged {
        /// Pager and its height callback
        streamer: TerrainTileStreamer,
        /// Template terrain
        terrain: Box<dyn NativeTerrain>,
    },
}

impl NativeState {
    /// True unless [`NativeState::NoNative`].
    #[must_use]
    pub const fn has_native(&self) -> bool {
        !matches!(self, Self::NoNative)
    }

    /// True for [`NativeState::Paged`].
    #[must_use]
    pub const fn is_paged(&self) -> bool {
        matches!(self, Self::Paged { .. })
    }

    /// The engine terrain, paged or not.
    #[must_use]
    pub fn terrain(&self) -> Option<&dyn NativeTerrain> {
        match self {
            Self::NoNative => None,
            Self::Terrain { terrain } | Self::Paged { terrain, .. } => Some(terrain.as_ref()),
        }
    }

    /// The streamer, when paging.
    #[must_use]
    pub const fn streamer(&self) -> Option<&TerrainTileStreamer> {
        match self {
            Self::Paged { streamer, .. } => Some(streamer),
            _ => None,
        }
    }
}

impl std::fmt::Debug for NativeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoNative => write!(f, "NoNative"),
            Self::Terrain { .. } => write!(f, "Terrain"),
            Self::Paged { .. } => write!(f, "Paged"),
        }
    }
}

/// Summary of one [`TerrainSyncController::step_sync`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
    /// Cells whose delta was republished
    pub modified_cells: usize,
    /// Particles packed
    pub particles: usize,
    /// Displacement buffer was pushed
    pub displacement_pushed: bool,
    /// Particle buffer was pushed
    pub particles_pushed: bool,
}

/// Keeps an engine terrain and the render side in sync with a height source.
pub struct TerrainSyncController {
    config: TerrainConfig,
    owner: Transform,
    source: Option<Arc<dyn HeightSampleSource>>,
    shovel_descs: Vec<ShovelDesc>,
    pending_bodies: Vec<TrackedBody>,

    state: NativeState,
    shovels: Vec<Box<dyn NativeShovel>>,
    grid: Option<GridCoordinateMapper>,
    cache: Arc<HeightCache>,

    displacement: DisplacementMap,
    displacement_target: Option<Box<dyn RenderTarget>>,
    render_displacement: bool,
    particles: Option<ParticleTexture>,
    particle_target: Option<Box<dyn RenderTarget>>,
    render_particles: bool,
    material_sink: Option<Box<dyn MaterialParameterSink>>,
    scratch: Vec<f32>,
}

impl TerrainSyncController {
    /// Creates an uninitialized controller.
    #[must_use]
    pub fn new(config: TerrainConfig) -> Self {
        Self {
            config,
            owner: Transform::IDENTITY,
            source: None,
            shovel_descs: Vec::new(),
            pending_bodies: Vec::new(),
            state: NativeState::NoNative,
            shovels: Vec::new(),
            grid: None,
            cache: Arc::new(HeightCache::new()),
            displacement: DisplacementMap::default(),
            displacement_target: None,
            render_displacement: false,
            particles: None,
            particle_target: None,
            render_particles: false,
            material_sink: None,
            scratch: Vec::new(),
        }
    }

    /// Sets the height source the terrain is derived from.
    pub fn set_height_source(&mut self, source: Arc<dyn HeightSampleSource>) {
        self.source = Some(source);
    }

    /// Sets the owner transform. Only the translation is used.
    pub fn set_owner_transform(&mut self, owner: Transform) {
        self.owner = owner;
    }

    /// Sets the `R16F` target receiving height deltas.
    pub fn set_displacement_target(&mut self, target: Box<dyn RenderTarget>) {
        self.displacement_target = Some(target);
    }

    /// Sets the `RGBA32F` target receiving particles.
    pub fn set_particle_target(&mut self, target: Box<dyn RenderTarget>) {
        self.particle_target = Some(target);
    }

    /// Sets the receiver of material parameters.
    pub fn set_material_sink(&mut self, sink: Box<dyn MaterialParameterSink>) {
        self.material_sink = Some(sink);
    }

    /// Adds a shovel, created when the terrain is initialized.
    pub fn add_shovel(&mut self, desc: ShovelDesc) {
        if self.state.has_native() {
            warn!("Shovel added after initialization, it is used from the next initialization");
        }
        self.shovel_descs.push(desc);
    }

    /// Adds a body to track while paging, registered whenever the terrain is initialized.
    pub fn add_tracked_body(&mut self, body: BodyHandle, required_radius: f64, preload_radius: f64) {
        self.pending_bodies.push(TrackedBody {
            body,
            required_radius,
            preload_radius,
        });
    }

    /// Adds a body to track with the configured default radii.
    pub fn add_tracked_body_with_defaults(&mut self, body: BodyHandle) {
        let paging = &self.config.paging;
        let (required, preload) = (paging.default_required_radius, paging.default_preload_radius);
        self.add_tracked_body(body, required, preload);
    }

    /// Adds a tracked body and registers it with the pager if one is running.
    pub fn register_tracked_body(
        &mut self,
        engine: &dyn PhysicsEngine,
        body: TrackedBody,
    ) -> StrataResult<()> {
        match &mut self.state {
            NativeState::Paged { streamer, .. } => {
                streamer.register_tracked_body(engine, body)?;
            },
            _ => debug!("Terrain is not paged, tracked body {} stays pending", body.body.raw()),
        }
        self.pending_bodies.push(body);
        Ok(())
    }

    /// Allocates the engine objects and prepares the render buffers.
    ///
    /// On failure nothing stays allocated.
    pub fn initialize(&mut self, engine: &dyn PhysicsEngine) -> StrataResult<()> {
        if self.state.has_native() {
            error!("Terrain has already been initialized");
            return Err(ConfigError::AlreadyInitialized.into());
        }

        let Some(source) = self.source.clone() else {
            error!("No source height data selected, the terrain will not be created");
            return Err(ConfigError::NoHeightSource.into());
        };

        let bounds = resolve_grid_aligned_bounds(source.as_ref(), &self.owner, &self.config.bounds)
            .map_err(|e| {
                error!("Terrain bounds invalid: {e}");
                e
            })?;
        let scale = source.scale();
        let grid = GridCoordinateMapper::new(&bounds, scale.truncate()).map_err(|e| {
            error!("Terrain grid cannot be allocated: {e}");
            e
        })?;
        if (scale.x - scale.y).abs() > f64::EPSILON * scale.x.abs() {
            warn!(
                "Height source cells are not square ({} x {}), the terrain uses {}",
                scale.x, scale.y, scale.x
            );
        }
        info!(
            "Terrain bounds resolved: {} x {} vertices, half extent ({}, {}, {})",
            grid.num_vertices_x(),
            grid.num_vertices_y(),
            bounds.half_extent.x,
            bounds.half_extent.y,
            bounds.half_extent.z
        );

        let paging = self.config.paging.enabled;
        enforce_paging_exclusivity(&mut self.config);
        let params = if paging {
            Some(
                self.config
                    .paging
                    .pager_params(scale.x, self.config.max_depth)
                    .map_err(|e| {
                        error!("Terrain paging settings invalid: {e}");
                        e
                    })?,
            )
        } else {
            None
        };

        let allocation = match params {
            Some(params) => self.template_allocation(&grid, &bounds, &params),
            None => self.full_allocation(source.as_ref(), &grid, &bounds),
        };
        let mut terrain = engine.create_terrain(allocation).map_err(|e| {
            error!("Failed to allocate the native terrain: {e}");
            e
        })?;
        self.apply_terrain_settings(terrain.as_mut());

        if let Err(e) = self.cache.initialize(
            grid.num_vertices_x(),
            grid.num_vertices_y(),
            paging,
            Some(terrain.as_ref()),
        ) {
            error!("Failed to initialize the height cache: {e}");
            return Err(e);
        }

        self.state = match params {
            Some(params) => {
                let provider = Arc::new(TileHeightProvider::new(
                    Arc::clone(&self.cache),
                    Arc::clone(&source),
                    grid,
                    self.owner.translation.z,
                ));
                match TerrainTileStreamer::allocate(engine, terrain.as_ref(), provider, params) {
                    Ok(streamer) => NativeState::Paged { streamer, terrain },
                    Err(e) => {
                        error!("Failed to allocate the native terrain pager: {e}");
                        self.cache.clear();
                        return Err(e.into());
                    },
                }
            },
            None => NativeState::Terrain { terrain },
        };
        self.grid = Some(grid);
        info!("Native terrain allocated ({:?})", self.state);

        self.create_shovels(engine);
        self.register_pending_bodies(engine);
        self.prepare_rendering(&grid);
        self.push_material_bindings();
        Ok(())
    }

    /// Publishes the state of the last simulation step to the render side.
    pub fn step_sync(&mut self) -> StepStats {
        let mut stats = StepStats::default();
        let Some(grid) = self.grid else {
            return stats;
        };
        if !self.state.has_native() {
            return stats;
        }

        if self.render_displacement {
            stats.modified_cells = self.sync_displacement(&grid);
            if let Some(target) = self.displacement_target.as_deref_mut() {
                self.displacement.push(target);
                stats.displacement_pushed = true;
            }
        }

        if self.render_particles {
            let data = self.particle_data();
            if let Some(texture) = self.particles.as_mut() {
                stats.particles = texture.pack(&data);
                if stats.particles < data.len() {
                    debug!(
                        "Rendering {} of {} particles, the particle texture is full",
                        stats.particles,
                        data.len()
                    );
                }
                if let Some(target) = self.particle_target.as_deref_mut() {
                    texture.push(target);
                    stats.particles_pushed = true;
                }
            } else {
                error!("No particle texture, skipping particle rendering");
            }
        }

        self.push_material_bindings();
        stats
    }

    /// Handles the end of play. Engine objects are released unless the
    /// whole simulation is going away.
    pub fn end_play(&mut self, reason: EndPlayReason) {
        if !reason.tears_down() {
            debug!("Skipping terrain teardown on {reason:?}");
            return;
        }
        self.release_native();
    }

    /// The current engine objects.
    #[must_use]
    pub const fn native_state(&self) -> &NativeState {
        &self.state
    }

    /// True once engine objects exist.
    #[must_use]
    pub const fn has_native(&self) -> bool {
        self.state.has_native()
    }

    /// True when a pager is allocated.
    #[must_use]
    pub const fn is_paged(&self) -> bool {
        self.state.is_paged()
    }

    /// The configuration, after any automatic conflict resolution.
    #[must_use]
    pub const fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// The allocated grid.
    #[must_use]
    pub const fn grid(&self) -> Option<&GridCoordinateMapper> {
        self.grid.as_ref()
    }

    /// `(num_vertices_x, num_vertices_y)` of the allocated grid.
    #[must_use]
    pub fn num_vertices(&self) -> Option<(usize, usize)> {
        self.grid
            .map(|grid| (grid.num_vertices_x(), grid.num_vertices_y()))
    }

    /// The shared height cache.
    #[must_use]
    pub fn height_cache(&self) -> &HeightCache {
        &self.cache
    }

    /// The displacement buffer as last published.
    #[must_use]
    pub const fn displacement(&self) -> &DisplacementMap {
        &self.displacement
    }

    /// Number of shovels attached to the terrain.
    #[must_use]
    pub fn shovel_count(&self) -> usize {
        self.shovels.len()
    }

    /// Attached shovels.
    #[must_use]
    pub fn shovels(&self) -> &[Box<dyn NativeShovel>] {
        &self.shovels
    }

    /// Bodies registered with the pager, or still pending.
    #[must_use]
    pub fn tracked_bodies(&self) -> &[TrackedBody] {
        match &self.state {
            NativeState::Paged { streamer, .. } => streamer.tracked_bodies(),
            _ => &self.pending_bodies,
        }
    }

    /// Bounds as requested, recomputed from the current height source.
    pub fn user_bounds(&self) -> StrataResult<BoundsSpec> {
        let source = self.source.as_ref().ok_or(ConfigError::NoHeightSource)?;
        Ok(resolve_user_bounds(source.as_ref(), &self.owner, &self.config.bounds)?)
    }

    /// Grid-aligned bounds, recomputed from the current height source.
    pub fn grid_aligned_bounds(&self) -> StrataResult<BoundsSpec> {
        let source = self.source.as_ref().ok_or(ConfigError::NoHeightSource)?;
        Ok(resolve_grid_aligned_bounds(source.as_ref(), &self.owner, &self.config.bounds)?)
    }

    /// Whether the engine deletes particles leaving the bounds.
    #[must_use]
    pub fn delete_particles_outside_bounds(&self) -> bool {
        self.state.terrain().map_or(
            self.config.delete_particles_outside_bounds,
            |terrain| terrain.delete_particles_outside_bounds(),
        )
    }

    /// Whether the engine creates particles.
    #[must_use]
    pub fn create_particles(&self) -> bool {
        self.state
            .terrain()
            .map_or(self.config.create_particles, |terrain| terrain.create_particles())
    }

    /// Frames of all loaded tiles. Empty unless paging.
    #[must_use]
    pub fn active_tile_transforms(&self) -> Vec<(TileId, Transform)> {
        self.state
            .streamer()
            .map(TerrainTileStreamer::active_tile_transforms)
            .unwrap_or_default()
    }

    /// Frame tile `(0, 0)` is placed relative to, when paging.
    #[must_use]
    pub fn pager_reference_frame(&self) -> Option<Transform> {
        self.state.streamer().map(TerrainTileStreamer::reference_frame)
    }

    /// Material parameters for the current grid and bounds.
    #[must_use]
    pub fn material_bindings(&self) -> Option<MaterialBindings> {
        let grid = self.grid?;
        let bounds = match self.grid_aligned_bounds() {
            Ok(bounds) => bounds,
            Err(e) => {
                debug!("No material bindings: {e}");
                return None;
            },
        };
        let half = bounds.half_extent;
        Some(MaterialBindings {
            terrain_size: DVec2::new(half.x, half.y) * 2.0,
            terrain_position: bounds
                .transform
                .transform_point(DVec3::new(-half.x, -half.y, 0.0)),
            num_vertices_x: grid.num_vertices_x() as u32,
            num_vertices_y: grid.num_vertices_y() as u32,
            cell_size: grid.cell_size(),
        })
    }

    /// Heights of the full grid sampled from the source, host order.
    fn full_allocation(
        &self,
        source: &dyn HeightSampleSource,
        grid: &GridCoordinateMapper,
        bounds: &BoundsSpec,
    ) -> TerrainAllocation {
        let owner = self.owner.translation;
        let fallback = grid.height_to_local(owner.truncate(), owner.z) as f32;
        let (num_x, num_y) = (grid.num_vertices_x(), grid.num_vertices_y());

        let mut heights = Vec::with_capacity(num_x * num_y);
        let mut misses = 0usize;
        for y in 0..num_y as i64 {
            for x in 0..num_x as i64 {
                let height = grid
                    .sample_vertex(source, VertexCoord::new(x, y))
                    .unwrap_or_else(|| {
                        misses += 1;
                        fallback
                    });
                heights.push(height);
            }
        }
        if misses > 0 {
            warn!("No source height for {misses} terrain vertices, using base elevation");
        }

        TerrainAllocation {
            heights,
            num_vertices_x: num_x,
            num_vertices_y: num_y,
            element_size: grid.cell_size().x,
            transform: bounds.transform,
            max_depth: self.config.max_depth,
        }
    }

    /// Flat tile-sized template for the pager, centred on the pager reference vertex.
    fn template_allocation(
        &self,
        grid: &GridCoordinateMapper,
        bounds: &BoundsSpec,
        params: &PagerParams,
    ) -> TerrainAllocation {
        let n = params.tile_vertices;
        TerrainAllocation {
            heights: vec![0.0; n * n],
            num_vertices_x: n,
            num_vertices_y: n,
            element_size: params.quad_size,
            transform: Transform::new(
                bounds.transform.rotation,
                grid.vertex_world(grid.center_vertex()),
            ),
            max_depth: params.max_depth,
        }
    }

    fn apply_terrain_settings(&self, terrain: &mut dyn NativeTerrain) {
        terrain.set_create_particles(self.config.create_particles);
        terrain.set_delete_particles_outside_bounds(self.config.delete_particles_outside_bounds);
        terrain
            .set_penetration_force_velocity_scaling(self.config.penetration_force_velocity_scaling);
        if let Some(volume) = self.config.maximum_particle_activation_volume {
            terrain.set_maximum_particle_activation_volume(volume);
        }
    }

    fn create_shovels(&mut self, engine: &dyn PhysicsEngine) {
        for desc in &self.shovel_descs {
            let mut shovel = match engine.create_shovel(desc) {
                Ok(shovel) => shovel,
                Err(e) => {
                    error!("Failed to create shovel on body {}: {e}", desc.owner.raw());
                    continue;
                },
            };
            apply_excavation_settings(shovel.as_mut(), desc);

            let attached = match &mut self.state {
                NativeState::Terrain { terrain } => {
                    attach_with_edge_fallback(shovel.as_mut(), |s| terrain.add_shovel(s))
                },
                NativeState::Paged { streamer, .. } => {
                    attach_with_edge_fallback(shovel.as_mut(), |s| streamer.register_shovel(s))
                },
                NativeState::NoNative => continue,
            };
            if attached.is_ok() {
                self.shovels.push(shovel);
            }
        }
        if !self.shovel_descs.is_empty() {
            info!(
                "Attached {} of {} shovels",
                self.shovels.len(),
                self.shovel_descs.len()
            );
        }
    }

    fn register_pending_bodies(&mut self, engine: &dyn PhysicsEngine) {
        let NativeState::Paged { streamer, .. } = &mut self.state else {
            if !self.pending_bodies.is_empty() {
                debug!(
                    "{} tracked bodies ignored, the terrain is not paged",
                    self.pending_bodies.len()
                );
            }
            return;
        };
        for &body in &self.pending_bodies {
            // Failures are logged by the streamer.
            let _ = streamer.register_tracked_body(engine, body);
        }
    }

    fn prepare_rendering(&mut self, grid: &GridCoordinateMapper) {
        self.render_displacement = false;
        if self.config.rendering.enable_displacement_rendering {
            self.displacement = DisplacementMap::new(grid.num_vertices_x(), grid.num_vertices_y());
            match self.displacement_target.as_deref_mut() {
                Some(target) => match self.displacement.prepare_target(target) {
                    Ok(()) => self.render_displacement = true,
                    Err(e) => error!("Displacement rendering disabled: {e}"),
                },
                None => info!("No displacement target, displacement rendering disabled"),
            }
        }

        self.render_particles = false;
        if self.config.rendering.enable_particle_rendering {
            let max = self.config.rendering.max_num_render_particles;
            self.particles = ParticleTexture::new(max);
            match (self.particles.as_ref(), self.particle_target.as_deref_mut()) {
                (None, _) => error!(
                    "Cannot fit {max} particles in a texture, particle rendering disabled"
                ),
                (Some(_), None) => info!("No particle target, particle rendering disabled"),
                (Some(texture), Some(target)) => match texture.prepare_target(target) {
                    Ok(()) => self.render_particles = true,
                    Err(e) => error!("Particle rendering disabled: {e}"),
                },
            }
        }
    }

    /// Republishes deltas of modified cells. Returns the number of cells applied.
    fn sync_displacement(&mut self, grid: &GridCoordinateMapper) -> usize {
        let (num_x, num_y) = (grid.num_vertices_x(), grid.num_vertices_y());
        let cells = match &self.state {
            NativeState::Paged { streamer, .. } => {
                self.scratch = self.cache.snapshot_current();
                streamer.modified_heights(&mut self.scratch, num_x, num_y)
            },
            NativeState::Terrain { terrain } => {
                terrain.heights(&mut self.scratch, true);
                terrain.modified_vertices()
            },
            NativeState::NoNative => return 0,
        };

        match self
            .cache
            .apply_modified_cells(&cells, &self.scratch, self.displacement.cells_mut())
        {
            Ok(applied) => applied,
            Err(e) => {
                warn!("Skipping displacement update: {e}");
                0
            },
        }
    }

    fn particle_data(&self) -> ParticleData {
        match &self.state {
            NativeState::Paged { streamer, .. } => streamer.particle_data(),
            NativeState::Terrain { terrain } => terrain.particle_data(),
            NativeState::NoNative => ParticleData::default(),
        }
    }

    fn push_material_bindings(&mut self) {
        let Some(bindings) = self.material_bindings() else {
            return;
        };
        if let Some(sink) = self.material_sink.as_deref_mut() {
            sink.set_bindings(&bindings);
        }
    }

    /// Zeroes the displacement buffer and pushes it once.
    fn clear_displacement_map(&mut self) {
        self.displacement.clear();
        if self.render_displacement {
            if let Some(target) = self.displacement_target.as_deref_mut() {
                self.displacement.push(target);
            }
        }
    }

    /// Releases the pager, then shovels, then the terrain.
    fn release_native(&mut self) {
        let state = std::mem::replace(&mut self.state, NativeState::NoNative);
        if !state.has_native() {
            return;
        }
        self.clear_displacement_map();

        match state {
            NativeState::Paged { streamer, terrain } => {
                drop(streamer);
                debug!("Released native terrain pager");
                self.shovels.clear();
                drop(terrain);
            },
            NativeState::Terrain { terrain } => {
                self.shovels.clear();
                drop(terrain);
            },
            NativeState::NoNative => {},
        }

        self.cache.clear();
        self.grid = None;
        self.render_displacement = false;
        self.render_particles = false;
        info!("Released native terrain");
    }
}

impl Drop for TerrainSyncController {
    fn drop(&mut self) {
        self.release_native();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{NativeTerrainPager, TileHeightFetcher};
    use crate::source::GridHeightSource;
    use strata_common::{NativeError, StrataError};

    /// Engine that refuses to allocate anything.
    struct RefusingEngine;

    impl PhysicsEngine for RefusingEngine {
        fn create_terrain(
            &self,
            _allocation: TerrainAllocation,
        ) -> Result<Box<dyn NativeTerrain>, NativeError> {
            Err(NativeError::AllocationFailed("terrain".into()))
        }

        fn create_terrain_pager(
            &self,
            _fetcher: Arc<dyn TileHeightFetcher>,
            _base: &dyn NativeTerrain,
            _params: PagerParams,
        ) -> Result<Box<dyn NativeTerrainPager>, NativeError> {
            Err(NativeError::AllocationFailed("pager".into()))
        }

        fn create_shovel(&self, _desc: &ShovelDesc) -> Result<Box<dyn NativeShovel>, NativeError> {
            Err(NativeError::AllocationFailed("shovel".into()))
        }

        fn has_body(&self, _body: BodyHandle) -> bool {
            false
        }
    }

    fn source() -> Arc<GridHeightSource> {
        Arc::new(GridHeightSource::new(
            10,
            10,
            DVec3::new(100.0, 100.0, 1.0),
            Transform::IDENTITY,
        ))
    }

    #[test]
    fn test_end_play_reasons() {
        assert!(EndPlayReason::Destroyed.tears_down());
        assert!(EndPlayReason::RemovedFromWorld.tears_down());
        assert!(!EndPlayReason::EndPlayInEditor.tears_down());
        assert!(!EndPlayReason::Quit.tears_down());
        assert!(!EndPlayReason::LevelTransition.tears_down());
    }

    #[test]
    fn test_initialize_without_source() {
        let mut controller = TerrainSyncController::new(TerrainConfig::default());
        let result = controller.initialize(&RefusingEngine);
        assert!(matches!(
            result,
            Err(StrataError::Config(ConfigError::NoHeightSource))
        ));
        assert!(!controller.has_native());
        assert_eq!(controller.step_sync(), StepStats::default());
    }

    #[test]
    fn test_initialize_with_invalid_bounds() {
        let mut config = TerrainConfig::default();
        config.bounds.half_extent = DVec3::new(-1.0, 100.0, 100.0);
        let mut controller = TerrainSyncController::new(config);
        controller.set_height_source(source());
        let result = controller.initialize(&RefusingEngine);
        assert!(matches!(
            result,
            Err(StrataError::Config(ConfigError::NegativeHalfExtent { .. }))
        ));
        assert!(controller.user_bounds().is_err());
    }

    #[test]
    fn test_allocation_failure_keeps_no_native() {
        let mut controller = TerrainSyncController::new(TerrainConfig::default());
        controller.set_height_source(source());
        let result = controller.initialize(&RefusingEngine);
        assert!(matches!(
            result,
            Err(StrataError::Native(NativeError::AllocationFailed(_)))
        ));
        assert!(matches!(controller.native_state(), NativeState::NoNative));
        assert!(controller.height_cache().is_empty());
        assert!(controller.grid().is_none());
    }

    #[test]
    fn test_bounds_queries_recompute() {
        let mut config = TerrainConfig::default();
        config.bounds.half_extent = DVec3::new(450.0, 450.0, 1000.0);
        let mut controller = TerrainSyncController::new(config);
        controller.set_height_source(source());
        controller.set_owner_transform(Transform::from_translation(DVec3::new(500.0, 500.0, 0.0)));

        let bounds = controller.grid_aligned_bounds().expect("valid");
        assert_eq!(bounds.half_extent, DVec3::new(400.0, 400.0, 1000.0));

        controller.set_owner_transform(Transform::IDENTITY);
        let bounds = controller.grid_aligned_bounds().expect("valid");
        assert_eq!(bounds.half_extent, DVec3::new(200.0, 200.0, 1000.0));
    }

    #[test]
    fn test_tracked_bodies_pending_until_initialized() {
        let mut controller = TerrainSyncController::new(TerrainConfig::default());
        let body = BodyHandle::new();
        controller.add_tracked_body_with_defaults(body);
        let tracked = controller.tracked_bodies();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].required_radius, 600.0);
        assert_eq!(tracked[0].preload_radius, 1000.0);
    }
}
