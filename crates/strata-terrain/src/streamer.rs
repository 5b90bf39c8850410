//! Terrain paging coordination.
//!
//! [`TileHeightProvider`] is the callback the engine pager invokes from its
//! loading thread. [`TerrainTileStreamer`] owns the pager and forwards
//! residency requests for tracked bodies and shovels to it.

use std::sync::Arc;

use glam::{DQuat, DVec3};
use strata_common::{BodyHandle, ConsistencyError, NativeError, TileId, Transform, VertexCoord};
use tracing::{debug, info, warn};

use crate::config::TerrainConfig;
use crate::grid::GridCoordinateMapper;
use crate::height_cache::HeightCache;
use crate::native::{
    NativeShovel, NativeTerrain, NativeTerrainPager, PagerParams, ParticleData, PhysicsEngine,
    TileHeightFetcher,
};
use crate::source::HeightSampleSource;

/// A body whose surroundings must stay loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedBody {
    /// Engine body
    pub body: BodyHandle,
    /// Radius that must be resident
    pub required_radius: f64,
    /// Radius that should be preloaded
    pub preload_radius: f64,
}

/// Supplies tile heights from the height source and records their baselines.
pub struct TileHeightProvider {
    cache: Arc<HeightCache>,
    source: Arc<dyn HeightSampleSource>,
    grid: GridCoordinateMapper,
    /// World elevation used where the source has no data
    base_elevation: f64,
}

impl TileHeightProvider {
    /// Creates a provider over `grid`, writing baselines into `cache`.
    #[must_use]
    pub fn new(
        cache: Arc<HeightCache>,
        source: Arc<dyn HeightSampleSource>,
        grid: GridCoordinateMapper,
        base_elevation: f64,
    ) -> Self {
        Self {
            cache,
            source,
            grid,
            base_elevation,
        }
    }

    /// Fetches a tile, or reports why the request was refused.
    ///
    /// Row `j` of the result is host row `start.y - j`.
    pub fn try_fetch(
        &self,
        world_start: DVec3,
        vertices_x: usize,
        vertices_y: usize,
    ) -> Result<Vec<f32>, ConsistencyError> {
        let start = self.grid.world_to_vertex(world_start);
        let (num_x, num_y) = self.cache.dimensions();
        let fits = vertices_x > 0
            && vertices_y > 0
            && start.x >= 0
            && start.x + vertices_x as i64 <= num_x as i64
            && start.y < num_y as i64
            && start.y - (vertices_y as i64 - 1) >= 0;
        if !fits {
            return Err(ConsistencyError::TileOutOfBounds {
                x: start.x,
                y: start.y,
                width: vertices_x,
                height: vertices_y,
                num_x,
                num_y,
            });
        }

        let mut heights = Vec::with_capacity(vertices_x * vertices_y);
        let mut baselines = Vec::with_capacity(vertices_x * vertices_y);
        let mut misses = 0usize;
        let fallback = self.fallback_height();

        for j in 0..vertices_y as i64 {
            for i in 0..vertices_x as i64 {
                let vertex = VertexCoord::new(start.x + i, start.y - j);
                let height = self
                    .grid
                    .sample_vertex(self.source.as_ref(), vertex)
                    .unwrap_or_else(|| {
                        misses += 1;
                        fallback
                    });
                heights.push(height);
                baselines.push((vertex.to_index(num_x), height));
            }
        }

        if misses > 0 {
            warn!(
                "No source height for {misses} vertices of the tile at ({}, {}), using base elevation",
                start.x, start.y
            );
        }

        let written = self.cache.write_baselines(&baselines);
        debug!(
            "Fetched {vertices_x}x{vertices_y} tile at ({}, {}), {written} new baselines",
            start.x, start.y
        );
        Ok(heights)
    }

    /// Base elevation in the grid frame, measured at the grid centre.
    fn fallback_height(&self) -> f32 {
        let center = self.grid.frame().translation;
        self.grid
            .height_to_local(center.truncate(), self.base_elevation) as f32
    }
}

impl TileHeightFetcher for TileHeightProvider {
    fn fetch_heights(
        &self,
        world_start: DVec3,
        vertices_x: usize,
        vertices_y: usize,
    ) -> Option<Vec<f32>> {
        match self.try_fetch(world_start, vertices_x, vertices_y) {
            Ok(heights) => Some(heights),
            Err(e) => {
                warn!("Rejected tile height request: {e}");
                None
            },
        }
    }
}

/// Forces delete-outside-bounds off while paging. Returns true if the
/// setting had to be changed.
pub fn enforce_paging_exclusivity(config: &mut TerrainConfig) -> bool {
    if config.paging.enabled && config.delete_particles_outside_bounds {
        warn!(
            "Delete particles outside bounds cannot be combined with terrain paging, disabling it"
        );
        config.delete_particles_outside_bounds = false;
        return true;
    }
    false
}

/// Owns the engine pager and its height callback.
pub struct TerrainTileStreamer {
    pager: Box<dyn NativeTerrainPager>,
    provider: Arc<TileHeightProvider>,
    params: PagerParams,
    tracked: Vec<TrackedBody>,
}

impl TerrainTileStreamer {
    /// Allocates a pager on top of `base`.
    pub fn allocate(
        engine: &dyn PhysicsEngine,
        base: &dyn NativeTerrain,
        provider: Arc<TileHeightProvider>,
        params: PagerParams,
    ) -> Result<Self, NativeError> {
        let fetcher: Arc<dyn TileHeightFetcher> = provider.clone();
        let pager = engine.create_terrain_pager(fetcher, base, params)?;
        info!(
            "Allocated terrain pager: {} vertices per tile, {} overlap, quad size {}",
            params.tile_vertices, params.overlap_vertices, params.quad_size
        );
        Ok(Self {
            pager,
            provider,
            params,
            tracked: Vec::new(),
        })
    }

    /// Parameters the pager was allocated with.
    #[must_use]
    pub const fn params(&self) -> &PagerParams {
        &self.params
    }

    /// The height callback handed to the pager.
    #[must_use]
    pub fn provider(&self) -> &TileHeightProvider {
        &self.provider
    }

    /// Registers a body with the pager. The radii are passed through as given.
    pub fn register_tracked_body(
        &mut self,
        engine: &dyn PhysicsEngine,
        body: TrackedBody,
    ) -> Result<(), NativeError> {
        if !body.body.is_valid() || !engine.has_body(body.body) {
            warn!("Tracked body {} has no native body, skipping", body.body.raw());
            return Err(NativeError::NoNative("tracked body"));
        }
        if !self
            .pager
            .add_rigid_body(body.body, body.required_radius, body.preload_radius)
        {
            warn!("Terrain pager refused tracked body {}", body.body.raw());
            return Err(NativeError::Rejected(format!("body {}", body.body.raw())));
        }
        debug!(
            "Tracking body {} (required {}, preload {})",
            body.body.raw(),
            body.required_radius,
            body.preload_radius
        );
        self.tracked.push(body);
        Ok(())
    }

    /// Registers a shovel with the pager using its property radii.
    pub fn register_shovel(&mut self, shovel: &dyn NativeShovel) -> bool {
        let properties = shovel.properties();
        self.pager
            .add_shovel(shovel, properties.required_radius, properties.preload_radius)
    }

    /// Bodies registered so far.
    #[must_use]
    pub fn tracked_bodies(&self) -> &[TrackedBody] {
        &self.tracked
    }

    /// Writes heights changed during the last step into `current`.
    pub fn modified_heights(
        &self,
        current: &mut [f32],
        num_vertices_x: usize,
        num_vertices_y: usize,
    ) -> Vec<VertexCoord> {
        self.pager
            .modified_heights(current, num_vertices_x, num_vertices_y)
    }

    /// Particles over all loaded tiles.
    #[must_use]
    pub fn particle_data(&self) -> ParticleData {
        self.pager.particle_data()
    }

    /// Frame tile `(0, 0)` is placed relative to.
    #[must_use]
    pub fn reference_frame(&self) -> Transform {
        Transform::new(self.pager.reference_rotation(), self.pager.reference_point())
    }

    /// Pager reference orientation.
    #[must_use]
    pub fn reference_rotation(&self) -> DQuat {
        self.pager.reference_rotation()
    }

    /// Frames of all loaded tiles.
    #[must_use]
    pub fn active_tile_transforms(&self) -> Vec<(TileId, Transform)> {
        self.pager.active_tile_transforms()
    }
}
