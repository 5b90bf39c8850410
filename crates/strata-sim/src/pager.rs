//! Paged terrain.
//!
//! Tiles are loaded on a dedicated thread through the height callback and
//! kept resident while a tracked body or shovel is within their preload
//! radius. Each step blocks until all tiles within the required radii are
//! loaded (or [`REQUIRED_TILE_TIMEOUT`] passes). Deformed tiles keep their
//! heights when unloaded and are restored instead of fetched again.
//!
//! Tile `(tx, ty)` has its engine origin vertex at
//! `reference + R * (tx * S, -ty * S, 0)` with `S = stride * quad_size`.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use glam::{DQuat, DVec2, DVec3};
use parking_lot::Mutex;
use strata_common::{BodyHandle, NativeError, TileId, Transform, VertexCoord};
use strata_terrain::{
    NativeShovel, NativeTerrain, NativeTerrainPager, PagerParams, ParticleData,
    TileHeightFetcher,
};
use tracing::{debug, info, trace, warn};

use crate::shovel::follows_edge_convention;
use crate::terrain::{ParticleStore, TerrainGrid, TerrainSettings, PARTICLE_RADIUS_FACTOR};
use crate::world::{EventLog, SimEvent, SimWorld};

/// Longest a step waits for required tiles.
pub const REQUIRED_TILE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the tile request queue.
const REQUEST_QUEUE_CAPACITY: usize = 256;

/// Placement of tiles relative to the pager reference frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGeometry {
    reference: Transform,
    tile_vertices: usize,
    stride: usize,
    quad_size: f64,
    max_depth: f64,
}

impl TileGeometry {
    /// Creates the tile layout for `params` around `reference`.
    #[must_use]
    pub const fn new(reference: Transform, params: &PagerParams) -> Self {
        Self {
            reference,
            tile_vertices: params.tile_vertices,
            stride: params.tile_stride(),
            quad_size: params.quad_size,
            max_depth: params.max_depth,
        }
    }

    /// Distance between the origins of neighbouring tiles.
    fn step(&self) -> f64 {
        self.stride as f64 * self.quad_size
    }

    /// Side length of one tile.
    fn span(&self) -> f64 {
        self.tile_vertices.saturating_sub(1) as f64 * self.quad_size
    }

    /// World position of a tile's engine origin vertex.
    #[must_use]
    pub fn origin_world(&self, id: TileId) -> DVec3 {
        let step = self.step();
        self.reference.transform_point(DVec3::new(
            f64::from(id.x) * step,
            -f64::from(id.y) * step,
            0.0,
        ))
    }

    /// Frame of a tile's centre.
    #[must_use]
    pub fn tile_transform(&self, id: TileId) -> Transform {
        let (step, half) = (self.step(), self.span() * 0.5);
        Transform::new(
            self.reference.rotation,
            self.reference.transform_point(DVec3::new(
                f64::from(id.x) * step + half,
                -f64::from(id.y) * step - half,
                0.0,
            )),
        )
    }

    /// Tiles touching the disk of `radius` around `world`.
    #[must_use]
    pub fn tiles_within(&self, world: DVec3, radius: f64) -> Vec<TileId> {
        let step = self.step();
        if radius < 0.0 || step <= 0.0 {
            return Vec::new();
        }
        let local = self.reference.inverse_transform_point(world);
        // Tile space runs along -y.
        let point = DVec2::new(local.x, -local.y);
        let span = self.span();

        let range = |p: f64| {
            let lo = ((p - radius - span) / step).ceil();
            let hi = ((p + radius) / step).floor();
            let clamp = |v: f64| v.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32;
            clamp(lo)..=clamp(hi)
        };

        let mut tiles = Vec::new();
        for ty in range(point.y) {
            for tx in range(point.x) {
                let min = DVec2::new(f64::from(tx), f64::from(ty)) * step;
                let max = min + DVec2::splat(span);
                let nearest = point.clamp(min, max);
                if nearest.distance_squared(point) <= radius * radius {
                    tiles.push(TileId::new(tx, ty));
                }
            }
        }
        tiles
    }
}

enum TileRequest {
    Load(TileId),
    Shutdown,
}

struct TileLoadResult {
    id: TileId,
    loaded: bool,
}

/// Loads tiles on the pager thread.
struct TileWorker {
    fetcher: Arc<dyn TileHeightFetcher>,
    geometry: TileGeometry,
    tiles: Arc<DashMap<TileId, TerrainGrid>>,
    done: Sender<TileLoadResult>,
    events: Arc<EventLog>,
}

impl TileWorker {
    fn run(self, requests: Receiver<TileRequest>) {
        for request in requests.iter() {
            match request {
                TileRequest::Shutdown => break,
                TileRequest::Load(id) => {
                    let loaded = self.load(id);
                    if self.done.send(TileLoadResult { id, loaded }).is_err() {
                        break;
                    }
                },
            }
        }
        debug!("Terrain pager thread stopped");
    }

    fn load(&self, id: TileId) -> bool {
        let n = self.geometry.tile_vertices;
        let origin = self.geometry.origin_world(id);
        let Some(heights) = self.fetcher.fetch_heights(origin, n, n) else {
            trace!("No heights for tile {id}");
            self.events.push(SimEvent::TileRejected(id));
            return false;
        };
        let Some(grid) = TerrainGrid::from_native(
            heights,
            n,
            n,
            self.geometry.quad_size,
            self.geometry.tile_transform(id),
            self.geometry.max_depth,
        ) else {
            warn!("Height callback returned a wrongly sized buffer for tile {id}");
            self.events.push(SimEvent::TileRejected(id));
            return false;
        };
        self.tiles.insert(id, grid);
        self.events.push(SimEvent::TileLoaded(id));
        true
    }
}

#[derive(Debug, Clone, Copy)]
struct Tracker {
    body: BodyHandle,
    required_radius: f64,
    preload_radius: f64,
}

/// State of a pager, shared with the engine.
pub struct PagerState {
    geometry: TileGeometry,
    tiles: Arc<DashMap<TileId, TerrainGrid>>,
    evicted: Mutex<AHashMap<TileId, TerrainGrid>>,
    pending: Mutex<AHashSet<TileId>>,
    failed: Mutex<AHashSet<TileId>>,
    trackers: Mutex<Vec<Tracker>>,
    particles: Mutex<ParticleStore>,
    settings: TerrainSettings,
    requests: Sender<TileRequest>,
    done: Receiver<TileLoadResult>,
    events: Arc<EventLog>,
}

impl PagerState {
    /// Tile layout.
    #[must_use]
    pub const fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    /// Number of loaded tiles.
    #[must_use]
    pub fn loaded_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// True if the tile is loaded.
    #[must_use]
    pub fn is_loaded(&self, id: TileId) -> bool {
        self.tiles.contains_key(&id)
    }

    /// Forgets the modifications of the last step.
    pub fn begin_step(&self) {
        for mut tile in self.tiles.iter_mut() {
            tile.clear_modified();
        }
    }

    /// Loads tiles near tracked bodies and unloads tiles past every preload radius.
    pub fn update_residency(&self, world: &SimWorld) {
        let trackers = self.trackers.lock().clone();
        let mut required = AHashSet::new();
        let mut wanted = AHashSet::new();
        for tracker in &trackers {
            let Some(position) = world.body_position(tracker.body) else {
                trace!("Tracked body {} no longer exists", tracker.body.raw());
                continue;
            };
            for id in self.geometry.tiles_within(position, tracker.required_radius) {
                required.insert(id);
                wanted.insert(id);
            }
            wanted.extend(self.geometry.tiles_within(position, tracker.preload_radius));
        }

        let unload: Vec<TileId> = self
            .tiles
            .iter()
            .map(|tile| *tile.key())
            .filter(|id| !wanted.contains(id))
            .collect();
        for id in unload {
            if let Some((id, grid)) = self.tiles.remove(&id) {
                if grid.is_deformed() {
                    self.evicted.lock().insert(id, grid);
                }
                self.events.push(SimEvent::TileUnloaded(id));
            }
        }

        {
            let failed = self.failed.lock();
            let mut pending = self.pending.lock();
            let mut evicted = self.evicted.lock();
            for &id in &wanted {
                if self.tiles.contains_key(&id) || failed.contains(&id) || pending.contains(&id) {
                    continue;
                }
                if let Some(mut grid) = evicted.remove(&id) {
                    grid.clear_modified();
                    self.tiles.insert(id, grid);
                    trace!("Restored deformed tile {id}");
                    self.events.push(SimEvent::TileLoaded(id));
                    continue;
                }
                pending.insert(id);
                if self.requests.send(TileRequest::Load(id)).is_err() {
                    warn!("Terrain pager thread is gone, tile {id} will not load");
                    pending.remove(&id);
                }
            }
        }

        let deadline = Instant::now() + REQUIRED_TILE_TIMEOUT;
        loop {
            let missing = {
                let failed = self.failed.lock();
                required
                    .iter()
                    .filter(|id| !self.tiles.contains_key(id) && !failed.contains(id))
                    .count()
            };
            if missing == 0 {
                break;
            }
            match self.done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(result) => self.finish_load(&result),
                Err(RecvTimeoutError::Timeout) => {
                    warn!("{missing} required tiles still loading after {REQUIRED_TILE_TIMEOUT:?}");
                    break;
                },
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        while let Ok(result) = self.done.try_recv() {
            self.finish_load(&result);
        }
    }

    fn finish_load(&self, result: &TileLoadResult) {
        self.pending.lock().remove(&result.id);
        if !result.loaded {
            self.failed.lock().insert(result.id);
        }
    }

    /// Deforms every loaded tile under `world`. Returns the number of changed vertices.
    pub fn deform(&self, world: DVec3, radius: f64, depth: f64) -> usize {
        let mut total = 0;
        for mut tile in self.tiles.iter_mut() {
            let changed = tile.deform(world, radius, depth);
            if changed.is_empty() {
                continue;
            }
            total += changed.len();
            let particle_radius = tile.element_size() * PARTICLE_RADIUS_FACTOR;
            self.particles
                .lock()
                .spawn(&changed, particle_radius, &self.settings);
        }
        total
    }
}

/// A paged terrain with its loading thread.
pub struct SimTerrainPager {
    state: Arc<PagerState>,
    worker: Option<JoinHandle<()>>,
}

impl SimTerrainPager {
    /// Starts a pager using the frame and settings of `base`.
    pub(crate) fn spawn(
        fetcher: Arc<dyn TileHeightFetcher>,
        base: &dyn NativeTerrain,
        params: PagerParams,
        events: Arc<EventLog>,
    ) -> Result<Self, NativeError> {
        if params.tile_stride() == 0 {
            return Err(NativeError::Rejected(format!(
                "tiles of {} vertices overlapping by {}",
                params.tile_vertices, params.overlap_vertices
            )));
        }
        let geometry = TileGeometry::new(base.transform(), &params);
        let settings = TerrainSettings {
            create_particles: base.create_particles(),
            delete_particles_outside_bounds: base.delete_particles_outside_bounds(),
            penetration_force_velocity_scaling: base.penetration_force_velocity_scaling(),
            maximum_particle_activation_volume: base.maximum_particle_activation_volume(),
        };

        let (request_tx, request_rx) = bounded(REQUEST_QUEUE_CAPACITY);
        let (done_tx, done_rx) = unbounded();
        let tiles = Arc::new(DashMap::new());

        let worker = TileWorker {
            fetcher,
            geometry,
            tiles: Arc::clone(&tiles),
            done: done_tx,
            events: Arc::clone(&events),
        };
        let handle = std::thread::Builder::new()
            .name("terrain-pager".into())
            .spawn(move || worker.run(request_rx))
            .map_err(|e| NativeError::AllocationFailed(format!("pager thread: {e}")))?;

        info!(
            "Terrain pager started: {} vertices per tile, stride {}",
            params.tile_vertices,
            params.tile_stride()
        );
        events.push(SimEvent::PagerCreated);
        Ok(Self {
            state: Arc::new(PagerState {
                geometry,
                tiles,
                evicted: Mutex::new(AHashMap::new()),
                pending: Mutex::new(AHashSet::new()),
                failed: Mutex::new(AHashSet::new()),
                trackers: Mutex::new(Vec::new()),
                particles: Mutex::new(ParticleStore::default()),
                settings,
                requests: request_tx,
                done: done_rx,
                events,
            }),
            worker: Some(handle),
        })
    }

    pub(crate) fn state(&self) -> &Arc<PagerState> {
        &self.state
    }
}

impl NativeTerrainPager for SimTerrainPager {
    fn add_shovel(
        &mut self,
        shovel: &dyn NativeShovel,
        required_radius: f64,
        preload_radius: f64,
    ) -> bool {
        if !follows_edge_convention(shovel) {
            self.state
                .events
                .push(SimEvent::ShovelRejected(shovel.handle()));
            return false;
        }
        self.state.trackers.lock().push(Tracker {
            body: shovel.owner(),
            required_radius,
            preload_radius,
        });
        self.state.events.push(SimEvent::ShovelAdded(shovel.handle()));
        true
    }

    fn add_rigid_body(&mut self, body: BodyHandle, required_radius: f64, preload_radius: f64)
        -> bool {
        self.state.trackers.lock().push(Tracker {
            body,
            required_radius,
            preload_radius,
        });
        true
    }

    fn modified_heights(
        &self,
        current: &mut [f32],
        num_vertices_x: usize,
        num_vertices_y: usize,
    ) -> Vec<VertexCoord> {
        if current.len() != num_vertices_x * num_vertices_y {
            warn!(
                "Height buffer of {} does not match a {num_vertices_x}x{num_vertices_y} grid",
                current.len()
            );
            return Vec::new();
        }
        let center = VertexCoord::new((num_vertices_x / 2) as i64, (num_vertices_y / 2) as i64);
        let stride = self.state.geometry.stride as i64;

        let mut seen = AHashSet::new();
        let mut touched = Vec::new();
        for tile in self.state.tiles.iter() {
            let origin = tile.key().origin_vertex(center, stride);
            for (i, j) in tile.value().modified() {
                let host = VertexCoord::new(origin.x + i as i64, origin.y - j as i64);
                if !host.is_inside(num_vertices_x, num_vertices_y) {
                    continue;
                }
                if let Some(height) = tile.value().height(i, j) {
                    current[host.to_index(num_vertices_x)] = height;
                }
                if seen.insert(host) {
                    touched.push(host);
                }
            }
        }
        touched
    }

    fn particle_data(&self) -> ParticleData {
        self.state.particles.lock().data()
    }

    fn reference_point(&self) -> DVec3 {
        self.state.geometry.reference.translation
    }

    fn reference_rotation(&self) -> DQuat {
        self.state.geometry.reference.rotation
    }

    fn active_tile_transforms(&self) -> Vec<(TileId, Transform)> {
        let mut tiles: Vec<(TileId, Transform)> = self
            .state
            .tiles
            .iter()
            .map(|tile| (*tile.key(), tile.value().transform()))
            .collect();
        tiles.sort_unstable_by_key(|(id, _)| (id.y, id.x));
        tiles
    }
}

impl Drop for SimTerrainPager {
    fn drop(&mut self) {
        // Fails only if the thread already stopped.
        let _ = self.state.requests.send(TileRequest::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Terrain pager thread panicked");
            }
        }
        self.state.tiles.clear();
        self.state.events.push(SimEvent::PagerReleased);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> TileGeometry {
        let params = PagerParams {
            tile_vertices: 11,
            overlap_vertices: 2,
            quad_size: 10.0,
            max_depth: 5.0,
        };
        TileGeometry::new(
            Transform::from_translation(DVec3::new(1000.0, 2000.0, 0.0)),
            &params,
        )
    }

    #[test]
    fn test_tile_origins() {
        let geometry = geometry();
        // Stride of 8 quads, 80 units.
        assert_eq!(geometry.origin_world(TileId::new(0, 0)), DVec3::new(1000.0, 2000.0, 0.0));
        assert_eq!(geometry.origin_world(TileId::new(1, 2)), DVec3::new(1080.0, 1840.0, 0.0));
        assert_eq!(
            geometry.tile_transform(TileId::new(0, 0)).translation,
            DVec3::new(1050.0, 1950.0, 0.0)
        );
    }

    #[test]
    fn test_tiles_within() {
        let geometry = geometry();
        let inside = DVec3::new(1050.0, 1950.0, 0.0);
        assert_eq!(geometry.tiles_within(inside, 0.0), vec![TileId::new(0, 0)]);

        // Inside the overlap of tiles (0, 0) and (1, 0).
        let overlap = DVec3::new(1090.0, 1950.0, 0.0);
        let tiles = geometry.tiles_within(overlap, 0.0);
        assert!(tiles.contains(&TileId::new(0, 0)));
        assert!(tiles.contains(&TileId::new(1, 0)));

        let wide = geometry.tiles_within(inside, 100.0);
        assert!(wide.contains(&TileId::new(-1, -1)));
        assert!(wide.contains(&TileId::new(1, 1)));
        assert!(geometry.tiles_within(inside, -1.0).is_empty());
    }

    #[test]
    fn test_tiles_within_uses_disk() {
        let geometry = geometry();
        // 45 units past the tile corner along both axes.
        let near_corner = DVec3::new(1145.0, 2045.0, 0.0);
        let tiles = geometry.tiles_within(near_corner, 50.0);
        assert!(!tiles.contains(&TileId::new(0, 0)));
    }
}
