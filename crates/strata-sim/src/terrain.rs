//! Resident height grids and soil particles.
//!
//! Heights are stored in engine order: row `j = 0` lies at the `+y` edge
//! of the terrain.

use std::f64::consts::PI;
use std::sync::Arc;

use ahash::AHashSet;
use glam::{DQuat, DVec2, DVec3};
use parking_lot::Mutex;
use strata_common::{ShovelHandle, Transform, VertexCoord};
use strata_terrain::{NativeShovel, NativeTerrain, ParticleData, TerrainAllocation};
use tracing::{debug, trace};

use crate::shovel::follows_edge_convention;
use crate::world::{EventLog, SimEvent};

/// Upper limit on live particles per terrain or pager.
pub const MAX_PARTICLES: usize = 100_000;

/// Particle radius relative to the element size.
pub const PARTICLE_RADIUS_FACTOR: f64 = 0.25;

/// A height grid in engine order.
#[derive(Debug, Clone)]
pub struct TerrainGrid {
    num_x: usize,
    num_y: usize,
    element_size: f64,
    transform: Transform,
    max_depth: f64,
    initial: Vec<f32>,
    current: Vec<f32>,
    modified: AHashSet<(usize, usize)>,
}

impl TerrainGrid {
    /// Creates a grid from engine-order heights. `None` if the buffer does
    /// not match the dimensions.
    #[must_use]
    pub fn from_native(
        heights: Vec<f32>,
        num_x: usize,
        num_y: usize,
        element_size: f64,
        transform: Transform,
        max_depth: f64,
    ) -> Option<Self> {
        if num_x == 0 || num_y == 0 || heights.len() != num_x * num_y {
            return None;
        }
        Some(Self {
            num_x,
            num_y,
            element_size,
            transform,
            max_depth,
            initial: heights.clone(),
            current: heights,
            modified: AHashSet::new(),
        })
    }

    /// Creates a grid from a host-order allocation.
    #[must_use]
    pub fn from_allocation(allocation: &TerrainAllocation) -> Option<Self> {
        let (num_x, num_y) = (allocation.num_vertices_x, allocation.num_vertices_y);
        if num_x == 0 || allocation.heights.len() != num_x * num_y {
            return None;
        }
        let native = allocation
            .heights
            .chunks_exact(num_x)
            .rev()
            .flatten()
            .copied()
            .collect();
        Self::from_native(
            native,
            num_x,
            num_y,
            allocation.element_size,
            allocation.transform,
            allocation.max_depth,
        )
    }

    /// `(num_x, num_y)`.
    #[must_use]
    pub const fn size(&self) -> (usize, usize) {
        (self.num_x, self.num_y)
    }

    /// Distance between vertices.
    #[must_use]
    pub const fn element_size(&self) -> f64 {
        self.element_size
    }

    /// Frame of the grid centre.
    #[must_use]
    pub const fn transform(&self) -> Transform {
        self.transform
    }

    /// Half the grid span along X and Y.
    #[must_use]
    pub fn half_extent(&self) -> DVec2 {
        DVec2::new(
            (self.num_x - 1) as f64 * self.element_size,
            (self.num_y - 1) as f64 * self.element_size,
        ) * 0.5
    }

    /// Current height of engine vertex `(i, j)`.
    #[must_use]
    pub fn height(&self, i: usize, j: usize) -> Option<f32> {
        (i < self.num_x && j < self.num_y).then(|| self.current[j * self.num_x + i])
    }

    /// Vertices changed since the last [`TerrainGrid::clear_modified`].
    pub fn modified(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.modified.iter().copied()
    }

    /// Forgets the modifications of the last step.
    pub fn clear_modified(&mut self) {
        self.modified.clear();
    }

    /// True if any vertex lies below its initial height.
    #[must_use]
    pub fn is_deformed(&self) -> bool {
        self.current != self.initial
    }

    /// Copies heights into `out` in host order.
    pub fn host_heights(&self, out: &mut Vec<f32>, use_current: bool) {
        let source = if use_current {
            &self.current
        } else {
            &self.initial
        };
        out.clear();
        out.reserve(source.len());
        for row in source.chunks_exact(self.num_x).rev() {
            out.extend_from_slice(row);
        }
    }

    /// Modified vertices in host coordinates, sorted by row then column.
    #[must_use]
    pub fn modified_host_vertices(&self) -> Vec<VertexCoord> {
        let mut vertices: Vec<VertexCoord> = self
            .modified
            .iter()
            .map(|&(i, j)| VertexCoord::new(i as i64, (self.num_y - 1 - j) as i64))
            .collect();
        vertices.sort_unstable_by_key(|v| (v.y, v.x));
        vertices
    }

    /// Position of engine vertex `(i, j)` in the grid frame.
    fn vertex_local(&self, i: usize, j: usize) -> DVec2 {
        let half = self.half_extent();
        DVec2::new(
            i as f64 * self.element_size - half.x,
            half.y - j as f64 * self.element_size,
        )
    }

    /// Distance from a point in the grid frame to the grid rectangle.
    #[must_use]
    pub fn distance_to(&self, local: DVec2) -> f64 {
        let half = self.half_extent();
        let outside = (local.abs() - half).max(DVec2::ZERO);
        outside.length()
    }

    /// True if `world` projects into the grid.
    #[must_use]
    pub fn contains_world(&self, world: DVec3) -> bool {
        let local = self.transform.inverse_transform_point(world).truncate();
        self.distance_to(local) == 0.0
    }

    /// Lowers the surface in a cone of `radius` around `world` by up to `depth`,
    /// never below `max_depth` under the initial surface.
    ///
    /// Returns the new world surface points of every changed vertex.
    pub fn deform(&mut self, world: DVec3, radius: f64, depth: f64) -> Vec<DVec3> {
        let mut changed = Vec::new();
        if radius <= 0.0 || depth <= 0.0 {
            return changed;
        }
        let local = self.transform.inverse_transform_point(world).truncate();
        if self.distance_to(local) > radius {
            return changed;
        }

        let half = self.half_extent();
        let es = self.element_size;
        let clamp_x = |v: f64| v.clamp(0.0, (self.num_x - 1) as f64) as usize;
        let clamp_y = |v: f64| v.clamp(0.0, (self.num_y - 1) as f64) as usize;
        let i_range = clamp_x(((local.x - radius + half.x) / es).floor())
            ..=clamp_x(((local.x + radius + half.x) / es).ceil());
        let j_lo = clamp_y(((half.y - local.y - radius) / es).floor());
        let j_hi = clamp_y(((half.y - local.y + radius) / es).ceil());

        for j in j_lo..=j_hi {
            for i in i_range.clone() {
                let vertex = self.vertex_local(i, j);
                let distance = vertex.distance(local);
                if distance >= radius {
                    continue;
                }
                let index = j * self.num_x + i;
                let cut = depth * (1.0 - distance / radius);
                let floor = f64::from(self.initial[index]) - self.max_depth;
                let lowered = (f64::from(self.current[index]) - cut).max(floor) as f32;
                if lowered < self.current[index] {
                    self.current[index] = lowered;
                    self.modified.insert((i, j));
                    changed.push(
                        self.transform
                            .transform_point(vertex.extend(f64::from(lowered))),
                    );
                }
            }
        }
        trace!("Deformed {} vertices", changed.len());
        changed
    }
}

/// Per-terrain particle settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainSettings {
    /// Excavated soil becomes particles
    pub create_particles: bool,
    /// Particles leaving the terrain are removed
    pub delete_particles_outside_bounds: bool,
    /// Penetration force velocity scaling
    pub penetration_force_velocity_scaling: f64,
    /// Particle volume created per deformation
    pub maximum_particle_activation_volume: f64,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            create_particles: true,
            delete_particles_outside_bounds: false,
            penetration_force_velocity_scaling: 0.0,
            maximum_particle_activation_volume: f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SimParticle {
    position: DVec3,
    radius: f64,
    rotation: DQuat,
}

/// Soil particles of one terrain or pager.
#[derive(Debug, Default)]
pub struct ParticleStore {
    particles: Vec<SimParticle>,
}

impl ParticleStore {
    /// Spawns a particle of `radius` at each point, within the activation
    /// volume and [`MAX_PARTICLES`]. Returns the number spawned.
    pub fn spawn(&mut self, points: &[DVec3], radius: f64, settings: &TerrainSettings) -> usize {
        if !settings.create_particles {
            return 0;
        }
        let volume = 4.0 / 3.0 * PI * radius.powi(3);
        let mut activated = 0.0;
        let mut spawned = 0;
        for &position in points {
            if self.particles.len() >= MAX_PARTICLES
                || activated + volume > settings.maximum_particle_activation_volume
            {
                break;
            }
            activated += volume;
            self.particles.push(SimParticle {
                position: position + DVec3::Z * radius,
                radius,
                rotation: DQuat::IDENTITY,
            });
            spawned += 1;
        }
        spawned
    }

    /// Keeps only particles for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(DVec3) -> bool) -> usize {
        let before = self.particles.len();
        self.particles.retain(|p| keep(p.position));
        before - self.particles.len()
    }

    /// Number of particles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// True if there are no particles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Snapshot of all particles.
    #[must_use]
    pub fn data(&self) -> ParticleData {
        ParticleData {
            positions: self.particles.iter().map(|p| p.position).collect(),
            radii: self.particles.iter().map(|p| p.radius).collect(),
            rotations: self.particles.iter().map(|p| p.rotation).collect(),
        }
    }
}

/// State of a resident terrain, shared with the engine.
#[derive(Debug)]
pub struct TerrainState {
    /// Heights
    pub grid: TerrainGrid,
    /// Particle settings
    pub settings: TerrainSettings,
    /// Soil particles
    pub particles: ParticleStore,
    /// Attached shovels
    pub shovels: Vec<ShovelHandle>,
}

impl TerrainState {
    /// Deforms the grid and spawns particles for the removed soil.
    /// Returns the number of changed vertices.
    pub fn deform(&mut self, world: DVec3, radius: f64, depth: f64) -> usize {
        let changed = self.grid.deform(world, radius, depth);
        let particle_radius = self.grid.element_size() * PARTICLE_RADIUS_FACTOR;
        self.particles
            .spawn(&changed, particle_radius, &self.settings);
        changed.len()
    }

    /// Starts a step: forgets modifications and removes stray particles.
    pub fn begin_step(&mut self) {
        self.grid.clear_modified();
        if self.settings.delete_particles_outside_bounds {
            let grid = &self.grid;
            let removed = self.particles.retain(|p| grid.contains_world(p));
            if removed > 0 {
                debug!("Removed {removed} particles outside the terrain");
            }
        }
    }
}

/// A resident terrain.
pub struct SimTerrain {
    state: Arc<Mutex<TerrainState>>,
    events: Arc<EventLog>,
}

impl SimTerrain {
    pub(crate) fn new(grid: TerrainGrid, events: Arc<EventLog>) -> Self {
        events.push(SimEvent::TerrainCreated);
        Self {
            state: Arc::new(Mutex::new(TerrainState {
                grid,
                settings: TerrainSettings::default(),
                particles: ParticleStore::default(),
                shovels: Vec::new(),
            })),
            events,
        }
    }

    pub(crate) fn state(&self) -> &Arc<Mutex<TerrainState>> {
        &self.state
    }
}

impl NativeTerrain for SimTerrain {
    fn grid_size(&self) -> (usize, usize) {
        self.state.lock().grid.size()
    }

    fn heights(&self, out: &mut Vec<f32>, use_current: bool) {
        self.state.lock().grid.host_heights(out, use_current);
    }

    fn modified_vertices(&self) -> Vec<VertexCoord> {
        self.state.lock().grid.modified_host_vertices()
    }

    fn particle_data(&self) -> ParticleData {
        self.state.lock().particles.data()
    }

    fn set_create_particles(&mut self, enabled: bool) {
        self.state.lock().settings.create_particles = enabled;
    }

    fn create_particles(&self) -> bool {
        self.state.lock().settings.create_particles
    }

    fn set_delete_particles_outside_bounds(&mut self, enabled: bool) {
        self.state.lock().settings.delete_particles_outside_bounds = enabled;
    }

    fn delete_particles_outside_bounds(&self) -> bool {
        self.state.lock().settings.delete_particles_outside_bounds
    }

    fn set_penetration_force_velocity_scaling(&mut self, scaling: f64) {
        self.state.lock().settings.penetration_force_velocity_scaling = scaling;
    }

    fn penetration_force_velocity_scaling(&self) -> f64 {
        self.state.lock().settings.penetration_force_velocity_scaling
    }

    fn set_maximum_particle_activation_volume(&mut self, volume: f64) {
        self.state.lock().settings.maximum_particle_activation_volume = volume;
    }

    fn maximum_particle_activation_volume(&self) -> f64 {
        self.state.lock().settings.maximum_particle_activation_volume
    }

    fn add_shovel(&mut self, shovel: &dyn NativeShovel) -> bool {
        if !follows_edge_convention(shovel) {
            self.events.push(SimEvent::ShovelRejected(shovel.handle()));
            return false;
        }
        self.state.lock().shovels.push(shovel.handle());
        self.events.push(SimEvent::ShovelAdded(shovel.handle()));
        true
    }

    fn transform(&self) -> Transform {
        self.state.lock().grid.transform()
    }

    fn element_size(&self) -> f64 {
        self.state.lock().grid.element_size()
    }
}

impl Drop for SimTerrain {
    fn drop(&mut self) {
        self.events.push(SimEvent::TerrainReleased);
    }
}
