//! Interfaces to the physics engine.
//!
//! The engine owns the actual terrain, pager and shovel objects. Each is
//! exposed here as an exclusively owned trait object: dropping the box
//! releases the engine object.

use std::sync::Arc;

use glam::{DQuat, DVec3};
use strata_common::{BodyHandle, NativeError, ShovelHandle, TileId, Transform, VertexCoord};

use crate::shovel::{EdgeLine, ExcavationMode, ExcavationSettings, ShovelDesc, ShovelProperties};

/// Snapshot of the engine's soil particles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleData {
    /// World positions
    pub positions: Vec<DVec3>,
    /// Radii
    pub radii: Vec<f64>,
    /// Orientations
    pub rotations: Vec<DQuat>,
}

impl ParticleData {
    /// Number of complete particles (shortest channel).
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions
            .len()
            .min(self.radii.len())
            .min(self.rotations.len())
    }

    /// True if there are no particles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parameters for allocating a terrain from a height grid.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainAllocation {
    /// Heights in host order (`x + y * num_vertices_x`), grid-frame vertical coordinate
    pub heights: Vec<f32>,
    /// Vertices along X
    pub num_vertices_x: usize,
    /// Vertices along Y
    pub num_vertices_y: usize,
    /// Distance between vertices
    pub element_size: f64,
    /// Frame of the terrain centre
    pub transform: Transform,
    /// Maximum excavation depth below the initial surface
    pub max_depth: f64,
}

/// Parameters for allocating a terrain pager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PagerParams {
    /// Vertices per tile side
    pub tile_vertices: usize,
    /// Vertices shared between neighbouring tiles
    pub overlap_vertices: usize,
    /// Distance between vertices
    pub quad_size: f64,
    /// Maximum excavation depth
    pub max_depth: f64,
}

impl PagerParams {
    /// Quads between the origins of two neighbouring tiles.
    #[must_use]
    pub const fn tile_stride(&self) -> usize {
        self.tile_vertices
            .saturating_sub(1)
            .saturating_sub(self.overlap_vertices)
    }
}

/// Height provider called by the pager's background thread when a tile is loaded.
pub trait TileHeightFetcher: Send + Sync {
    /// Heights for the `vertices_x` by `vertices_y` tile whose engine origin
    /// vertex lies at `world_start`, in engine order (row `j` runs opposite
    /// to host rows). `None` means there is no terrain there.
    fn fetch_heights(&self, world_start: DVec3, vertices_x: usize, vertices_y: usize)
        -> Option<Vec<f32>>;
}

/// A non-paged terrain owned by the physics engine.
pub trait NativeTerrain: Send {
    /// `(vertices_x, vertices_y)` of the engine grid.
    fn grid_size(&self) -> (usize, usize);

    /// Copies all heights into `out` in host order. `use_current` selects
    /// deformed heights, otherwise the heights at creation.
    fn heights(&self, out: &mut Vec<f32>, use_current: bool);

    /// Host vertices modified during the last step.
    fn modified_vertices(&self) -> Vec<VertexCoord>;

    /// Current soil particles.
    fn particle_data(&self) -> ParticleData;

    /// Enables particle creation.
    fn set_create_particles(&mut self, enabled: bool);
    /// Particle creation state.
    fn create_particles(&self) -> bool;

    /// Enables removal of particles leaving the terrain bounds.
    fn set_delete_particles_outside_bounds(&mut self, enabled: bool);
    /// Particle removal state.
    fn delete_particles_outside_bounds(&self) -> bool;

    /// Sets the penetration force velocity scaling.
    fn set_penetration_force_velocity_scaling(&mut self, scaling: f64);
    /// Penetration force velocity scaling.
    fn penetration_force_velocity_scaling(&self) -> f64;

    /// Sets the maximum soil volume activated per step.
    fn set_maximum_particle_activation_volume(&mut self, volume: f64);
    /// Maximum soil volume activated per step.
    fn maximum_particle_activation_volume(&self) -> f64;

    /// Registers a shovel. Returns false if the engine rejects it.
    fn add_shovel(&mut self, shovel: &dyn NativeShovel) -> bool;

    /// Frame of the terrain centre.
    fn transform(&self) -> Transform;

    /// Distance between vertices.
    fn element_size(&self) -> f64;
}

/// A paged terrain owned by the physics engine.
pub trait NativeTerrainPager: Send {
    /// Registers a shovel driving tile residency.
    fn add_shovel(
        &mut self,
        shovel: &dyn NativeShovel,
        required_radius: f64,
        preload_radius: f64,
    ) -> bool;

    /// Registers a rigid body driving tile residency.
    fn add_rigid_body(&mut self, body: BodyHandle, required_radius: f64, preload_radius: f64)
        -> bool;

    /// Writes heights modified during the last step into `current` (host
    /// order, `num_vertices_x` by `num_vertices_y`) and returns the touched
    /// host vertices.
    fn modified_heights(
        &self,
        current: &mut [f32],
        num_vertices_x: usize,
        num_vertices_y: usize,
    ) -> Vec<VertexCoord>;

    /// Current soil particles over all loaded tiles.
    fn particle_data(&self) -> ParticleData;

    /// World position tile `(0, 0)` is placed relative to.
    fn reference_point(&self) -> DVec3;

    /// Orientation of the tile grid.
    fn reference_rotation(&self) -> DQuat;

    /// Frames of all loaded tiles.
    fn active_tile_transforms(&self) -> Vec<(TileId, Transform)>;
}

/// A shovel owned by the physics engine.
pub trait NativeShovel: Send {
    /// Engine handle.
    fn handle(&self) -> ShovelHandle;
    /// Body the shovel is attached to.
    fn owner(&self) -> BodyHandle;

    /// Top edge, body frame.
    fn top_edge(&self) -> EdgeLine;
    /// Replaces the top edge.
    fn set_top_edge(&mut self, edge: EdgeLine);

    /// Cutting edge, body frame.
    fn cutting_edge(&self) -> EdgeLine;
    /// Replaces the cutting edge.
    fn set_cutting_edge(&mut self, edge: EdgeLine);

    /// Digging direction, body frame.
    fn cutting_direction(&self) -> DVec3;

    /// Tuning values.
    fn properties(&self) -> ShovelProperties;
    /// Replaces the tuning values.
    fn set_properties(&mut self, properties: ShovelProperties);

    /// Settings for one excavation mode.
    fn excavation_settings(&self, mode: ExcavationMode) -> ExcavationSettings;
    /// Replaces the settings for one excavation mode.
    fn set_excavation_settings(&mut self, mode: ExcavationMode, settings: ExcavationSettings);
}

/// Factory for engine objects.
pub trait PhysicsEngine {
    /// Allocates a terrain from a height grid.
    fn create_terrain(
        &self,
        allocation: TerrainAllocation,
    ) -> Result<Box<dyn NativeTerrain>, NativeError>;

    /// Allocates a pager using `base` as the template terrain.
    ///
    /// `fetcher` is called from the pager's own thread.
    fn create_terrain_pager(
        &self,
        fetcher: Arc<dyn TileHeightFetcher>,
        base: &dyn NativeTerrain,
        params: PagerParams,
    ) -> Result<Box<dyn NativeTerrainPager>, NativeError>;

    /// Allocates a shovel.
    fn create_shovel(&self, desc: &ShovelDesc) -> Result<Box<dyn NativeShovel>, NativeError>;

    /// True if `body` refers to a live body.
    fn has_body(&self, body: BodyHandle) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_stride() {
        let params = PagerParams {
            tile_vertices: 21,
            overlap_vertices: 2,
            quad_size: 100.0,
            max_depth: 200.0,
        };
        assert_eq!(params.tile_stride(), 18);
    }

    #[test]
    fn test_particle_len_uses_shortest_channel() {
        let data = ParticleData {
            positions: vec![DVec3::ZERO; 3],
            radii: vec![1.0; 2],
            rotations: vec![DQuat::IDENTITY; 3],
        };
        assert_eq!(data.len(), 2);
        assert!(!data.is_empty());
        assert!(ParticleData::default().is_empty());
    }
}
