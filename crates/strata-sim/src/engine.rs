//! In-memory physics engine.
//!
//! Objects are handed out as boxes; the engine keeps weak references so a
//! step reaches every live terrain and pager without owning them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use glam::DVec3;
use parking_lot::Mutex;
use strata_common::{BodyHandle, NativeError};
use strata_terrain::{
    NativeShovel, NativeTerrain, NativeTerrainPager, PagerParams, PhysicsEngine, ShovelDesc,
    TerrainAllocation, TileHeightFetcher,
};
use tracing::{debug, trace};

use crate::pager::{PagerState, SimTerrainPager};
use crate::shovel::SimShovel;
use crate::terrain::{SimTerrain, TerrainGrid, TerrainState};
use crate::world::{EventLog, SimWorld};

/// A queued excavation, applied during the next step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Excavation {
    /// World point the cut is centred on
    pub point: DVec3,
    /// Radius of the cut
    pub radius: f64,
    /// Depth at the centre
    pub depth: f64,
}

/// Outcome of one [`SimEngine::step`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Vertices lowered by excavations
    pub deformed_vertices: usize,
    /// Tiles resident after the step
    pub loaded_tiles: usize,
}

/// Physics engine backed by plain memory.
#[derive(Default)]
pub struct SimEngine {
    world: SimWorld,
    events: Arc<EventLog>,
    terrains: Mutex<Vec<Weak<Mutex<TerrainState>>>>,
    pagers: Mutex<Vec<Weak<PagerState>>>,
    excavations: Mutex<Vec<Excavation>>,
    refuse_terrains: AtomicBool,
    refuse_pagers: AtomicBool,
}

impl SimEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bodies.
    #[must_use]
    pub const fn world(&self) -> &SimWorld {
        &self.world
    }

    /// Object lifecycle events.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Adds a body at `position`.
    pub fn create_body(&self, position: DVec3) -> BodyHandle {
        self.world.create_body(position)
    }

    /// Moves a body. Returns false if it does not exist.
    pub fn set_body_position(&self, body: BodyHandle, position: DVec3) -> bool {
        self.world.set_body_position(body, position)
    }

    /// Makes terrain allocations fail.
    pub fn set_refuse_terrains(&self, refuse: bool) {
        self.refuse_terrains.store(refuse, Ordering::Relaxed);
    }

    /// Makes pager allocations fail.
    pub fn set_refuse_pagers(&self, refuse: bool) {
        self.refuse_pagers.store(refuse, Ordering::Relaxed);
    }

    /// Queues a conical cut for the next step.
    pub fn excavate(&self, point: DVec3, radius: f64, depth: f64) {
        self.excavations.lock().push(Excavation {
            point,
            radius,
            depth,
        });
    }

    /// Number of terrains alive.
    #[must_use]
    pub fn live_terrains(&self) -> usize {
        self.live(&self.terrains).len()
    }

    /// Number of pagers alive.
    #[must_use]
    pub fn live_pagers(&self) -> usize {
        self.live(&self.pagers).len()
    }

    /// Advances the simulation: forgets last step's modifications, updates
    /// tile residency, then applies queued excavations.
    pub fn step(&self) -> StepReport {
        let terrains = self.live(&self.terrains);
        let pagers = self.live(&self.pagers);

        for terrain in &terrains {
            terrain.lock().begin_step();
        }
        for pager in &pagers {
            pager.begin_step();
            pager.update_residency(&self.world);
        }

        let excavations = std::mem::take(&mut *self.excavations.lock());
        let mut report = StepReport::default();
        for cut in &excavations {
            for terrain in &terrains {
                report.deformed_vertices += terrain.lock().deform(cut.point, cut.radius, cut.depth);
            }
            for pager in &pagers {
                report.deformed_vertices += pager.deform(cut.point, cut.radius, cut.depth);
            }
        }
        report.loaded_tiles = pagers.iter().map(|pager| pager.loaded_tiles()).sum();
        trace!(
            "Step: {} excavations, {} vertices deformed",
            excavations.len(),
            report.deformed_vertices
        );
        report
    }

    /// Upgrades the live entries and drops the dead ones.
    fn live<T>(&self, list: &Mutex<Vec<Weak<T>>>) -> Vec<Arc<T>> {
        let mut list = list.lock();
        list.retain(|weak| weak.strong_count() > 0);
        list.iter().filter_map(Weak::upgrade).collect()
    }
}

impl PhysicsEngine for SimEngine {
    fn create_terrain(
        &self,
        allocation: TerrainAllocation,
    ) -> Result<Box<dyn NativeTerrain>, NativeError> {
        if self.refuse_terrains.load(Ordering::Relaxed) {
            return Err(NativeError::AllocationFailed("terrains are refused".into()));
        }
        let grid = TerrainGrid::from_allocation(&allocation).ok_or_else(|| {
            NativeError::AllocationFailed(format!(
                "{} heights for a {}x{} grid",
                allocation.heights.len(),
                allocation.num_vertices_x,
                allocation.num_vertices_y
            ))
        })?;
        let terrain = SimTerrain::new(grid, Arc::clone(&self.events));
        self.terrains.lock().push(Arc::downgrade(terrain.state()));
        debug!(
            "Created {}x{} terrain",
            allocation.num_vertices_x, allocation.num_vertices_y
        );
        Ok(Box::new(terrain))
    }

    fn create_terrain_pager(
        &self,
        fetcher: Arc<dyn TileHeightFetcher>,
        base: &dyn NativeTerrain,
        params: PagerParams,
    ) -> Result<Box<dyn NativeTerrainPager>, NativeError> {
        if self.refuse_pagers.load(Ordering::Relaxed) {
            return Err(NativeError::AllocationFailed("pagers are refused".into()));
        }
        let pager = SimTerrainPager::spawn(fetcher, base, params, Arc::clone(&self.events))?;
        self.pagers.lock().push(Arc::downgrade(pager.state()));
        Ok(Box::new(pager))
    }

    fn create_shovel(&self, desc: &ShovelDesc) -> Result<Box<dyn NativeShovel>, NativeError> {
        if !self.world.has_body(desc.owner) {
            return Err(NativeError::NoNative("shovel owner body"));
        }
        Ok(Box::new(SimShovel::from_desc(desc)))
    }

    fn has_body(&self, body: BodyHandle) -> bool {
        self.world.has_body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::Transform;

    fn allocation() -> TerrainAllocation {
        TerrainAllocation {
            heights: vec![1.0; 9],
            num_vertices_x: 3,
            num_vertices_y: 3,
            element_size: 1.0,
            transform: Transform::IDENTITY,
            max_depth: 10.0,
        }
    }

    #[test]
    fn test_terrain_lifetime_tracked() {
        let engine = SimEngine::new();
        let terrain = engine.create_terrain(allocation()).expect("allocates");
        assert_eq!(engine.live_terrains(), 1);
        drop(terrain);
        assert_eq!(engine.live_terrains(), 0);
    }

    #[test]
    fn test_excavation_applied_on_step() {
        let engine = SimEngine::new();
        let terrain = engine.create_terrain(allocation()).expect("allocates");
        engine.excavate(DVec3::ZERO, 0.5, 2.0);
        assert!(terrain.modified_vertices().is_empty());

        let report = engine.step();
        assert_eq!(report.deformed_vertices, 1);
        let mut heights = Vec::new();
        terrain.heights(&mut heights, true);
        assert_eq!(heights[4], -1.0);
        assert_eq!(terrain.modified_vertices().len(), 1);

        engine.step();
        assert!(terrain.modified_vertices().is_empty());
    }

    #[test]
    fn test_wrong_allocation_rejected() {
        let engine = SimEngine::new();
        let mut bad = allocation();
        bad.heights.truncate(4);
        assert!(matches!(
            engine.create_terrain(bad),
            Err(NativeError::AllocationFailed(_))
        ));
    }

    #[test]
    fn test_shovel_needs_owner() {
        let engine = SimEngine::new();
        let desc = ShovelDesc::new(
            BodyHandle::new(),
            strata_terrain::EdgeLine::default(),
            strata_terrain::EdgeLine::default(),
            DVec3::X,
        );
        assert!(engine.create_shovel(&desc).is_err());

        let body = engine.create_body(DVec3::ZERO);
        let desc = ShovelDesc { owner: body, ..desc };
        assert!(engine.create_shovel(&desc).is_ok());
    }
}
