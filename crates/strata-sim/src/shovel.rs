//! Engine-side shovels.

use glam::DVec3;
use strata_common::{BodyHandle, ShovelHandle};
use strata_terrain::{
    EdgeLine, ExcavationMode, ExcavationSettings, NativeShovel, ShovelDesc, ShovelProperties,
};

/// True if the cutting edge runs so that the digging direction points to
/// its left, seen from above. Terrains refuse shovels that do not.
#[must_use]
pub fn follows_edge_convention(shovel: &dyn NativeShovel) -> bool {
    shovel
        .cutting_edge()
        .direction()
        .cross(shovel.cutting_direction())
        .z
        >= 0.0
}

/// A shovel owned by [`crate::SimEngine`].
#[derive(Debug, Clone)]
pub struct SimShovel {
    handle: ShovelHandle,
    owner: BodyHandle,
    top_edge: EdgeLine,
    cutting_edge: EdgeLine,
    cutting_direction: DVec3,
    properties: ShovelProperties,
    excavation: [ExcavationSettings; 4],
}

impl SimShovel {
    /// Creates a shovel from its description.
    #[must_use]
    pub fn from_desc(desc: &ShovelDesc) -> Self {
        Self {
            handle: ShovelHandle::new(),
            owner: desc.owner,
            top_edge: desc.top_edge,
            cutting_edge: desc.cutting_edge,
            cutting_direction: desc.cutting_direction,
            properties: desc.properties,
            excavation: desc.excavation,
        }
    }
}

impl NativeShovel for SimShovel {
    fn handle(&self) -> ShovelHandle {
        self.handle
    }

    fn owner(&self) -> BodyHandle {
        self.owner
    }

    fn top_edge(&self) -> EdgeLine {
        self.top_edge
    }

    fn set_top_edge(&mut self, edge: EdgeLine) {
        self.top_edge = edge;
    }

    fn cutting_edge(&self) -> EdgeLine {
        self.cutting_edge
    }

    fn set_cutting_edge(&mut self, edge: EdgeLine) {
        self.cutting_edge = edge;
    }

    fn cutting_direction(&self) -> DVec3 {
        self.cutting_direction
    }

    fn properties(&self) -> ShovelProperties {
        self.properties
    }

    fn set_properties(&mut self, properties: ShovelProperties) {
        self.properties = properties;
    }

    fn excavation_settings(&self, mode: ExcavationMode) -> ExcavationSettings {
        self.excavation[mode.index()]
    }

    fn set_excavation_settings(&mut self, mode: ExcavationMode, settings: ExcavationSettings) {
        self.excavation[mode.index()] = settings;
    }
}
