//! Shovel descriptions and attachment to a terrain.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use strata_common::{BodyHandle, NativeError};
use tracing::{error, warn};

use crate::native::NativeShovel;

/// A line segment in the owning body's frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeLine {
    /// First endpoint
    pub start: DVec3,
    /// Second endpoint
    pub end: DVec3,
}

impl EdgeLine {
    /// Creates a new edge.
    #[must_use]
    pub const fn new(start: DVec3, end: DVec3) -> Self {
        Self { start, end }
    }

    /// The same edge with its endpoints exchanged.
    #[must_use]
    pub const fn swapped(self) -> Self {
        Self {
            start: self.end,
            end: self.start,
        }
    }

    /// Vector from `start` to `end`.
    #[must_use]
    pub fn direction(&self) -> DVec3 {
        self.end - self.start
    }
}

/// The four excavation modes of a shovel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExcavationMode {
    /// Digging along the cutting direction
    Primary,
    /// Deformation behind the blade
    DeformBack,
    /// Deformation to the right of the blade
    DeformRight,
    /// Deformation to the left of the blade
    DeformLeft,
}

impl ExcavationMode {
    /// All modes, in engine order.
    pub const ALL: [Self; 4] = [
        Self::Primary,
        Self::DeformBack,
        Self::DeformRight,
        Self::DeformLeft,
    ];

    /// Index into a per-mode array.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::DeformBack => 1,
            Self::DeformRight => 2,
            Self::DeformLeft => 3,
        }
    }
}

/// Per-mode excavation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcavationSettings {
    /// Mode is active
    pub enabled: bool,
    /// Soil removed in this mode becomes dynamic mass
    pub enable_create_dynamic_mass: bool,
    /// Soil resistance is fed back to the shovel body
    pub enable_force_feedback: bool,
}

impl Default for ExcavationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_create_dynamic_mass: true,
            enable_force_feedback: true,
        }
    }
}

/// Tuning values for a shovel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShovelProperties {
    /// Distance from the blade within which soil merges into the terrain
    pub vertical_blade_soil_merge_distance: f64,
    /// Extension of the no-merge zone past the cutting edge
    pub no_merge_extension_distance: f64,
    /// Scaling of the penetration resistance force
    pub penetration_force_scaling: f64,
    /// Remove all contacts between the shovel and the terrain
    pub always_remove_shovel_contacts: bool,
    /// Radius that must be resident around the shovel (paging only)
    pub required_radius: f64,
    /// Radius that should be preloaded around the shovel (paging only)
    pub preload_radius: f64,
}

impl Default for ShovelProperties {
    fn default() -> Self {
        Self {
            vertical_blade_soil_merge_distance: 0.0,
            no_merge_extension_distance: 0.0,
            penetration_force_scaling: 1.0,
            always_remove_shovel_contacts: false,
            required_radius: 600.0,
            preload_radius: 1000.0,
        }
    }
}

/// Everything needed to create a shovel in the physics engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ShovelDesc {
    /// Body the shovel is attached to
    pub owner: BodyHandle,
    /// Top edge, body frame
    pub top_edge: EdgeLine,
    /// Cutting edge, body frame
    pub cutting_edge: EdgeLine,
    /// Digging direction, body frame
    pub cutting_direction: DVec3,
    /// Tuning values
    pub properties: ShovelProperties,
    /// Settings per excavation mode, indexed by [`ExcavationMode::index`]
    pub excavation: [ExcavationSettings; 4],
}

impl ShovelDesc {
    /// Creates a shovel description with default tuning.
    #[must_use]
    pub fn new(
        owner: BodyHandle,
        top_edge: EdgeLine,
        cutting_edge: EdgeLine,
        cutting_direction: DVec3,
    ) -> Self {
        Self {
            owner,
            top_edge,
            cutting_edge,
            cutting_direction,
            properties: ShovelProperties::default(),
            excavation: [ExcavationSettings::default(); 4],
        }
    }

    /// Settings for one excavation mode.
    #[must_use]
    pub const fn excavation_settings(&self, mode: ExcavationMode) -> ExcavationSettings {
        self.excavation[mode.index()]
    }
}

/// Writes the per-mode excavation settings of `desc` to a native shovel.
pub fn apply_excavation_settings(shovel: &mut dyn NativeShovel, desc: &ShovelDesc) {
    for mode in ExcavationMode::ALL {
        shovel.set_excavation_settings(mode, desc.excavation_settings(mode));
    }
}

/// Adds a shovel through `add`, retrying once with both edges reversed if
/// the engine rejects the first attempt.
///
/// Returns whether the edges had to be swapped.
pub fn attach_with_edge_fallback(
    shovel: &mut dyn NativeShovel,
    mut add: impl FnMut(&dyn NativeShovel) -> bool,
) -> Result<bool, NativeError> {
    if add(&*shovel) {
        return Ok(false);
    }

    warn!(
        "Shovel {} was rejected by the terrain, retrying with swapped edges",
        shovel.handle().raw()
    );
    let top = shovel.top_edge();
    let cutting = shovel.cutting_edge();
    shovel.set_top_edge(top.swapped());
    shovel.set_cutting_edge(cutting.swapped());

    if add(&*shovel) {
        warn!(
            "Shovel {} with reversed edges added successfully, consider flipping its edges",
            shovel.handle().raw()
        );
        return Ok(true);
    }

    error!(
        "Shovel {} was rejected by the terrain even with swapped edges",
        shovel.handle().raw()
    );
    Err(NativeError::Rejected(format!(
        "shovel {}",
        shovel.handle().raw()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;
    use strata_common::ShovelHandle;

    /// Collects formatted log output.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, buffer.contents())
    }

    struct TestShovel {
        handle: ShovelHandle,
        top: EdgeLine,
        cutting: EdgeLine,
        settings: [ExcavationSettings; 4],
    }

    impl TestShovel {
        fn new() -> Self {
            Self {
                handle: ShovelHandle::new(),
                top: EdgeLine::new(DVec3::ZERO, DVec3::X),
                cutting: EdgeLine::new(DVec3::Z, DVec3::X + DVec3::Z),
                settings: [ExcavationSettings::default(); 4],
            }
        }
    }

    impl NativeShovel for TestShovel {
        fn handle(&self) -> ShovelHandle {
            self.handle
        }
        fn owner(&self) -> BodyHandle {
            BodyHandle::NULL
        }
        fn top_edge(&self) -> EdgeLine {
            self.top
        }
        fn set_top_edge(&mut self, edge: EdgeLine) {
            self.top = edge;
        }
        fn cutting_edge(&self) -> EdgeLine {
            self.cutting
        }
        fn set_cutting_edge(&mut self, edge: EdgeLine) {
            self.cutting = edge;
        }
        fn cutting_direction(&self) -> DVec3 {
            DVec3::Y
        }
        fn properties(&self) -> ShovelProperties {
            ShovelProperties::default()
        }
        fn set_properties(&mut self, _properties: ShovelProperties) {}
        fn excavation_settings(&self, mode: ExcavationMode) -> ExcavationSettings {
            self.settings[mode.index()]
        }
        fn set_excavation_settings(&mut self, mode: ExcavationMode, settings: ExcavationSettings) {
            self.settings[mode.index()] = settings;
        }
    }

    #[test]
    fn test_accepted_first_time() {
        let mut shovel = TestShovel::new();
        let mut attempts = 0;
        let swapped = attach_with_edge_fallback(&mut shovel, |_| {
            attempts += 1;
            true
        });
        assert_eq!(swapped, Ok(false));
        assert_eq!(attempts, 1);
        assert_eq!(shovel.top.start, DVec3::ZERO);
    }

    #[test]
    fn test_swap_and_retry_once() {
        let mut shovel = TestShovel::new();
        let mut attempts = 0;
        let swapped = attach_with_edge_fallback(&mut shovel, |s| {
            attempts += 1;
            s.top_edge().start == DVec3::X
        });
        assert_eq!(swapped, Ok(true));
        assert_eq!(attempts, 2);
        assert_eq!(shovel.cutting.start, DVec3::X + DVec3::Z);
    }

    #[test]
    fn test_swap_success_is_reported() {
        let mut shovel = TestShovel::new();
        let (swapped, logs) = with_captured_logs(|| {
            attach_with_edge_fallback(&mut shovel, |s| s.top_edge().start == DVec3::X)
        });
        assert_eq!(swapped, Ok(true));
        assert!(logs.contains("reversed edges added successfully"));

        let mut straight = TestShovel::new();
        let (_, logs) = with_captured_logs(|| attach_with_edge_fallback(&mut straight, |_| true));
        assert!(!logs.contains("reversed edges"));
    }

    #[test]
    fn test_rejected_twice_gives_up() {
        let mut shovel = TestShovel::new();
        let mut attempts = 0;
        let result = attach_with_edge_fallback(&mut shovel, |_| {
            attempts += 1;
            false
        });
        assert!(matches!(result, Err(NativeError::Rejected(_))));
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_apply_excavation_settings() {
        let mut shovel = TestShovel::new();
        let mut desc = ShovelDesc::new(
            BodyHandle::new(),
            shovel.top,
            shovel.cutting,
            DVec3::Y,
        );
        desc.excavation[ExcavationMode::DeformLeft.index()].enabled = false;
        apply_excavation_settings(&mut shovel, &desc);
        assert!(!shovel.excavation_settings(ExcavationMode::DeformLeft).enabled);
        assert!(shovel.excavation_settings(ExcavationMode::Primary).enabled);
    }
}
