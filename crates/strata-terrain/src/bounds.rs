//! Terrain bounds resolution.
//!
//! Bounds are never cached: every query recomputes them from the current
//! height source and owner transforms.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use strata_common::{ConfigError, Transform};
use tracing::warn;

use crate::source::{HeightSampleSource, HEIGHT_SPAN_HALF_PER_SCALE};

/// Horizontal half extent used for "infinite" bounds.
pub const INFINITE_HALF_EXTENT: f64 = 1.0e10;

/// User-facing description of the wanted bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsRequest {
    /// Cover the whole height source instead of `half_extent`
    pub infinite: bool,
    /// Half extent in the bounds' local frame
    pub half_extent: DVec3,
}

impl Default for BoundsRequest {
    fn default() -> Self {
        Self {
            infinite: false,
            half_extent: DVec3::new(1000.0, 1000.0, 1000.0),
        }
    }
}

/// An oriented box: local frame plus non-negative half extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsSpec {
    /// Centre and orientation of the box
    pub transform: Transform,
    /// Half extent in the local frame
    pub half_extent: DVec3,
}

impl BoundsSpec {
    /// Lower and upper corners expressed in `frame`.
    #[must_use]
    pub fn corners_in(&self, frame: &Transform) -> (DVec3, DVec3) {
        let lower = self.transform.transform_point(-self.half_extent);
        let upper = self.transform.transform_point(self.half_extent);
        (
            frame.inverse_transform_point(lower),
            frame.inverse_transform_point(upper),
        )
    }

    /// Full size of the box.
    #[must_use]
    pub fn size(&self) -> DVec3 {
        self.half_extent * 2.0
    }
}

/// Bounds as requested, oriented like the height source and positioned at the owner.
///
/// Used for display and validation; allocation uses [`resolve_grid_aligned_bounds`].
pub fn resolve_user_bounds(
    source: &dyn HeightSampleSource,
    owner: &Transform,
    request: &BoundsRequest,
) -> Result<BoundsSpec, ConfigError> {
    let half_extent = if request.infinite {
        DVec3::new(
            INFINITE_HALF_EXTENT,
            INFINITE_HALF_EXTENT,
            HEIGHT_SPAN_HALF_PER_SCALE * source.scale().z,
        )
    } else {
        request.half_extent
    };

    if half_extent.x < 0.0 || half_extent.y < 0.0 || half_extent.z < 0.0 {
        warn!(
            "Bounds have a negative half extent ({}, {}, {}), this is not supported",
            half_extent.x, half_extent.y, half_extent.z
        );
        return Err(ConfigError::NegativeHalfExtent {
            x: half_extent.x,
            y: half_extent.y,
            z: half_extent.z,
        });
    }

    Ok(BoundsSpec {
        transform: Transform::new(source.transform().rotation, owner.translation),
        half_extent,
    })
}

/// Bounds snapped inward to the height source cell grid and clamped to its extent.
///
/// The lower corner is rounded up and the upper corner down, per axis, so the
/// region always spans a whole number of cells.
pub fn resolve_grid_aligned_bounds(
    source: &dyn HeightSampleSource,
    owner: &Transform,
    request: &BoundsRequest,
) -> Result<BoundsSpec, ConfigError> {
    let user = resolve_user_bounds(source, owner, request)?;
    let source_frame = source.transform();
    let cell = source.scale();

    let (lower, upper) = user.corners_in(&source_frame);

    let mut lower = DVec3::new(
        (lower.x / cell.x).ceil() * cell.x,
        (lower.y / cell.y).ceil() * cell.y,
        lower.z,
    );
    let mut upper = DVec3::new(
        (upper.x / cell.x).floor() * cell.x,
        (upper.y / cell.y).floor() * cell.y,
        upper.z,
    );

    // Open-world sources have no known extent to clamp against.
    if !source.is_open_world() {
        let size = source.total_size();
        for corner in [&mut lower, &mut upper] {
            corner.x = corner.x.clamp(0.0, size.x);
            corner.y = corner.y.clamp(0.0, size.y);
        }
    }

    let half_x = (upper.x - lower.x) / 2.0;
    let half_y = (upper.y - lower.y) / 2.0;
    if half_x <= 0.0 || half_y <= 0.0 {
        warn!("Bounds collapse to zero size after aligning to the height source grid");
        return Err(ConfigError::DegenerateBounds);
    }

    let center = source_frame.transform_point((lower + upper) * 0.5);
    Ok(BoundsSpec {
        transform: Transform::new(source_frame.rotation, center),
        half_extent: DVec3::new(half_x, half_y, user.half_extent.z),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::GridHeightSource;
    use glam::DQuat;
    use proptest::prelude::*;

    fn source_1000() -> GridHeightSource {
        GridHeightSource::new(10, 10, DVec3::new(100.0, 100.0, 1.0), Transform::IDENTITY)
    }

    fn request(x: f64, y: f64, z: f64) -> BoundsRequest {
        BoundsRequest {
            infinite: false,
            half_extent: DVec3::new(x, y, z),
        }
    }

    fn is_multiple(value: f64, cell: f64) -> bool {
        let k = (value / cell).round();
        (k * cell - value).abs() <= 1e-6 * cell.max(1.0)
    }

    #[test]
    fn test_user_bounds_orientation_and_position() {
        let rotation = DQuat::from_rotation_z(0.5);
        let source = GridHeightSource::new(
            10,
            10,
            DVec3::new(100.0, 100.0, 1.0),
            Transform::new(rotation, DVec3::new(-50.0, 0.0, 0.0)),
        );
        let owner = Transform::new(DQuat::IDENTITY, DVec3::new(1.0, 2.0, 3.0));
        let bounds =
            resolve_user_bounds(&source, &owner, &request(10.0, 20.0, 30.0)).expect("valid");
        assert_eq!(bounds.transform.rotation, rotation);
        assert_eq!(bounds.transform.translation, owner.translation);
        assert_eq!(bounds.half_extent, DVec3::new(10.0, 20.0, 30.0));
    }

    #[test]
    fn test_negative_half_extent_is_invalid() {
        let source = source_1000();
        let result = resolve_user_bounds(&source, &Transform::IDENTITY, &request(1.0, -1.0, 1.0));
        assert!(matches!(result, Err(ConfigError::NegativeHalfExtent { .. })));
        let result =
            resolve_grid_aligned_bounds(&source, &Transform::IDENTITY, &request(1.0, 1.0, -1.0));
        assert!(matches!(result, Err(ConfigError::NegativeHalfExtent { .. })));
    }

    #[test]
    fn test_infinite_uses_sentinel_and_height_span() {
        let source = GridHeightSource::new(
            10,
            10,
            DVec3::new(100.0, 100.0, 2.0),
            Transform::IDENTITY,
        );
        let req = BoundsRequest {
            infinite: true,
            half_extent: DVec3::new(-1.0, -1.0, -1.0),
        };
        let user = resolve_user_bounds(&source, &Transform::IDENTITY, &req).expect("valid");
        assert_eq!(user.half_extent, DVec3::new(1.0e10, 1.0e10, 512.0));

        let aligned =
            resolve_grid_aligned_bounds(&source, &Transform::IDENTITY, &req).expect("valid");
        assert_eq!(aligned.half_extent.x, 500.0);
        assert_eq!(aligned.half_extent.y, 500.0);
        assert_eq!(aligned.transform.translation.truncate(), glam::DVec2::new(500.0, 500.0));
    }

    #[test]
    fn test_snap_inside_source() {
        // Owner in the middle of a 1000x1000 source with 100 unit cells.
        let source = source_1000();
        let owner = Transform::from_translation(DVec3::new(500.0, 500.0, 0.0));
        let bounds =
            resolve_grid_aligned_bounds(&source, &owner, &request(450.0, 450.0, 1000.0))
                .expect("valid");
        assert_eq!(bounds.half_extent, DVec3::new(400.0, 400.0, 1000.0));
        assert_eq!(bounds.transform.translation, DVec3::new(500.0, 500.0, 0.0));
    }

    #[test]
    fn test_snap_and_clamp_at_origin() {
        let source = source_1000();
        let bounds = resolve_grid_aligned_bounds(
            &source,
            &Transform::IDENTITY,
            &request(450.0, 450.0, 1000.0),
        )
        .expect("valid");
        // [-450, 450] snaps to [-400, 400] and clamps to [0, 400].
        assert_eq!(bounds.half_extent, DVec3::new(200.0, 200.0, 1000.0));
        assert_eq!(bounds.transform.translation, DVec3::new(200.0, 200.0, 0.0));
    }

    #[test]
    fn test_degenerate_bounds() {
        let source = source_1000();
        let owner = Transform::from_translation(DVec3::new(550.0, 550.0, 0.0));
        let result = resolve_grid_aligned_bounds(&source, &owner, &request(40.0, 40.0, 10.0));
        assert_eq!(result, Err(ConfigError::DegenerateBounds));

        let outside = Transform::from_translation(DVec3::new(5000.0, 500.0, 0.0));
        let result = resolve_grid_aligned_bounds(&source, &outside, &request(300.0, 300.0, 10.0));
        assert_eq!(result, Err(ConfigError::DegenerateBounds));
    }

    #[test]
    fn test_open_world_skips_clamp() {
        let source = source_1000().with_open_world(true);
        let bounds = resolve_grid_aligned_bounds(
            &source,
            &Transform::IDENTITY,
            &request(450.0, 450.0, 10.0),
        )
        .expect("valid");
        assert_eq!(bounds.half_extent, DVec3::new(400.0, 400.0, 10.0));
        assert_eq!(bounds.transform.translation, DVec3::ZERO);
    }

    proptest! {
        #[test]
        fn prop_grid_aligned_and_contained(
            cell_x in 1.0f64..200.0,
            cell_y in 1.0f64..200.0,
            quads_x in 1usize..64,
            quads_y in 1usize..64,
            owner_x in -2000.0f64..8000.0,
            owner_y in -2000.0f64..8000.0,
            half_x in 0.0f64..5000.0,
            half_y in 0.0f64..5000.0,
            angle in -3.0f64..3.0,
        ) {
            let frame = Transform::new(DQuat::from_rotation_z(angle), DVec3::new(100.0, -300.0, 7.0));
            let source = GridHeightSource::new(quads_x, quads_y, DVec3::new(cell_x, cell_y, 1.0), frame);
            let owner = Transform::from_translation(DVec3::new(owner_x, owner_y, 0.0));
            let req = request(half_x, half_y, 100.0);

            let first = resolve_grid_aligned_bounds(&source, &owner, &req);
            let second = resolve_grid_aligned_bounds(&source, &owner, &req);
            prop_assert_eq!(&first, &second);

            if let Ok(bounds) = first {
                let (lower, upper) = bounds.corners_in(&frame);
                let size = source.total_size();
                let tol = 1e-6 * cell_x.max(cell_y).max(size.x).max(size.y);
                prop_assert!(is_multiple(lower.x, cell_x));
                prop_assert!(is_multiple(lower.y, cell_y));
                prop_assert!(is_multiple(upper.x, cell_x));
                prop_assert!(is_multiple(upper.y, cell_y));
                prop_assert!(lower.x >= -tol && lower.y >= -tol);
                prop_assert!(upper.x <= size.x + tol && upper.y <= size.y + tol);
                prop_assert!(bounds.half_extent.x > 0.0 && bounds.half_extent.y > 0.0);
            }
        }
    }
}
