//! Mapping between world positions and integer grid vertices.
//!
//! The terrain grid is laid out in the local frame of the grid-aligned
//! bounds. Host vertex `(0, 0)` sits at the lower corner
//! `(-half_extent_x, -half_extent_y)`, vertex `(x, y)` at
//! `(x * cell_x, y * cell_y)` from there.

use glam::{DVec2, DVec3};
use strata_common::{ConfigError, Transform, VertexCoord};

use crate::bounds::BoundsSpec;
use crate::source::HeightSampleSource;

/// Upper limit on the number of vertices a single height cache may hold.
pub const MAX_CACHE_VERTICES: usize = 1 << 26;

/// World/grid conversions for one resolved terrain grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCoordinateMapper {
    frame: Transform,
    cell_size: DVec2,
    num_vertices_x: usize,
    num_vertices_y: usize,
}

impl GridCoordinateMapper {
    /// Builds the grid covering `bounds` with cells of `cell_size`.
    ///
    /// `num_vertices = round(2 * half_extent / cell_size) + 1` per axis.
    pub fn new(bounds: &BoundsSpec, cell_size: DVec2) -> Result<Self, ConfigError> {
        let count = |half: f64, cell: f64| -> f64 { (2.0 * half / cell).round() + 1.0 };
        let num_x = count(bounds.half_extent.x, cell_size.x);
        let num_y = count(bounds.half_extent.y, cell_size.y);

        let requested = num_x * num_y;
        if !requested.is_finite() || requested > MAX_CACHE_VERTICES as f64 {
            return Err(ConfigError::TooManyVertices {
                requested: if requested.is_finite() {
                    requested as u128
                } else {
                    u128::MAX
                },
                limit: MAX_CACHE_VERTICES as u128,
            });
        }

        Ok(Self {
            frame: bounds.transform,
            cell_size,
            num_vertices_x: num_x as usize,
            num_vertices_y: num_y as usize,
        })
    }

    /// Vertices along X.
    #[must_use]
    pub const fn num_vertices_x(&self) -> usize {
        self.num_vertices_x
    }

    /// Vertices along Y.
    #[must_use]
    pub const fn num_vertices_y(&self) -> usize {
        self.num_vertices_y
    }

    /// Total vertex count.
    #[must_use]
    pub const fn num_vertices(&self) -> usize {
        self.num_vertices_x * self.num_vertices_y
    }

    /// Cell size along X and Y.
    #[must_use]
    pub const fn cell_size(&self) -> DVec2 {
        self.cell_size
    }

    /// Frame of the grid (bounds centre and orientation).
    #[must_use]
    pub const fn frame(&self) -> Transform {
        self.frame
    }

    /// Vertex at the middle of the grid, rounded down.
    #[must_use]
    pub const fn center_vertex(&self) -> VertexCoord {
        VertexCoord::new(
            (self.num_vertices_x / 2) as i64,
            (self.num_vertices_y / 2) as i64,
        )
    }

    /// Half extent actually covered by the vertices.
    #[must_use]
    pub fn covered_half_extent(&self) -> DVec2 {
        DVec2::new(
            (self.num_vertices_x.saturating_sub(1)) as f64 * self.cell_size.x,
            (self.num_vertices_y.saturating_sub(1)) as f64 * self.cell_size.y,
        ) * 0.5
    }

    /// Position of a host vertex in the grid frame, with zero height.
    #[must_use]
    pub fn vertex_local(&self, vertex: VertexCoord) -> DVec2 {
        let half = self.covered_half_extent();
        DVec2::new(
            vertex.x as f64 * self.cell_size.x - half.x,
            vertex.y as f64 * self.cell_size.y - half.y,
        )
    }

    /// World position of a host vertex on the grid plane.
    #[must_use]
    pub fn vertex_world(&self, vertex: VertexCoord) -> DVec3 {
        self.frame.transform_point(self.vertex_local(vertex).extend(0.0))
    }

    /// Nearest host vertex to a world position. May lie outside the grid.
    #[must_use]
    pub fn world_to_vertex(&self, world: DVec3) -> VertexCoord {
        let local = self.frame.inverse_transform_point(world);
        let half = self.covered_half_extent();
        VertexCoord::new(
            ((local.x + half.x) / self.cell_size.x).round() as i64,
            ((local.y + half.y) / self.cell_size.y).round() as i64,
        )
    }

    /// Clamps a vertex into the grid.
    #[must_use]
    pub fn clamp_vertex(&self, vertex: VertexCoord) -> VertexCoord {
        VertexCoord::new(
            vertex.x.clamp(0, self.num_vertices_x as i64 - 1),
            vertex.y.clamp(0, self.num_vertices_y as i64 - 1),
        )
    }

    /// Host vertex to physics engine (row mirrored) vertex.
    #[must_use]
    pub const fn host_to_native(&self, host: VertexCoord) -> VertexCoord {
        host.mirror_row(self.num_vertices_y)
    }

    /// Physics engine vertex to host vertex.
    #[must_use]
    pub const fn native_to_host(&self, native: VertexCoord) -> VertexCoord {
        native.mirror_row(self.num_vertices_y)
    }

    /// Converts a world-space height above `world_xy` to a grid-frame height.
    #[must_use]
    pub fn height_to_local(&self, world_xy: DVec2, world_z: f64) -> f64 {
        self.frame
            .inverse_transform_point(world_xy.extend(world_z))
            .z
    }

    /// Samples the source at a host vertex and returns the grid-frame height.
    ///
    /// Returns `None` if the source has no data there.
    pub fn sample_vertex(
        &self,
        source: &dyn HeightSampleSource,
        vertex: VertexCoord,
    ) -> Option<f32> {
        let world = snap_to_source_grid(source, self.vertex_world(vertex));
        let height = source.height_at_world(world)?;
        Some(self.height_to_local(world, height) as f32)
    }
}

/// Snaps a world position to the nearest height source vertex, in world XY.
#[must_use]
pub fn snap_to_source_grid(source: &dyn HeightSampleSource, world: DVec3) -> DVec2 {
    let frame = source.transform();
    let cell = source.scale();
    let local = frame.inverse_transform_point(world);
    let snapped = DVec3::new(
        (local.x / cell.x).round() * cell.x,
        (local.y / cell.y).round() * cell.y,
        local.z,
    );
    frame.transform_point(snapped).truncate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::GridHeightSource;
    use glam::DQuat;

    fn bounds(center: DVec3, half: DVec3) -> BoundsSpec {
        BoundsSpec {
            transform: Transform::from_translation(center),
            half_extent: half,
        }
    }

    #[test]
    fn test_vertex_counts() {
        let b = bounds(DVec3::new(500.0, 500.0, 0.0), DVec3::new(400.0, 250.0, 10.0));
        let grid = GridCoordinateMapper::new(&b, DVec2::splat(100.0)).expect("fits");
        assert_eq!(grid.num_vertices_x(), 9);
        assert_eq!(grid.num_vertices_y(), 6);
        assert_eq!(grid.num_vertices(), 54);
        assert_eq!(grid.center_vertex(), VertexCoord::new(4, 3));
    }

    #[test]
    fn test_vertex_world_roundtrip() {
        let b = BoundsSpec {
            transform: Transform::new(DQuat::from_rotation_z(0.3), DVec3::new(10.0, 20.0, 5.0)),
            half_extent: DVec3::new(250.0, 200.0, 10.0),
        };
        let grid = GridCoordinateMapper::new(&b, DVec2::splat(50.0)).expect("fits");
        for vertex in [VertexCoord::new(0, 0), VertexCoord::new(3, 7), VertexCoord::new(10, 8)] {
            assert_eq!(grid.world_to_vertex(grid.vertex_world(vertex)), vertex);
        }
        let lower = grid.vertex_world(VertexCoord::new(0, 0));
        let expected = b.transform.transform_point(DVec3::new(-250.0, -200.0, 0.0));
        assert!((lower - expected).length() < 1e-9);
    }

    #[test]
    fn test_even_vertex_count_spans_bounds() {
        let b = bounds(DVec3::new(550.0, 550.0, 0.0), DVec3::new(250.0, 250.0, 1.0));
        let grid = GridCoordinateMapper::new(&b, DVec2::splat(100.0)).expect("fits");
        assert_eq!(grid.num_vertices_x(), 6);
        assert_eq!(grid.vertex_world(VertexCoord::new(0, 0)).x, 300.0);
        assert_eq!(grid.vertex_world(VertexCoord::new(5, 0)).x, 800.0);
    }

    #[test]
    fn test_clamp_and_mirror() {
        let b = bounds(DVec3::ZERO, DVec3::new(200.0, 200.0, 1.0));
        let grid = GridCoordinateMapper::new(&b, DVec2::splat(100.0)).expect("fits");
        assert_eq!(grid.clamp_vertex(VertexCoord::new(-3, 9)), VertexCoord::new(0, 4));
        let host = VertexCoord::new(1, 0);
        assert_eq!(grid.host_to_native(host), VertexCoord::new(1, 4));
        assert_eq!(grid.native_to_host(grid.host_to_native(host)), host);
    }

    #[test]
    fn test_too_many_vertices() {
        let b = bounds(DVec3::ZERO, DVec3::new(1.0e10, 1.0e10, 1.0));
        let result = GridCoordinateMapper::new(&b, DVec2::splat(1.0));
        assert!(matches!(result, Err(ConfigError::TooManyVertices { .. })));
    }

    #[test]
    fn test_sample_vertex_uses_grid_frame_height() {
        let source = GridHeightSource::from_fn(
            10,
            10,
            DVec3::new(100.0, 100.0, 1.0),
            Transform::from_translation(DVec3::new(0.0, 0.0, 30.0)),
            |x, y| (x + y) as f32,
        );
        let b = bounds(DVec3::new(500.0, 500.0, 10.0), DVec3::new(400.0, 400.0, 100.0));
        let grid = GridCoordinateMapper::new(&b, DVec2::splat(100.0)).expect("fits");
        // Host (0, 0) is source vertex (1, 1): local height 2, world 32, grid 22.
        let h = grid
            .sample_vertex(&source, VertexCoord::new(0, 0))
            .expect("inside");
        assert!((h - 22.0).abs() < 1e-6);
    }

    #[test]
    fn test_snap_to_source_grid() {
        let source = GridHeightSource::new(10, 10, DVec3::new(100.0, 100.0, 1.0), Transform::IDENTITY);
        let snapped = snap_to_source_grid(&source, DVec3::new(149.0, 251.0, 0.0));
        assert_eq!(snapped, DVec2::new(100.0, 300.0));
    }
}
