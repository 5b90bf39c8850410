//! Authoritative height data the terrain is derived from.
//!
//! The [`HeightSampleSource`] trait is the only view the terrain core has of
//! the landscape. [`GridHeightSource`] is a regular-grid implementation.

use glam::{DVec2, DVec3};
use parking_lot::RwLock;
use strata_common::Transform;

/// Vertical half span of a height source at vertical scale 1.
pub const HEIGHT_SPAN_HALF_PER_SCALE: f64 = 256.0;

/// Anything that can answer "what is the height at this world column".
///
/// Implementations are queried from the background paging thread and must be
/// fast, synchronous, in-memory lookups.
pub trait HeightSampleSource: Send + Sync {
    /// World-space surface height at `world_xy`, or `None` if no data exists there.
    fn height_at_world(&self, world_xy: DVec2) -> Option<f64>;

    /// `(cell_size_x, cell_size_y, vertical_scale_z)`.
    fn scale(&self) -> DVec3;

    /// Placement of the source's local frame. Local vertex `(i, j)` sits at
    /// `(i * cell_size_x, j * cell_size_y)`.
    fn transform(&self) -> Transform;

    /// Local extent `(size_x, size_y)` in world units.
    fn total_size(&self) -> DVec2;

    /// True when the total extent is not known, which disables bounds clamping.
    fn is_open_world(&self) -> bool {
        false
    }
}

/// Height source backed by a regular grid of vertex heights.
///
/// Heights are local to the source frame. A NaN height marks a hole.
pub struct GridHeightSource {
    num_quads_x: usize,
    num_quads_y: usize,
    scale: DVec3,
    transform: Transform,
    open_world: bool,
    heights: RwLock<Vec<f32>>,
}

impl GridHeightSource {
    /// Creates a flat source of `num_quads_x` by `num_quads_y` quads.
    #[must_use]
    pub fn new(num_quads_x: usize, num_quads_y: usize, scale: DVec3, transform: Transform) -> Self {
        Self::from_fn(num_quads_x, num_quads_y, scale, transform, |_, _| 0.0)
    }

    /// Creates a source whose vertex `(x, y)` has local height `f(x, y)`.
    pub fn from_fn(
        num_quads_x: usize,
        num_quads_y: usize,
        scale: DVec3,
        transform: Transform,
        f: impl Fn(usize, usize) -> f32,
    ) -> Self {
        let vx = num_quads_x + 1;
        let vy = num_quads_y + 1;
        let mut heights = Vec::with_capacity(vx * vy);
        for y in 0..vy {
            for x in 0..vx {
                heights.push(f(x, y));
            }
        }
        Self {
            num_quads_x,
            num_quads_y,
            scale,
            transform,
            open_world: false,
            heights: RwLock::new(heights),
        }
    }

    /// Marks the source as open world (unknown total extent).
    #[must_use]
    pub fn with_open_world(mut self, open_world: bool) -> Self {
        self.open_world = open_world;
        self
    }

    /// Number of vertices along X.
    #[must_use]
    pub const fn num_vertices_x(&self) -> usize {
        self.num_quads_x + 1
    }

    /// Number of vertices along Y.
    #[must_use]
    pub const fn num_vertices_y(&self) -> usize {
        self.num_quads_y + 1
    }

    /// Local height of vertex `(x, y)`.
    #[must_use]
    pub fn vertex_height(&self, x: usize, y: usize) -> Option<f32> {
        if x > self.num_quads_x || y > self.num_quads_y {
            return None;
        }
        self.heights.read().get(y * self.num_vertices_x() + x).copied()
    }

    /// Overwrites the local height of vertex `(x, y)`.
    pub fn set_vertex_height(&self, x: usize, y: usize, height: f32) -> bool {
        if x > self.num_quads_x || y > self.num_quads_y {
            return false;
        }
        let index = y * self.num_vertices_x() + x;
        match self.heights.write().get_mut(index) {
            Some(slot) => {
                *slot = height;
                true
            },
            None => false,
        }
    }

    /// Bilinear sample at fractional local vertex coordinates.
    fn sample_local(&self, fx: f64, fy: f64) -> Option<f64> {
        let heights = self.heights.read();
        let vx = self.num_vertices_x();
        let x0 = (fx.floor() as usize).min(self.num_quads_x);
        let y0 = (fy.floor() as usize).min(self.num_quads_y);
        let x1 = (x0 + 1).min(self.num_quads_x);
        let y1 = (y0 + 1).min(self.num_quads_y);
        let tx = (fx - x0 as f64).clamp(0.0, 1.0);
        let ty = (fy - y0 as f64).clamp(0.0, 1.0);

        // Zero-weight corners are skipped so a hole only affects its own quads.
        let corners = [
            (x0, y0, (1.0 - tx) * (1.0 - ty)),
            (x1, y0, tx * (1.0 - ty)),
            (x0, y1, (1.0 - tx) * ty),
            (x1, y1, tx * ty),
        ];
        let value: f64 = corners
            .iter()
            .filter(|(_, _, w)| *w > 0.0)
            .map(|&(x, y, w)| f64::from(heights[y * vx + x]) * w)
            .sum();
        value.is_finite().then_some(value)
    }
}

impl HeightSampleSource for GridHeightSource {
    fn height_at_world(&self, world_xy: DVec2) -> Option<f64> {
        let probe = DVec3::new(world_xy.x, world_xy.y, self.transform.translation.z);
        let local = self.transform.inverse_transform_point(probe);
        let fx = local.x / self.scale.x;
        let fy = local.y / self.scale.y;

        // Tolerate rounding at the outer edge.
        const EDGE_EPSILON: f64 = 1e-6;
        if fx < -EDGE_EPSILON
            || fy < -EDGE_EPSILON
            || fx > self.num_quads_x as f64 + EDGE_EPSILON
            || fy > self.num_quads_y as f64 + EDGE_EPSILON
        {
            return None;
        }

        let local_height = self.sample_local(fx.max(0.0), fy.max(0.0))?;
        let world = self
            .transform
            .transform_point(DVec3::new(local.x, local.y, local_height));
        Some(world.z)
    }

    fn scale(&self) -> DVec3 {
        self.scale
    }

    fn transform(&self) -> Transform {
        self.transform
    }

    fn total_size(&self) -> DVec2 {
        DVec2::new(
            self.num_quads_x as f64 * self.scale.x,
            self.num_quads_y as f64 * self.scale.y,
        )
    }

    fn is_open_world(&self) -> bool {
        self.open_world
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> GridHeightSource {
        GridHeightSource::from_fn(
            10,
            10,
            DVec3::new(100.0, 100.0, 1.0),
            Transform::from_translation(DVec3::new(0.0, 0.0, 50.0)),
            |x, _| x as f32 * 10.0,
        )
    }

    #[test]
    fn test_height_at_vertex() {
        let source = ramp();
        let h = source.height_at_world(DVec2::new(300.0, 200.0));
        assert_eq!(h, Some(80.0));
    }

    #[test]
    fn test_height_interpolates() {
        let source = ramp();
        let h = source
            .height_at_world(DVec2::new(350.0, 200.0))
            .expect("inside source");
        assert!((h - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_outside_is_none() {
        let source = ramp();
        assert!(source.height_at_world(DVec2::new(-10.0, 0.0)).is_none());
        assert!(source.height_at_world(DVec2::new(0.0, 1001.0)).is_none());
        assert!(source.height_at_world(DVec2::new(1000.0, 1000.0)).is_some());
    }

    #[test]
    fn test_hole_is_none() {
        let source = ramp();
        assert!(source.set_vertex_height(2, 2, f32::NAN));
        assert!(source.height_at_world(DVec2::new(200.0, 200.0)).is_none());
    }

    #[test]
    fn test_total_size() {
        let source = ramp();
        assert_eq!(source.total_size(), DVec2::new(1000.0, 1000.0));
        assert_eq!(source.num_vertices_x(), 11);
    }
}
