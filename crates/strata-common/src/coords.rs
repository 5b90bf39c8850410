//! Coordinate types for grid vertices and paging tiles.
//!
//! Two vertex conventions exist side by side:
//!
//! ```text
//! host grid (height source order)     native grid (physics engine order)
//!
//! y=ny-1  ...                          j=0     ...
//! ...                                  ...
//! y=1     [0,1] [1,1] ...              j=ny-2  [0,ny-2] ...
//! y=0     [0,0] [1,0] [2,0] ...        j=ny-1  [0,ny-1] [1,ny-1] ...
//! ```
//!
//! Columns agree, rows are mirrored: `j = ny - 1 - y`.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Vertex coordinate in the host grid (row `y = 0` at the lower bounds edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct VertexCoord {
    /// Column
    pub x: i64,
    /// Row
    pub y: i64,
}

impl VertexCoord {
    /// Creates a new vertex coordinate.
    #[must_use]
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Converts to linear index for row-major array access.
    #[must_use]
    pub const fn to_index(self, num_vertices_x: usize) -> usize {
        (self.y as usize) * num_vertices_x + (self.x as usize)
    }

    /// Creates from linear index.
    #[must_use]
    pub const fn from_index(index: usize, num_vertices_x: usize) -> Self {
        Self {
            x: (index % num_vertices_x) as i64,
            y: (index / num_vertices_x) as i64,
        }
    }

    /// Returns true if the vertex lies inside a `num_x` by `num_y` grid.
    #[must_use]
    pub const fn is_inside(self, num_x: usize, num_y: usize) -> bool {
        self.x >= 0 && self.y >= 0 && (self.x as usize) < num_x && (self.y as usize) < num_y
    }

    /// Mirrors the row, converting between host and native order.
    ///
    /// The operation is its own inverse.
    #[must_use]
    pub const fn mirror_row(self, num_y: usize) -> Self {
        Self {
            x: self.x,
            y: num_y as i64 - 1 - self.y,
        }
    }
}

/// Identifies a tile of a paged terrain relative to the pager reference point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct TileId {
    /// X coordinate in tile space
    pub x: i32,
    /// Y coordinate in tile space (grows opposite to host rows)
    pub y: i32,
}

impl TileId {
    /// Creates a new tile id.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Host vertex of this tile's native origin, given the host grid centre
    /// vertex and the tile stride in quads.
    #[must_use]
    pub const fn origin_vertex(self, center: VertexCoord, stride: i64) -> VertexCoord {
        VertexCoord {
            x: center.x + self.x as i64 * stride,
            y: center.y - self.y as i64 * stride,
        }
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_row_is_involution() {
        let v = VertexCoord::new(3, 1);
        assert_eq!(v.mirror_row(9), VertexCoord::new(3, 7));
        assert_eq!(v.mirror_row(9).mirror_row(9), v);
    }

    #[test]
    fn test_is_inside() {
        assert!(VertexCoord::new(0, 0).is_inside(1, 1));
        assert!(!VertexCoord::new(-1, 0).is_inside(4, 4));
        assert!(!VertexCoord::new(4, 0).is_inside(4, 4));
    }

    #[test]
    fn test_tile_origin() {
        let center = VertexCoord::new(50, 50);
        assert_eq!(TileId::new(0, 0).origin_vertex(center, 10), center);
        assert_eq!(
            TileId::new(1, 2).origin_vertex(center, 10),
            VertexCoord::new(60, 30)
        );
        assert_eq!(
            TileId::new(-1, -1).origin_vertex(center, 10),
            VertexCoord::new(40, 60)
        );
    }
}
