//! Original and current heights of the terrain grid.
//!
//! The cache is shared between the simulation thread and the pager's tile
//! loading thread. One mutex guards both buffers; it is only held while a
//! buffer is written or diffed, never while the engine or the height source
//! is queried.

use half::f16;
use parking_lot::Mutex;
use strata_common::{ConfigError, ConsistencyError, StrataResult, VertexCoord};
use tracing::{debug, info};

use crate::native::NativeTerrain;

#[derive(Debug, Default)]
struct CacheBuffers {
    num_vertices_x: usize,
    num_vertices_y: usize,
    original: Vec<f32>,
    current: Vec<f32>,
    baseline_loaded: Vec<bool>,
}

impl CacheBuffers {
    fn reset(&mut self, num_vertices_x: usize, num_vertices_y: usize) {
        let len = num_vertices_x * num_vertices_y;
        self.num_vertices_x = num_vertices_x;
        self.num_vertices_y = num_vertices_y;
        self.original = vec![0.0; len];
        self.current = vec![0.0; len];
        self.baseline_loaded = vec![false; len];
    }
}

/// Height buffers in host order (`x + y * num_vertices_x`).
#[derive(Debug, Default)]
pub struct HeightCache {
    buffers: Mutex<CacheBuffers>,
}

impl HeightCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the buffers and fills them.
    ///
    /// With paging both buffers start zeroed and baselines arrive per tile.
    /// Without paging the whole grid is read from `terrain` once.
    pub fn initialize(
        &self,
        num_vertices_x: usize,
        num_vertices_y: usize,
        paging: bool,
        terrain: Option<&dyn NativeTerrain>,
    ) -> StrataResult<()> {
        if paging {
            self.buffers.lock().reset(num_vertices_x, num_vertices_y);
            info!("Height cache initialized for paging ({num_vertices_x}x{num_vertices_y}), heights load per tile");
            return Ok(());
        }

        let terrain = terrain.ok_or(ConfigError::MissingCollaborator("native terrain"))?;
        let (actual_x, actual_y) = terrain.grid_size();
        if (actual_x, actual_y) != (num_vertices_x, num_vertices_y) {
            return Err(ConsistencyError::GridSizeMismatch {
                expected_x: num_vertices_x,
                expected_y: num_vertices_y,
                actual_x,
                actual_y,
            }
            .into());
        }

        let mut heights = Vec::with_capacity(num_vertices_x * num_vertices_y);
        terrain.heights(&mut heights, false);
        if heights.len() != num_vertices_x * num_vertices_y {
            return Err(ConsistencyError::BufferSizeMismatch {
                expected: num_vertices_x * num_vertices_y,
                actual: heights.len(),
            }
            .into());
        }

        let mut buffers = self.buffers.lock();
        buffers.num_vertices_x = num_vertices_x;
        buffers.num_vertices_y = num_vertices_y;
        buffers.current.clone_from(&heights);
        buffers.baseline_loaded = vec![true; heights.len()];
        buffers.original = heights;
        drop(buffers);

        info!("Height cache initialized from terrain ({num_vertices_x}x{num_vertices_y})");
        Ok(())
    }

    /// Releases the buffers.
    pub fn clear(&self) {
        *self.buffers.lock() = CacheBuffers::default();
    }

    /// `(num_vertices_x, num_vertices_y)` of the allocated grid.
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        let buffers = self.buffers.lock();
        (buffers.num_vertices_x, buffers.num_vertices_y)
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.lock().original.len()
    }

    /// True if nothing is allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current heights.
    #[must_use]
    pub fn snapshot_current(&self) -> Vec<f32> {
        self.buffers.lock().current.clone()
    }

    /// Copy of the original heights.
    #[must_use]
    pub fn snapshot_original(&self) -> Vec<f32> {
        self.buffers.lock().original.clone()
    }

    /// True once the baseline of `vertex` has been written.
    #[must_use]
    pub fn baseline_loaded(&self, vertex: VertexCoord) -> bool {
        let buffers = self.buffers.lock();
        if !vertex.is_inside(buffers.num_vertices_x, buffers.num_vertices_y) {
            return false;
        }
        buffers.baseline_loaded[vertex.to_index(buffers.num_vertices_x)]
    }

    /// Writes baselines for cells that have none yet. Cells already loaded
    /// keep their value. Returns the number of cells written.
    pub fn write_baselines(&self, samples: &[(usize, f32)]) -> usize {
        let mut buffers = self.buffers.lock();
        let mut written = 0;
        for &(index, height) in samples {
            if index >= buffers.original.len() || buffers.baseline_loaded[index] {
                continue;
            }
            buffers.original[index] = height;
            buffers.current[index] = height;
            buffers.baseline_loaded[index] = true;
            written += 1;
        }
        written
    }

    /// Publishes the heights of `cells`, taken from `new_heights` (full grid,
    /// host order), as deltas against the original heights in `displacement`.
    ///
    /// Returns the number of cells applied. Cells outside the grid are skipped.
    pub fn apply_modified_cells(
        &self,
        cells: &[VertexCoord],
        new_heights: &[f32],
        displacement: &mut [f16],
    ) -> Result<usize, ConsistencyError> {
        let mut buffers = self.buffers.lock();
        let len = buffers.original.len();
        for actual in [new_heights.len(), displacement.len()] {
            if actual != len {
                return Err(ConsistencyError::BufferSizeMismatch {
                    expected: len,
                    actual,
                });
            }
        }

        let (num_x, num_y) = (buffers.num_vertices_x, buffers.num_vertices_y);
        let mut applied = 0;
        for &cell in cells {
            if !cell.is_inside(num_x, num_y) {
                continue;
            }
            let index = cell.to_index(num_x);
            let height = new_heights[index];
            displacement[index] = f16::from_f32(height - buffers.original[index]);
            buffers.current[index] = height;
            applied += 1;
        }
        drop(buffers);

        if applied != cells.len() {
            debug!(
                "Skipped {} modified cells outside the {num_x}x{num_y} grid",
                cells.len() - applied
            );
        }
        Ok(applied)
    }
}
