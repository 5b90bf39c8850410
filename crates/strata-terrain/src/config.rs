//! Terrain configuration.
//!
//! Settings are loaded from TOML. Missing fields take their defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use strata_common::{ConfigError, StrataResult};
use tracing::{info, warn};

use crate::bounds::BoundsRequest;
use crate::grid::MAX_CACHE_VERTICES;
use crate::native::PagerParams;

/// Largest tile side and overlap accepted, in world units.
pub const MAX_TILE_SIZE: f64 = 1.0e6;

/// Paging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Stream the terrain in tiles around tracked bodies
    pub enabled: bool,
    /// Tile side length in world units
    pub tile_size: f64,
    /// Overlap between neighbouring tiles in world units
    pub tile_overlap: f64,
    /// Required radius for tracked bodies added without explicit radii
    pub default_required_radius: f64,
    /// Preload radius for tracked bodies added without explicit radii
    pub default_preload_radius: f64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tile_size: 2000.0,
            tile_overlap: 200.0,
            default_required_radius: 600.0,
            default_preload_radius: 1000.0,
        }
    }
}

impl PagingConfig {
    /// Vertices per tile side for a grid with `cell_size` spacing, `None` if
    /// a tile would exceed [`MAX_CACHE_VERTICES`].
    #[must_use]
    pub fn tile_vertices(&self, cell_size: f64) -> Option<usize> {
        quads_along(self.tile_size, cell_size)
            .map(|quads| quads + 1)
            .filter(|&n| n.checked_mul(n).is_some_and(|total| total <= MAX_CACHE_VERTICES))
    }

    /// Overlap vertices for a grid with `cell_size` spacing.
    #[must_use]
    pub fn overlap_vertices(&self, cell_size: f64) -> Option<usize> {
        quads_along(self.tile_overlap, cell_size)
    }

    /// Pager parameters for a grid with `cell_size` spacing.
    pub fn pager_params(&self, cell_size: f64, max_depth: f64) -> Result<PagerParams, ConfigError> {
        let Some(tile_vertices) = self.tile_vertices(cell_size) else {
            let side = (self.tile_size / cell_size).round() + 1.0;
            return Err(ConfigError::TooManyVertices {
                requested: (side * side).min(u128::MAX as f64) as u128,
                limit: MAX_CACHE_VERTICES as u128,
            });
        };
        let params = PagerParams {
            tile_vertices,
            overlap_vertices: self.overlap_vertices(cell_size).unwrap_or(usize::MAX),
            quad_size: cell_size,
            max_depth,
        };
        if params.tile_stride() == 0 {
            return Err(ConfigError::InvalidTiling {
                tile_vertices: params.tile_vertices,
                overlap_vertices: params.overlap_vertices,
            });
        }
        Ok(params)
    }
}

/// Whole quads covering `length`, `None` if the count is not representable.
fn quads_along(length: f64, cell_size: f64) -> Option<usize> {
    let quads = (length / cell_size).round().max(0.0);
    (quads.is_finite() && quads <= MAX_CACHE_VERTICES as f64).then_some(quads as usize)
}

/// Rendering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingConfig {
    /// Publish height deltas to the displacement target
    pub enable_displacement_rendering: bool,
    /// Publish particles to the particle target
    pub enable_particle_rendering: bool,
    /// Particles the particle target must hold
    pub max_num_render_particles: usize,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            enable_displacement_rendering: true,
            enable_particle_rendering: true,
            max_num_render_particles: 2048,
        }
    }
}

/// Terrain configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Excavated soil becomes particles
    pub create_particles: bool,
    /// Particles leaving the bounds are removed (ignored while paging)
    pub delete_particles_outside_bounds: bool,
    /// Penetration force velocity scaling
    pub penetration_force_velocity_scaling: f64,
    /// Soil volume activated per step, `None` for unlimited
    pub maximum_particle_activation_volume: Option<f64>,
    /// Maximum excavation depth
    pub max_depth: f64,
    /// Bounds
    pub bounds: BoundsRequest,
    /// Paging
    pub paging: PagingConfig,
    /// Rendering
    pub rendering: RenderingConfig,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            create_particles: true,
            delete_particles_outside_bounds: true,
            penetration_force_velocity_scaling: 0.0,
            maximum_particle_activation_volume: None,
            max_depth: 200.0,
            bounds: BoundsRequest::default(),
            paging: PagingConfig::default(),
            rendering: RenderingConfig::default(),
        }
    }
}

impl TerrainConfig {
    /// Load configuration from a specific path.
    /// Returns default config if the file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Terrain config not found, using defaults");
            return Self::default();
        }

        match Self::try_load_from(path) {
            Ok(config) => {
                info!("Loaded terrain config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to load terrain config: {e}");
                Self::default()
            },
        }
    }

    /// Load configuration from a specific path, reporting read and parse errors.
    pub fn try_load_from<P: AsRef<Path>>(path: P) -> StrataResult<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&contents)?;
        config.validate();
        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved terrain config to {}", path.display());
        Ok(())
    }

    /// Clamp values to supported ranges.
    ///
    /// Bounds are left alone so invalid ones are reported when resolved.
    pub fn validate(&mut self) {
        self.max_depth = self.max_depth.clamp(0.0, 1000.0);
        self.penetration_force_velocity_scaling = self.penetration_force_velocity_scaling.max(0.0);
        if let Some(volume) = self.maximum_particle_activation_volume {
            self.maximum_particle_activation_volume = Some(volume.max(0.0));
        }

        self.paging.tile_size = clamp_length(self.paging.tile_size);
        self.paging.tile_overlap = clamp_length(self.paging.tile_overlap);

        self.rendering.max_num_render_particles =
            self.rendering.max_num_render_particles.clamp(1, 4_000_000);
    }
}

/// Clamps a tile length to `[0, MAX_TILE_SIZE]`, mapping NaN to zero.
fn clamp_length(length: f64) -> f64 {
    if length.is_nan() {
        0.0
    } else {
        length.clamp(0.0, MAX_TILE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TerrainConfig::default();
        assert!(config.create_particles);
        assert!(config.delete_particles_outside_bounds);
        assert!(!config.paging.enabled);
        assert_eq!(config.max_depth, 200.0);
        assert_eq!(config.bounds.half_extent, DVec3::splat(1000.0));
        assert_eq!(config.rendering.max_num_render_particles, 2048);
    }

    #[test]
    fn test_config_validation() {
        let mut config = TerrainConfig::default();
        config.max_depth = 5000.0;
        config.rendering.max_num_render_particles = 0;
        config.maximum_particle_activation_volume = Some(-3.0);
        config.bounds.half_extent = DVec3::new(-1.0, 1.0, 1.0);

        config.validate();

        assert_eq!(config.max_depth, 1000.0);
        assert_eq!(config.rendering.max_num_render_particles, 1);
        assert_eq!(config.maximum_particle_activation_volume, Some(0.0));
        assert_eq!(config.bounds.half_extent.x, -1.0);
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("terrain.toml");

        let mut config = TerrainConfig::default();
        config.paging.enabled = true;
        config.paging.tile_size = 1500.0;
        config.maximum_particle_activation_volume = Some(2.5);
        config.bounds.infinite = true;

        config.save_to(&config_path).expect("Failed to save config");

        let loaded = TerrainConfig::load_from(&config_path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = TerrainConfig::load_from("/nonexistent/path/terrain.toml");
        assert_eq!(config, TerrainConfig::default());
    }

    #[test]
    fn test_config_partial_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("terrain.toml");
        fs::write(&config_path, "max_depth = 50.0\n[paging]\nenabled = true\n")
            .expect("Failed to write config");

        let loaded = TerrainConfig::try_load_from(&config_path).expect("valid toml");
        assert_eq!(loaded.max_depth, 50.0);
        assert!(loaded.paging.enabled);
        assert_eq!(loaded.paging.tile_size, 2000.0);
    }

    #[test]
    fn test_config_parse_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("terrain.toml");
        fs::write(&config_path, "max_depth = \"deep\"\n").expect("Failed to write config");

        assert!(matches!(
            TerrainConfig::try_load_from(&config_path),
            Err(strata_common::StrataError::Parse(_))
        ));
        assert_eq!(TerrainConfig::load_from(&config_path), TerrainConfig::default());
    }

    #[test]
    fn test_pager_params() {
        let paging = PagingConfig::default();
        let params = paging.pager_params(100.0, 200.0).expect("valid tiling");
        assert_eq!(params.tile_vertices, 21);
        assert_eq!(params.overlap_vertices, 2);
        assert_eq!(params.tile_stride(), 18);
        assert_eq!(params.quad_size, 100.0);

        let tiny = PagingConfig {
            tile_size: 100.0,
            tile_overlap: 100.0,
            ..PagingConfig::default()
        };
        assert!(matches!(
            tiny.pager_params(100.0, 200.0),
            Err(ConfigError::InvalidTiling { .. })
        ));
    }

    #[test]
    fn test_huge_tiles_are_rejected() {
        let mut config = TerrainConfig::default();
        config.paging.tile_size = 1.0e30;
        config.paging.tile_overlap = f64::NAN;
        config.validate();
        assert_eq!(config.paging.tile_size, MAX_TILE_SIZE);
        assert_eq!(config.paging.tile_overlap, 0.0);

        // Still too many vertices per tile with unit cells.
        assert!(matches!(
            config.paging.pager_params(1.0, 200.0),
            Err(ConfigError::TooManyVertices { .. })
        ));

        // Unvalidated values never overflow either.
        let raw = PagingConfig {
            tile_size: 1.0e30,
            ..PagingConfig::default()
        };
        assert_eq!(raw.tile_vertices(100.0), None);
        assert!(raw.pager_params(100.0, 200.0).is_err());
        assert!(PagingConfig::default().pager_params(0.0, 200.0).is_err());
    }

    #[test]
    fn test_largest_tile_accepted() {
        let paging = PagingConfig {
            tile_size: 8191.0,
            tile_overlap: 1.0,
            ..PagingConfig::default()
        };
        let params = paging.pager_params(1.0, 200.0).expect("fits the vertex limit");
        assert_eq!(params.tile_vertices, 8192);
        assert_eq!(params.tile_vertices * params.tile_vertices, MAX_CACHE_VERTICES);
    }
}
