//! Demo configuration.
//!
//! Landscape, scenario and terrain settings, loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use strata_terrain::{BoundsRequest, PagingConfig, TerrainConfig};
use tracing::{info, warn};

/// Configuration file name.
pub const CONFIG_FILE: &str = "strata.toml";

/// Generated height source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandscapeConfig {
    /// Noise seed
    pub seed: u32,
    /// Quads along X
    pub num_quads_x: usize,
    /// Quads along Y
    pub num_quads_y: usize,
    /// Quad side length
    pub cell_size: f64,
    /// Height of the highest hills
    pub height_scale: f64,
    /// Horizontal noise scale (larger = smoother)
    pub terrain_scale: f64,
}

impl Default for LandscapeConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            num_quads_x: 256,
            num_quads_y: 256,
            cell_size: 10.0,
            height_scale: 40.0,
            terrain_scale: 600.0,
        }
    }
}

/// Scripted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Simulation ticks
    pub ticks: u32,
    /// Radius of the circle the digging body drives around the terrain centre
    pub path_radius: f64,
    /// Angle travelled per tick, radians
    pub angular_speed: f64,
    /// Random sideways offset per tick
    pub jitter: f64,
    /// Radius of each cut
    pub excavation_radius: f64,
    /// Depth at the centre of each cut
    pub excavation_depth: f64,
    /// Ticks between progress logs (0 = only the summary)
    pub log_interval: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            ticks: 600,
            path_radius: 500.0,
            angular_speed: 0.01,
            jitter: 2.0,
            excavation_radius: 15.0,
            excavation_depth: 0.5,
            log_interval: 60,
        }
    }
}

/// Demo configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Height source
    pub landscape: LandscapeConfig,
    /// Scripted run
    pub scenario: ScenarioConfig,
    /// Terrain
    pub terrain: TerrainConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            landscape: LandscapeConfig::default(),
            scenario: ScenarioConfig::default(),
            terrain: TerrainConfig {
                bounds: BoundsRequest {
                    infinite: false,
                    half_extent: glam::DVec3::new(1000.0, 1000.0, 500.0),
                },
                paging: PagingConfig {
                    enabled: true,
                    tile_size: 400.0,
                    tile_overlap: 40.0,
                    default_required_radius: 100.0,
                    default_preload_radius: 200.0,
                },
                ..TerrainConfig::default()
            },
        }
    }
}

impl DemoConfig {
    /// Load configuration from a specific path.
    /// Returns default config if the file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read config file: {e}");
                return Self::default();
            },
        };

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                info!("Loaded config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse config file: {e}");
                Self::default()
            },
        }
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

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        // Landscape
        self.landscape.num_quads_x = self.landscape.num_quads_x.clamp(1, 8192);
        self.landscape.num_quads_y = self.landscape.num_quads_y.clamp(1, 8192);
        self.landscape.cell_size = self.landscape.cell_size.clamp(0.01, 1000.0);
        self.landscape.height_scale = self.landscape.height_scale.max(0.0);
        self.landscape.terrain_scale = self.landscape.terrain_scale.max(1.0);

        // Scenario
        self.scenario.path_radius = self.scenario.path_radius.max(0.0);
        self.scenario.jitter = self.scenario.jitter.max(0.0);
        self.scenario.excavation_radius = self.scenario.excavation_radius.max(0.0);
        self.scenario.excavation_depth = self.scenario.excavation_depth.max(0.0);

        self.terrain.validate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = DemoConfig::default();
        assert!(config.terrain.paging.enabled);
        assert_eq!(config.landscape.num_quads_x, 256);
        assert_eq!(config.scenario.ticks, 600);
    }

    #[test]
    fn test_config_validation() {
        let mut config = DemoConfig::default();
        config.landscape.num_quads_x = 0;
        config.landscape.cell_size = -1.0;
        config.scenario.excavation_depth = -3.0;
        config.terrain.max_depth = 1e9;

        config.validate();

        assert_eq!(config.landscape.num_quads_x, 1);
        assert_eq!(config.landscape.cell_size, 0.01);
        assert_eq!(config.scenario.excavation_depth, 0.0);
        assert_eq!(config.terrain.max_depth, 1000.0);
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nested").join(CONFIG_FILE);

        let mut config = DemoConfig::default();
        config.landscape.seed = 7;
        config.scenario.ticks = 12;
        config.terrain.paging.enabled = false;

        config.save_to(&config_path).expect("Failed to save config");

        let loaded = DemoConfig::load_from(&config_path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = DemoConfig::load_from("/nonexistent/path/strata.toml");
        assert_eq!(config, DemoConfig::default());
    }

    #[test]
    fn test_config_load_invalid_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join(CONFIG_FILE);
        fs::write(&config_path, "[scenario]\nticks = \"many\"\n").expect("Failed to write");

        assert_eq!(DemoConfig::load_from(&config_path), DemoConfig::default());
    }
}
