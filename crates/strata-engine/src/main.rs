//! # Strata
//!
//! Demo driver for Project Strata: streams a procedural landscape into the
//! in-memory physics engine, digs into it for a while and reports what was
//! published to the render side.
//!
//! Usage: `strata [config.toml]`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod config;
mod landscape;
mod scenario;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{DemoConfig, CONFIG_FILE};

/// Main entry point.
fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("strata=info".parse()?))
        .init();

    info!("Project Strata starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_FILE.to_string());
    let config = DemoConfig::load_from(&path);
    if !std::path::Path::new(&path).exists() {
        // Leave an editable copy of the defaults behind.
        if let Err(e) = config.save_to(&path) {
            warn!("Failed to write default config: {e}");
        }
    }

    let summary = scenario::run(&config)?;
    info!(
        "Published {} cells in {} ticks",
        summary.modified_cells, summary.ticks
    );

    info!("Project Strata shutdown complete");
    Ok(())
}
