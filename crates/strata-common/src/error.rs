//! Error types for Project Strata.

use thiserror::Error;

/// Top-level error type for Strata operations.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Configuration errors, detected eagerly at initialization
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Consistency errors between independently computed quantities
    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    /// Errors reported by the physics engine
    #[error("Native error: {0}")]
    Native(#[from] NativeError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file parse errors
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Invalid or missing configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// No height source assigned
    #[error("No source height data selected")]
    NoHeightSource,

    /// Bounds with a negative half extent component
    #[error("Bounds invalid: negative half extent ({x}, {y}, {z})")]
    NegativeHalfExtent {
        /// X half extent
        x: f64,
        /// Y half extent
        y: f64,
        /// Z half extent
        z: f64,
    },

    /// Bounds that collapse to zero size after grid alignment
    #[error("Bounds invalid: zero-size region after grid alignment")]
    DegenerateBounds,

    /// A required collaborator object is not set
    #[error("Missing required collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// Initialization requested twice
    #[error("Terrain has already been initialized")]
    AlreadyInitialized,

    /// The height grid would not fit in memory
    #[error("Height grid of {requested} vertices exceeds the limit of {limit}")]
    TooManyVertices {
        /// Requested vertex count
        requested: u128,
        /// Maximum supported vertex count
        limit: u128,
    },

    /// Paging tiles without room between their overlaps
    #[error("Paging tiles of {tile_vertices} vertices cannot overlap by {overlap_vertices}")]
    InvalidTiling {
        /// Vertices per tile side
        tile_vertices: usize,
        /// Overlap vertices
        overlap_vertices: usize,
    },

    /// Render target with the wrong pixel format
    #[error("Render target '{target}' must use pixel format {expected}")]
    PixelFormat {
        /// Which target
        target: &'static str,
        /// Required format
        expected: &'static str,
    },
}

/// Mismatch between independently computed quantities.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    /// Engine-reported grid size differs from the locally computed one
    #[error("Grid size mismatch: expected {expected_x}x{expected_y}, engine reports {actual_x}x{actual_y}")]
    GridSizeMismatch {
        /// Locally computed vertices along X
        expected_x: usize,
        /// Locally computed vertices along Y
        expected_y: usize,
        /// Engine vertices along X
        actual_x: usize,
        /// Engine vertices along Y
        actual_y: usize,
    },

    /// A tile fetch reaching outside the allocated grid
    #[error("Tile request at vertex ({x}, {y}) of size {width}x{height} is outside the {num_x}x{num_y} grid")]
    TileOutOfBounds {
        /// Start column
        x: i64,
        /// Start row
        y: i64,
        /// Requested columns
        width: usize,
        /// Requested rows
        height: usize,
        /// Grid columns
        num_x: usize,
        /// Grid rows
        num_y: usize,
    },

    /// Buffer length not matching the grid
    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
}

/// Errors reported by, or about, physics engine objects.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NativeError {
    /// The engine failed to allocate an object
    #[error("Native allocation failed: {0}")]
    AllocationFailed(String),

    /// Operation requires a native object that does not exist
    #[error("No native object: {0}")]
    NoNative(&'static str),

    /// The engine refused an object
    #[error("Rejected by engine: {0}")]
    Rejected(String),
}

/// Result type alias for Strata operations.
pub type StrataResult<T> = Result<T, StrataError>;
