//! Error types shared across the crate.

use crate::schema::ConfigError;

/// Errors raised by topology construction, particle data and persistence.
///
/// Neighbour and parent lookups never produce an error: a missing target is
/// an ordinary outcome and is reported through `bool`/`Option` returns.
#[derive(Debug, thiserror::Error)]
pub enum AprError {
    #[error("Particle data size mismatch: expected {expected}, found {found}")]
    SizeMismatch { expected: usize, found: usize },
    #[error("Iterator has not been positioned on a particle")]
    NotPositioned,
    #[error("Invalid level range: level_min {level_min}, level_max {level_max}")]
    InvalidLevels { level_min: u8, level_max: u8 },
    #[error("Image dimensions must be non-zero")]
    InvalidDimensions,
    #[error("Cell (level {level}, x {x}, y {y}, z {z}) lies outside the level grid")]
    CellOutOfBounds { level: u8, x: u32, y: u32, z: u32 },
    #[error("Cell (level {level}, x {x}, y {y}, z {z}) overlaps an existing cell")]
    OverlappingCells { level: u8, x: u32, y: u32, z: u32 },
    #[error("Voxel (x {x}, y {y}, z {z}) is not covered by any particle cell")]
    UncoveredVoxel { x: u32, y: u32, z: u32 },
    #[error("Cell (level {level}, x {x}, y {y}, z {z}) has a face neighbour more than one level away")]
    UnbalancedCell { level: u8, x: u32, y: u32, z: u32 },
    #[error("Slice {index} is outside an axis of {size} pixels")]
    SliceOutOfRange { index: u32, size: u32 },
    #[error("Status multiplicity must be 1 or 8, got {0}")]
    InvalidMultiplicity(u8),
    #[error("Cell at level {level} owns {count} particles but the finest level cannot be split")]
    MultiParticleAtFinestLevel { level: u8, count: u8 },
    #[error("Runs of column (level {level}, x {x}, z {z}) cover {covered} of {expected} rows")]
    RunsDoNotPartitionColumn {
        level: u8,
        x: u32,
        z: u32,
        covered: u64,
        expected: u64,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid APR file: {0}")]
    InvalidFormat(String),
    #[error("Particle value type mismatch: file stores tag {found}, expected {expected}")]
    ValueTypeMismatch { expected: u8, found: u8 },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
