//! Configuration types for APR construction runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Shape;
use crate::apr::{ImageDims, StatusTable};
use crate::io::CompressionType;

fn default_level_min() -> u8 {
    1
}

fn default_status_particles() -> [u8; 3] {
    [1, 1, 1]
}

fn default_tree_level_offset() -> u8 {
    1
}

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Image size as `[y_num, x_num, z_num]`. Use `z_num = 1` for 2D images.
    pub dims: [u32; 3],
    /// Coarsest level stored.
    #[serde(default = "default_level_min")]
    pub level_min: u8,
    /// Finest level, at which one cell is one voxel. Derived from `dims`
    /// when absent.
    #[serde(default)]
    pub level_max: Option<u8>,
    /// Synthetic object providing intensities and required levels.
    #[serde(default)]
    pub shape: Shape,
    /// Particles per cell for seed, boundary and filler cells (1 or 8).
    #[serde(default = "default_status_particles")]
    pub status_particles: [u8; 3],
    /// Parent links climbed when pulling tree means back to particles.
    #[serde(default = "default_tree_level_offset")]
    pub tree_level_offset: u8,
    /// Where to write the resulting APR, if anywhere.
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub compression: CompressionType,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dims: [64, 64, 32],
            level_min: default_level_min(),
            level_max: None,
            shape: Shape::default(),
            status_particles: default_status_particles(),
            tree_level_offset: default_tree_level_offset(),
            output: None,
            compression: CompressionType::None,
        }
    }
}

impl RunConfig {
    pub fn image_dims(&self) -> ImageDims {
        ImageDims::new(self.dims[0], self.dims[1], self.dims[2])
    }

    /// Finest level, falling back to the level at which one cell is one voxel.
    pub fn resolved_level_max(&self) -> u8 {
        self.level_max
            .unwrap_or_else(|| self.image_dims().natural_level_max())
    }

    pub fn status_table(&self) -> Result<StatusTable, ConfigError> {
        let [seed, boundary, filler] = self.status_particles;
        StatusTable::new(seed, boundary, filler).map_err(|_| ConfigError::InvalidMultiplicity {
            counts: self.status_particles,
        })
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dims.contains(&0) {
            return Err(ConfigError::InvalidDimensions);
        }
        let level_max = self.resolved_level_max();
        if self.level_min > level_max || level_max > 30 {
            return Err(ConfigError::InvalidLevels {
                level_min: self.level_min,
                level_max,
            });
        }
        let natural = self.image_dims().natural_level_max();
        if level_max < natural {
            return Err(ConfigError::LevelMaxTooCoarse { level_max, natural });
        }
        self.status_table()?;
        if self.tree_level_offset == 0 {
            return Err(ConfigError::InvalidTreeLevelOffset);
        }
        self.shape.check().map_err(ConfigError::InvalidShape)?;
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Image dimensions (y, x, z) must be non-zero")]
    InvalidDimensions,
    #[error("Invalid level range: level_min {level_min}, level_max {level_max}")]
    InvalidLevels { level_min: u8, level_max: u8 },
    #[error("level_max {level_max} is coarser than one voxel per cell (needs {natural})")]
    LevelMaxTooCoarse { level_max: u8, natural: u8 },
    #[error("Status particle counts must each be 1 or 8, got {counts:?}")]
    InvalidMultiplicity { counts: [u8; 3] },
    #[error("Tree level offset must be at least 1")]
    InvalidTreeLevelOffset,
    #[error("Invalid shape: {0}")]
    InvalidShape(String),
}
