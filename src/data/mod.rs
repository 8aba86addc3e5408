//! Data module - per-particle arrays and dense meshes.

mod mesh;
mod particle_data;
mod scalar;

pub use mesh::*;
pub use particle_data::*;
pub use scalar::*;
