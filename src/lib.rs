//! APR Index - Sparse multi-resolution particle index and iteration engine.
//!
//! An Adaptive Particle Representation (APR) replaces a dense image by a
//! set of particle cells on a dyadic hierarchy of grids: fine where the
//! image needs detail, coarse elsewhere. This crate stores the cells as
//! run-length coded columns per level and provides the traversal, lookup
//! and aggregation operations numerical code is written against.
//!
//! # Architecture
//!
//! - `apr`: Cell topology, construction, iterators, neighbour search and the tree
//! - `data`: Per-particle arrays and dense meshes
//! - `compute`: Reconstruction, tree aggregation, filters and adaptive estimators
//! - `io`: Binary `.apr` files
//! - `schema`: Run configuration and synthetic shapes
//!
//! # Example
//!
//! ```rust,no_run
//! use apr_index::{
//!     AprBuilder, ImageDims, MeshData,
//!     compute::{fill_tree_mean, interp_img, sample_image},
//! };
//!
//! # fn main() -> Result<(), apr_index::AprError> {
//! let dims = ImageDims::new(64, 64, 16);
//!
//! // Full resolution near the y = 32 plane, coarse elsewhere.
//! let apr = AprBuilder::from_level_fn(dims, 2, 6, |y, _, _| {
//!     if y.abs_diff(32) < 4 { 6 } else { 3 }
//! })?;
//!
//! let image = MeshData::from_fn(dims, |y, x, z| (y + x + z) as u16);
//! let intensities = sample_image(apr.topology(), &image)?;
//! let apr = apr.with_intensities(intensities)?;
//!
//! let tree = apr.tree()?;
//! let means = fill_tree_mean(apr.topology(), &tree, apr.intensities())?;
//! let reconstruction = interp_img(apr.topology(), apr.intensities())?;
//!
//! println!(
//!     "{} particles, {} tree nodes, {} pixels",
//!     apr.total_number_particles(),
//!     means.len(),
//!     reconstruction.len()
//! );
//! # Ok(())
//! # }
//! ```

pub mod apr;
pub mod compute;
pub mod data;
pub mod error;
pub mod io;
pub mod schema;

// Re-export commonly used types
pub use apr::{
    Apr, AprBuilder, AprIterator, AprTree, AprTreeIterator, CellIterator, CellTopology, Face,
    ImageDims, LevelDelta, Status, StatusTable,
};
pub use data::{ExtraParticleData, MeshData, ParticleScalar};
pub use error::AprError;
pub use schema::{RunConfig, Shape};
