//! APR module - sparse multi-resolution particle cells and their traversal.
//!
//! This module contains:
//! - Run-length coded per-level cell indices
//! - The shared cell topology with particle range tables
//! - Construction from explicit cells or a required-level field
//! - Particle iterators with neighbour and parent search
//! - The interior tree above the particle cells

mod builder;
mod face;
mod iterator;
mod level_index;
mod neighbours;
mod representation;
mod status;
mod topology;
mod tree;

pub use builder::*;
pub use face::*;
pub use iterator::*;
pub use level_index::*;
pub use neighbours::*;
pub use representation::*;
pub use status::*;
pub use topology::*;
pub use tree::*;
