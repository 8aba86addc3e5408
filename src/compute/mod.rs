//! Compute module - numerical consumers of the particle iteration contract.

mod adaptive;
mod filter;
mod reconstruct;
mod tree_numerics;

pub use adaptive::*;
pub use filter::*;
pub use reconstruct::*;
pub use tree_numerics::*;
