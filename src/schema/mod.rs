//! Schema module - Run configuration and synthetic shapes for APR construction.

mod config;
mod shape;

pub use config::*;
pub use shape::*;
