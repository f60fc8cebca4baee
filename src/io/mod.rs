//! IO module for format-specific reading and writing operations.
//!
//! # Format Modules
//!
//! - `csv` - point layers, grid tables and aggregated output
//! - `shp` - Shapefile polygons and points
//!
//! Every output goes through [`PendingWrite`], so a failed batch never leaves
//! a half-written file behind.

pub mod csv;
pub mod shp;
mod pending;

pub use pending::{write_atomic, PendingWrite};
