//! Batch procedures behind the command line.
//!
//! Each `write_*` function reads the inputs named by a [`Config`](crate::config::Config),
//! runs the library operations and writes one CSV under `output.dir`. Inputs are
//! checked before any work starts, and the output appears only once complete.

mod geocode;
mod grid;
mod layers;
mod services;
mod travel;
mod vuln;

use std::path::Path;

use anyhow::{ensure, Result};

pub use geocode::{geocode_services, geocoded_frame, GeocodedService, GEOCODE_FILE};
pub use grid::{load_grid, write_grid, GRID_FILE};
pub use layers::{
    attach_attributes, attribute_table, join_layers, load_layer, table_key, write_join, JoinOutput, LayerSummary, JOIN_FILE,
};
pub use services::{
    compute_mapping, load_districts, load_locator, mapping_to_frame, read_mapping, service_mapping,
    write_services, MappedCell, MappedShare, SERVICES_FILE,
};
pub use travel::{travel_frame, travel_times, TRAVEL_FILE};
pub use vuln::{load_registry, vulnerability, vulnerability_frame, write_vulnerability, VULN_FILE};

#[cfg(feature = "remote")]
pub use geocode::write_geocoded;
#[cfg(feature = "remote")]
pub use travel::write_travel;

/// Fail fast when a configured input is absent.
pub(crate) fn require_file(path: &Path) -> Result<()> {
    ensure!(path.is_file(), "[batch] input file not found: {}", path.display());
    Ok(())
}

pub(crate) fn is_shapefile(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("shp"))
}
