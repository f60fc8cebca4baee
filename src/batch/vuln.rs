use std::path::PathBuf;

use anyhow::{Context, Result};
use polars::{frame::DataFrame, prelude::Column};
use tracing::{info, warn};

use crate::{
    config::Config,
    io::csv::{read_csv, write_csv},
    registry::{CellVulnerability, JurisdictionMap, StationRegistry, VulnLoadings, WEIGHTED_COLUMNS},
};
use super::{require_file, services::{service_mapping, MappedCell}};

pub const VULN_FILE: &str = "grid_vuln.csv";

/// Station profiles plus the centre -> station table, with overrides applied.
pub fn load_registry(config: &Config) -> Result<(StationRegistry, JurisdictionMap)> {
    let registry = &config.registry;
    let path = registry.stations.as_ref()
        .context("[batch::vuln] registry.stations (station population table) is not configured")?;
    require_file(path)?;
    if let Some(jurisdiction) = &registry.jurisdiction {
        require_file(jurisdiction)?;
    }

    let stations = StationRegistry::from_frame(&read_csv(path)?, &registry.station_column, VulnLoadings::default())
        .with_context(|| format!("[batch::vuln] Failed to read stations from {}", path.display()))?;
    let map = match &registry.jurisdiction {
        Some(path) => JurisdictionMap::from_frame(&read_csv(path)?)?,
        None => JurisdictionMap::new(),
    };
    Ok((stations, map.with_overrides(&registry.overrides)))
}

/// Weigh every cell's services by their station profile.
pub fn vulnerability(cells: &[MappedCell], registry: &StationRegistry, map: &JurisdictionMap) -> Vec<CellVulnerability> {
    let out = cells.iter()
        .map(|cell| registry.weigh(cell.shares.iter().map(|s| (s.service_name.as_str(), s.weight)), map))
        .collect::<Vec<_>>();
    let unresolved: usize = out.iter().map(|v| v.unresolved).sum();
    if unresolved > 0 {
        warn!(unresolved, "services that resolve to no known station");
    }
    out
}

/// `cell_id`, centre, `grid_vuln_index`, then the weighted station counts.
pub fn vulnerability_frame(cells: &[MappedCell], values: &[CellVulnerability]) -> Result<DataFrame> {
    let mut columns = vec![
        Column::new("cell_id".into(), cells.iter().map(|c| c.cell_id.0).collect::<Vec<_>>()),
        Column::new("center_lon".into(), cells.iter().map(|c| c.center.lon).collect::<Vec<_>>()),
        Column::new("center_lat".into(), cells.iter().map(|c| c.center.lat).collect::<Vec<_>>()),
        Column::new("grid_vuln_index".into(), values.iter().map(|v| v.index).collect::<Vec<_>>()),
    ];
    for (k, name) in WEIGHTED_COLUMNS.iter().enumerate() {
        columns.push(Column::new((*name).into(), values.iter().map(|v| v.counts[k]).collect::<Vec<_>>()));
    }
    Ok(DataFrame::new(columns)?)
}

/// Compute the per-cell vulnerability index and write `grid_vuln.csv`.
pub fn write_vulnerability(config: &Config) -> Result<PathBuf> {
    let projector = config.projector()?;
    let (registry, map) = load_registry(config)?;
    let cells = service_mapping(config, &projector)?;
    let values = vulnerability(&cells, &registry, &map);

    let path = config.output.path(VULN_FILE);
    let mut df = vulnerability_frame(&cells, &values)?;
    write_csv(&mut df, &path, config.output.force)?;
    info!(cells = cells.len(), stations = registry.len(), path = %path.display(), "wrote vulnerability index");
    Ok(path)
}
