use anyhow::Result;
use polars::{frame::DataFrame, prelude::Column};
use tracing::debug;

use crate::remote::{weighted_travel_time, Directions, LonLat};
use super::services::MappedCell;

pub const TRAVEL_FILE: &str = "grid_travel.csv";

/// Share-weighted driving time from each cell to its services.
///
/// Cells without an origin get `None`; cells without services get 0.
pub fn travel_times(cells: &[MappedCell], directions: &mut impl Directions) -> Result<Vec<Option<f64>>> {
    let mut out = Vec::with_capacity(cells.len());
    for (k, cell) in cells.iter().enumerate() {
        let time = match cell.origin {
            Some(origin) => {
                let targets = cell.shares.iter()
                    .map(|s| (s.service, s.weight))
                    .collect::<Vec<(LonLat, f64)>>();
                Some(weighted_travel_time(directions, origin, &targets)?)
            }
            None => None,
        };
        out.push(time);
        if (k + 1) % 1000 == 0 {
            debug!(done = k + 1, total = cells.len(), "travel times");
        }
    }
    Ok(out)
}

/// `cell_id`, centre and `road_travel_time_s` (empty when the cell had no origin).
pub fn travel_frame(cells: &[MappedCell], times: &[Option<f64>]) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Column::new("cell_id".into(), cells.iter().map(|c| c.cell_id.0).collect::<Vec<_>>()),
        Column::new("center_lon".into(), cells.iter().map(|c| c.center.lon).collect::<Vec<_>>()),
        Column::new("center_lat".into(), cells.iter().map(|c| c.center.lat).collect::<Vec<_>>()),
        Column::new("road_travel_time_s".into(), times.to_vec()),
    ])?)
}

#[cfg(feature = "remote")]
pub use remote::write_travel;

#[cfg(feature = "remote")]
mod remote {
    use std::path::PathBuf;

    use anyhow::{Context, Result};
    use tracing::info;

    use crate::{
        config::{Config, NAVER_ID_ENV, NAVER_SECRET_ENV},
        io::csv::write_csv,
        remote::{client, CachedDirections, JsonCache, NaverDirections, RateLimiter, RetryPolicy},
    };
    use super::{super::services::service_mapping, travel_frame, travel_times, TRAVEL_FILE};

    /// Query Naver driving times for every cell and write `grid_travel.csv`.
    pub fn write_travel(config: &Config) -> Result<PathBuf> {
        let remote = &config.remote;
        let id = remote.naver_client_id.as_deref()
            .with_context(|| format!("[batch::travel] Naver credentials missing: set remote.naver_client_id or {NAVER_ID_ENV}"))?;
        let secret = remote.naver_client_secret.as_deref()
            .with_context(|| format!("[batch::travel] Naver credentials missing: set remote.naver_client_secret or {NAVER_SECRET_ENV}"))?;

        let projector = config.projector()?;
        let cells = service_mapping(config, &projector)?;

        let provider = NaverDirections::new(
            client(remote.timeout())?,
            id,
            secret,
            RetryPolicy::new(remote.retries, remote.backoff()),
            RateLimiter::new(remote.min_interval()),
        );
        let mut directions = CachedDirections::new(provider, JsonCache::open(&remote.directions_cache())?);
        let times = travel_times(&cells, &mut directions)?;

        let path = config.output.path(TRAVEL_FILE);
        let mut df = travel_frame(&cells, &times)?;
        write_csv(&mut df, &path, config.output.force)?;
        info!(cells = cells.len(), calls = directions.calls(), path = %path.display(), "wrote travel times");
        Ok(path)
    }
}
