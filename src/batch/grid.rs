use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::{
    config::Config,
    geom::Projector,
    grid::{build_grid, Grid},
    io::csv::{grid_to_frame, grid_from_frame, read_csv, write_csv},
};
use super::require_file;

pub const GRID_FILE: &str = "grid.csv";

/// The run's grid: reloaded from `grid.csv` when configured, built otherwise.
pub fn load_grid(config: &Config, projector: &Projector) -> Result<Grid> {
    let grid = match &config.grid.csv {
        Some(path) => {
            require_file(path)?;
            let df = read_csv(path)?;
            grid_from_frame(&df, projector, config.grid.cell_size_m, "center_lon", "center_lat")?
        }
        None => build_grid(&config.grid.spec()?, projector)?,
    };
    info!(cells = grid.len(), cell_size_m = grid.cell_size_m(), "grid ready");
    Ok(grid)
}

/// Build the grid from the configured extent and write it to `grid.csv`.
pub fn write_grid(config: &Config) -> Result<PathBuf> {
    let projector = config.projector()?;
    let grid = build_grid(&config.grid.spec()?, &projector)?;

    let path = config.output.path(GRID_FILE);
    let mut df = grid_to_frame(&grid)?;
    write_csv(&mut df, &path, config.output.force)?;
    info!(cells = grid.len(), path = %path.display(), "wrote grid");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::from_toml(
            "[grid]\ncell_size_m = 250\nradius_m = 500\n",
        ).unwrap();
        config.output.dir = dir.to_path_buf();
        config
    }

    #[test]
    fn written_grid_reloads_with_the_same_cells() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        let path = write_grid(&config).unwrap();

        let projector = config.projector().unwrap();
        let built = build_grid(&config.grid.spec().unwrap(), &projector).unwrap();
        config.grid.csv = Some(path);
        let reloaded = load_grid(&config, &projector).unwrap();

        assert_eq!(reloaded.len(), built.len());
        for (a, b) in reloaded.cells().iter().zip(built.cells()) {
            assert_eq!(a.id, b.id);
            assert!((a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3);
        }
    }

    #[test]
    fn existing_output_is_kept_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        write_grid(&config).unwrap();
        assert!(write_grid(&config).is_err());
    }
}
