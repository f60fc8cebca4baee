use std::path::PathBuf;

/// Seoul grid data-preparation CLI (argument schema only)
#[derive(clap::Parser, Debug)]
#[command(name = "gridjoin", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Batch configuration file, defaults to "./gridjoin.toml"
    #[arg(short, long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Output directory, overrides `output.dir`
    #[arg(short, long, global = true, value_hint = clap::ValueHint::DirPath)]
    pub output: Option<PathBuf>,

    /// Replace existing output files
    #[arg(long, global = true)]
    pub force: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Build the grid and write grid.csv
    Grid(GridArgs),

    /// Join the configured layers onto the grid and write joined.csv
    Join,

    /// Map cells to their nearest service per district and write grid_services.csv
    Services,

    /// Geocode service addresses and write services_geocoded.csv (needs Kakao credentials)
    Geocode(GeocodeArgs),

    /// Share-weighted driving time per cell, written to grid_travel.csv (needs Naver credentials)
    Travel,

    /// Station vulnerability index per cell, written to grid_vuln.csv
    Vuln,
}

#[derive(clap::Args, Debug)]
pub struct GridArgs {
    /// Cell side in meters, overrides `grid.cell_size_m`
    #[arg(long)]
    pub cell_size: Option<f64>,

    /// Half-width of the square extent in meters, overrides `grid.radius_m`
    #[arg(long)]
    pub radius: Option<f64>,
}

#[derive(clap::Args, Debug)]
pub struct GeocodeArgs {
    /// Query the keyword endpoint instead of the address endpoint
    #[arg(long)]
    pub keyword: bool,
}
