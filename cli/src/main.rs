mod cli;
mod commands;

use std::{io, path::Path};

use anyhow::Result;
use gridjoin::Config;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{geocode, grid, join, services, travel, vuln};

const DEFAULT_CONFIG: &str = "gridjoin.toml";

/// Log to stderr; `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// The configuration named on the command line (or the default file when it
/// exists), with credentials from the environment and flag overrides applied.
pub(crate) fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None if Path::new(DEFAULT_CONFIG).is_file() => Config::load(Path::new(DEFAULT_CONFIG))?,
        None => Config::default(),
    }
    .with_env_credentials();

    if let Some(dir) = &cli.output {
        config.output.dir = dir.clone();
    }
    config.output.force |= cli.force;
    Ok(config)
}

pub fn run() -> Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);
    debug!(version = env!("CARGO_PKG_VERSION"), command = ?cli.command, "starting");

    match &cli.command {
        Commands::Grid(args) => grid::run(&cli, args),
        Commands::Join => join::run(&cli),
        Commands::Services => services::run(&cli),
        Commands::Geocode(args) => geocode::run(&cli, args),
        Commands::Travel => travel::run(&cli),
        Commands::Vuln => vuln::run(&cli),
    }
}

fn main() -> Result<()> { run() }
