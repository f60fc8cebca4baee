use anyhow::Result;
use gridjoin::batch::write_grid;

pub fn run(cli: &crate::cli::Cli, args: &crate::cli::GridArgs) -> Result<()> {
    let mut config = crate::load_config(cli)?;
    if let Some(size) = args.cell_size {
        config.grid.cell_size_m = size;
    }
    if let Some(radius) = args.radius {
        config.grid.radius_m = Some(radius);
        config.grid.bounds = None;
    }
    config.validate()?;

    let path = write_grid(&config)?;
    println!("{}", path.display());
    Ok(())
}
