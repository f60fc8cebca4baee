use anyhow::Result;
use gridjoin::batch::write_geocoded;

pub fn run(cli: &crate::cli::Cli, args: &crate::cli::GeocodeArgs) -> Result<()> {
    let mut config = crate::load_config(cli)?;
    config.geocode.keyword |= args.keyword;
    let path = write_geocoded(&config)?;
    println!("{}", path.display());
    Ok(())
}
