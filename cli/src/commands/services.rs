use anyhow::Result;
use gridjoin::batch::write_services;

pub fn run(cli: &crate::cli::Cli) -> Result<()> {
    let config = crate::load_config(cli)?;
    let path = write_services(&config)?;
    println!("{}", path.display());
    Ok(())
}
