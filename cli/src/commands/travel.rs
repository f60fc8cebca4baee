use anyhow::Result;
use gridjoin::batch::write_travel;

pub fn run(cli: &crate::cli::Cli) -> Result<()> {
    let config = crate::load_config(cli)?;
    let path = write_travel(&config)?;
    println!("{}", path.display());
    Ok(())
}
