use anyhow::Result;
use gridjoin::batch::write_vulnerability;

pub fn run(cli: &crate::cli::Cli) -> Result<()> {
    let config = crate::load_config(cli)?;
    let path = write_vulnerability(&config)?;
    println!("{}", path.display());
    Ok(())
}
