use anyhow::Result;
use gridjoin::batch::write_join;

pub fn run(cli: &crate::cli::Cli) -> Result<()> {
    let config = crate::load_config(cli)?;
    let path = write_join(&config)?;
    println!("{}", path.display());
    Ok(())
}
