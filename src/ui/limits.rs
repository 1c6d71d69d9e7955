use anyhow::Result;
use clap::Parser;

use crate::config::Configuration;

/// Print the limits this host enforces on published packages.
#[derive(Debug, Parser)]
pub struct Args {}

pub fn run(config: Configuration, _args: Args) -> Result<()> {
    println!("{}", toml::to_string_pretty(&config.limits)?);
    Ok(())
}
