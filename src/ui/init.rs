use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;

use crate::store::PackageStore;

/// Create a new, empty package store.
#[derive(Debug, Parser)]
pub struct Args {
    /// Where to create the store.
    root: Utf8PathBuf,
}

pub fn run(args: Args) -> Result<()> {
    PackageStore::open(args.root.clone())?;
    println!("initialized an empty store at {}", args.root);
    Ok(())
}
