use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;

use crate::config::Configuration;
use crate::store::PackageStore;
use crate::validate::validate_store;

/// Validate a local store: every manifest is well-formed, every object it
/// references exists, and every stored blob re-hashes to its own name.
#[derive(Debug, Parser)]
pub struct Args {
    /// Local store to validate, overriding the configured one.
    #[clap(long)]
    store: Option<Utf8PathBuf>,
}

pub fn run(config: Configuration, args: Args) -> Result<()> {
    let root = args.store.unwrap_or(config.store_root);
    let store = PackageStore::open(root)?;
    let stats = validate_store(&store)?;
    println!(
        "ok: {} packages, {} objects, {} bytes",
        stats.packages, stats.objects, stats.size
    );
    Ok(())
}
