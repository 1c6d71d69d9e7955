use std::sync::Arc;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;

use crate::auth::AllowAll;
use crate::config::Configuration;
use crate::publish::{download, download_manifest};
use crate::store::PackageStore;
use crate::transport::{Cached, Http, Local, Transport};

/// Fetch a published package version into a folder.
#[derive(Debug, Parser)]
pub struct Args {
    name: String,
    version: u64,
    folder: Utf8PathBuf,

    /// Remove anything under `folder` the package doesn't reference.
    #[clap(long)]
    clean: bool,

    /// Fetch from this server instead of the configured local store.
    #[clap(long)]
    server: Option<String>,

    /// Bearer token for `--server`.
    #[clap(long)]
    token: Option<String>,

    /// Local store to open, overriding the configured one.
    #[clap(long)]
    store: Option<Utf8PathBuf>,
}

pub fn run(config: Configuration, args: Args) -> Result<()> {
    let transport: Box<dyn Transport> = match args.server {
        Some(url) => {
            let remote: Box<dyn Transport> = Box::new(Http::new(url, args.token));
            match config.cache_root {
                Some(cache_root) => {
                    let cache = Arc::new(PackageStore::open(cache_root)?);
                    Box::new(Cached::new(remote, cache, config.cache_size.as_u64()))
                }
                None => remote,
            }
        }
        None => {
            let root = args.store.unwrap_or(config.store_root);
            let store = Arc::new(PackageStore::open(root)?);
            Box::new(Local::new(store, Arc::new(AllowAll), config.limits))
        }
    };

    let manifest = download_manifest(transport.as_ref(), &args.name, args.version)?;
    download(transport.as_ref(), &manifest, &args.folder, args.clean)?;
    println!(
        "fetched {} version {} into {}",
        args.name, args.version, args.folder
    );
    Ok(())
}
