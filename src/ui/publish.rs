use std::sync::Arc;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;

use crate::auth::AllowAll;
use crate::config::Configuration;
use crate::publish::upload_folder;
use crate::store::PackageStore;
use crate::transport::{Http, Local, Transport};

/// Publish every file under a folder as a new version of a package.
#[derive(Debug, Parser)]
pub struct Args {
    /// Package name (lowercase letters, digits, `-`, `_`).
    name: String,

    /// Folder whose contents become the package.
    folder: Utf8PathBuf,

    /// Publish to this server instead of the configured local store.
    #[clap(long)]
    server: Option<String>,

    /// Bearer token for `--server`.
    #[clap(long)]
    token: Option<String>,

    /// Local store to open, overriding the configured one.
    #[clap(long)]
    store: Option<Utf8PathBuf>,
}

pub async fn run(config: Configuration, args: Args) -> Result<()> {
    let transport: Box<dyn Transport> = match args.server {
        Some(url) => Box::new(Http::new(url, args.token)),
        None => {
            let root = args.store.unwrap_or(config.store_root);
            let store = Arc::new(PackageStore::open(root)?);
            Box::new(Local::new(store, Arc::new(AllowAll), config.limits))
        }
    };

    let published = upload_folder(transport.as_ref(), &args.name, &args.folder).await?;
    println!(
        "published {} version {}",
        published.package_name, published.package_version
    );
    Ok(())
}
