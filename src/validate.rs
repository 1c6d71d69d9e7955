//! Thin entry point over [`PackageStore::validate`] for the CLI and for
//! hosts that want to run an integrity sweep on a schedule.

use anyhow::Result;
use tracing::instrument;

pub use crate::store::ValidationStats;
use crate::store::PackageStore;

#[instrument(skip(store))]
pub fn validate_store(store: &PackageStore) -> Result<ValidationStats> {
    Ok(store.validate()?)
}
