//! Configurable ceilings on published packages. A value of zero on any
//! field means "unlimited".

use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::Manifest;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub max_file_size: u64,
    #[serde(default)]
    pub max_package_size: u64,
    #[serde(default)]
    pub max_files_count: u64,
    #[serde(default)]
    pub max_path_length: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size: 0,
            max_package_size: 0,
            max_files_count: 0,
            max_path_length: 0,
        }
    }
}

/// Checks `manifest` against `limits`, returning a descriptive error
/// naming the first limit exceeded.
pub fn check(manifest: &Manifest, limits: &Limits) -> Result<()> {
    if limits.max_files_count > 0 && manifest.files.len() as u64 > limits.max_files_count {
        return Err(Error::LimitExceeded(format!(
            "number of files is {} and exceeds the limit of {}",
            manifest.files.len(),
            limits.max_files_count
        )));
    }

    let mut overall_size: u64 = 0;
    for file in &manifest.files {
        overall_size = overall_size.saturating_add(file.object.size);

        if limits.max_path_length > 0 && file.path.len() as u64 > limits.max_path_length {
            return Err(Error::LimitExceeded(format!(
                "path length of {} exceeds the limit of {}",
                file.path.len(),
                limits.max_path_length
            )));
        }
        if limits.max_file_size > 0 && file.object.size > limits.max_file_size {
            return Err(Error::LimitExceeded(format!(
                "file size of {} exceeds the limit of {} for {}",
                file.object.size, limits.max_file_size, file.path
            )));
        }
    }

    if limits.max_package_size > 0 && overall_size > limits.max_package_size {
        return Err(Error::LimitExceeded(format!(
            "package size of {overall_size} exceeds the limit of {}",
            limits.max_package_size
        )));
    }

    Ok(())
}
