//! On-disk configuration, loaded from `~/.config/bindepot.toml`. A missing
//! file is not an error; a malformed one is.

use std::{fs, io};

use anyhow::{Context, Result, anyhow};
use byte_unit::Byte;
use camino::Utf8PathBuf;
use serde_derive::Deserialize;

use crate::limits::Limits;

fn default_cache_size() -> Byte {
    Byte::from_u64(1024 * 1024 * 1024) // 1 GiB
}

#[derive(Debug, Deserialize)]
pub struct Configuration {
    /// Root of the package store this host opens.
    pub store_root: Utf8PathBuf,

    /// Root of the optional client-side local cache. Absent means no
    /// caching: every fetch goes to the remote store.
    #[serde(default)]
    pub cache_root: Option<Utf8PathBuf>,

    #[serde(default = "default_cache_size")]
    pub cache_size: Byte,

    #[serde(default)]
    pub limits: Limits,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            cache_root: None,
            cache_size: default_cache_size(),
            limits: Limits::default(),
        }
    }
}

fn default_store_root() -> Utf8PathBuf {
    let mut path: Utf8PathBuf = home::home_dir()
        .and_then(|p| p.try_into().ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."));
    path.extend([".local", "share", "bindepot"]);
    path
}

fn config_path() -> Result<Utf8PathBuf> {
    let mut path: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("can't find home directory"))?
        .try_into()
        .context("home directory isn't UTF-8")?;
    path.extend([".config", "bindepot.toml"]);
    Ok(path)
}

pub fn load() -> Result<Configuration> {
    let path = config_path()?;
    let contents = match fs::read_to_string(&path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Configuration::default()),
        found => found,
    }
    .with_context(|| format!("couldn't open {path}"))?;
    toml::from_str(&contents).with_context(|| format!("couldn't parse {path}"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Configuration::default();
        assert!(config.cache_root.is_none());
        assert_eq!(config.limits, Limits::default());
    }
}
