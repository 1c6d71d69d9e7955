//! The typed error kinds a host (HTTP router, CLI) needs to branch on.
//!
//! Everything in the pipeline layers (publish, validate, transport) still
//! propagates with `anyhow`, but the store core itself returns this enum so
//! callers can distinguish "not found" from "integrity error" without
//! parsing strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate package: identical content already published as version {existing_version} of {package_name}")]
    DuplicatePackage {
        package_name: String,
        existing_version: u64,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
