//! The manifest model: entity definitions, canonical hashing, and the
//! validators that distinguish an unpublished manifest from a published one.

use std::collections::HashSet;
use std::sync::OnceLock;

use data_encoding::HEXLOWER;
use regex::Regex;
use serde_derive::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

fn package_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9_-]+$").unwrap())
}

fn object_hash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-f0-9_-]+$").unwrap())
}

/// The fundamental storage unit: content identified by the hash of its
/// uncompressed bytes.
///
/// Serialized as `{"Hash":..., "Size":...}` on the wire and on disk,
/// matching the capitalized field names the rest of this format uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Object {
    pub hash: String,
    pub size: u64,
}

/// A package member, binding a relative path to an [`Object`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct File {
    pub path: String,
    pub object: Object,
}

/// A package version as a complete, self-verifying description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Manifest {
    pub manifest_version: u32,
    pub package_name: String,
    pub package_version: u64,
    pub published: i64,
    pub hash: String,
    pub files: Vec<File>,
}

/// Builds an unpublished manifest out of a caller-supplied file list (the
/// publication pipeline walks the folder and hashes each file; this just
/// stamps the envelope and computes the canonical hash).
pub fn new_unpublished(package_name: impl Into<String>, files: Vec<File>) -> Manifest {
    let mut manifest = Manifest {
        manifest_version: 1,
        package_name: package_name.into(),
        package_version: 0,
        published: 0,
        hash: String::new(),
        files,
    };
    manifest.hash = hash_manifest(&manifest);
    manifest
}

pub fn validate_package_name(name: &str) -> bool {
    package_name_re().is_match(name)
}

/// Calculates the canonical verification hash for a manifest.
///
/// Feeds the hasher, in order: `manifest_version` (decimal), `package_name`,
/// `manifest_version` *again* (kept for on-wire compatibility with the
/// system this format originates from), `published` (decimal), then for
/// each file in order: `path`, `object.hash`, `object.size` (decimal).
/// `package_version` is never folded in, so a manifest's hash is stable
/// across publication until `published` is stamped.
pub fn hash_manifest(manifest: &Manifest) -> String {
    let mut hasher = Sha256::new();
    let mut add_str = |s: &str| hasher.update(s.as_bytes());

    add_str(&manifest.manifest_version.to_string());
    add_str(&manifest.package_name);
    add_str(&manifest.manifest_version.to_string());
    add_str(&manifest.published.to_string());

    for file in &manifest.files {
        add_str(&file.path);
        add_str(&file.object.hash);
        add_str(&file.object.size.to_string());
    }

    HEXLOWER.encode(&hasher.finalize())
}

fn validate_basic(manifest: &Manifest) -> Result<()> {
    if manifest.manifest_version != 1 {
        return Err(Error::InvalidInput("invalid manifest version".into()));
    }
    if !validate_package_name(&manifest.package_name) {
        return Err(Error::InvalidInput(format!(
            "invalid package name {:?}",
            manifest.package_name
        )));
    }
    if manifest.files.is_empty() {
        return Err(Error::InvalidInput("manifest contains no files".into()));
    }

    let mut seen_paths: HashSet<String> = HashSet::with_capacity(manifest.files.len());
    for file in &manifest.files {
        if file.path.is_empty() {
            return Err(Error::InvalidInput("found empty file path".into()));
        }
        if file.path.contains("..") {
            return Err(Error::InvalidInput(format!(
                "invalid file path {:?}",
                file.path
            )));
        }
        if !object_hash_re().is_match(&file.object.hash) {
            return Err(Error::InvalidInput(format!(
                "invalid object hash {:?}",
                file.object.hash
            )));
        }

        // Duplicates are checked case-insensitively to avoid surprises on
        // case-insensitive filesystems.
        let lower = file.path.to_lowercase();
        if !seen_paths.insert(lower) {
            return Err(Error::InvalidInput(format!(
                "duplicate file path {:?}",
                file.path
            )));
        }
    }

    if hash_manifest(manifest) != manifest.hash {
        return Err(Error::InvalidInput("invalid manifest hash".into()));
    }

    Ok(())
}

/// Validates a manifest that has not yet been assigned a version.
pub fn validate_unpublished(manifest: &Manifest) -> Result<()> {
    validate_basic(manifest)?;
    if manifest.package_version != 0 {
        return Err(Error::InvalidInput("package version is not zero".into()));
    }
    if manifest.published != 0 {
        return Err(Error::InvalidInput("published date is not zero".into()));
    }
    Ok(())
}

/// Validates a manifest that has been through [`crate::manifest_store::publish`].
pub fn validate_published(manifest: &Manifest) -> Result<()> {
    validate_basic(manifest)?;
    if manifest.package_version == 0 {
        return Err(Error::InvalidInput("invalid package version".into()));
    }
    if manifest.published <= 0 {
        return Err(Error::InvalidInput("invalid published date".into()));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_object() -> Object {
        Object {
            hash: "a".repeat(64),
            size: 8,
        }
    }

    #[test]
    fn package_name_rule_matches_spec_examples() {
        assert!(validate_package_name("foo-bar_123"));
        assert!(!validate_package_name("ABC123"));
        assert!(!validate_package_name("a.b"));
        assert!(!validate_package_name(""));
        assert!(!validate_package_name("café"));
    }

    #[test]
    fn empty_manifest_hash_is_stable() {
        let m = Manifest {
            manifest_version: 1,
            package_name: "pkg".into(),
            package_version: 0,
            published: 0,
            hash: String::new(),
            files: vec![],
        };
        // manifest_version fed twice, package_name, published, no files.
        assert_eq!(
            hash_manifest(&m),
            "f1386bcdcd90cdc946f5921c18c7f094ed2caef66b8520e90157414191601c43"
        );
    }

    #[test]
    fn publishing_changes_hash_only_via_published_stamp() {
        let files = vec![File {
            path: "data.bin".into(),
            object: sample_object(),
        }];
        let unpublished = new_unpublished("foo", files.clone());
        let mut published = unpublished.clone();
        published.package_version = 1;
        published.published = 123_456;
        published.hash = hash_manifest(&published);

        assert_ne!(unpublished.hash, published.hash);

        // Changing package_version alone (leaving published at 0) must not
        // change the hash: package_version never feeds the hasher.
        let mut version_bumped_only = unpublished.clone();
        version_bumped_only.package_version = 7;
        assert_eq!(unpublished.hash, hash_manifest(&version_bumped_only));
    }

    #[test]
    fn rejects_path_traversal_and_case_insensitive_duplicates() {
        let files = vec![
            File {
                path: "../escape".into(),
                object: sample_object(),
            },
        ];
        let m = new_unpublished("foo", files);
        assert!(validate_unpublished(&m).is_err());

        let files = vec![
            File {
                path: "Data.bin".into(),
                object: sample_object(),
            },
            File {
                path: "data.bin".into(),
                object: sample_object(),
            },
        ];
        let m = new_unpublished("foo", files);
        assert!(validate_unpublished(&m).is_err());
    }

    #[test]
    fn unpublished_and_published_validators_enforce_their_stamps() {
        let files = vec![File {
            path: "data.bin".into(),
            object: sample_object(),
        }];
        let unpublished = new_unpublished("foo", files);
        assert!(validate_unpublished(&unpublished).is_ok());
        assert!(validate_published(&unpublished).is_err());

        let mut published = unpublished.clone();
        published.package_version = 1;
        published.published = 1;
        published.hash = hash_manifest(&published);
        assert!(validate_published(&published).is_ok());
        assert!(validate_unpublished(&published).is_err());
    }
}
