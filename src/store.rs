//! The package store: the union of an [`ObjectStore`] and a
//! [`ManifestStore`] under one root, plus the cross-cutting operation that
//! needs both -- validation.

use std::io::Read;

use camino::Utf8PathBuf;
use serde_derive::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::manifest::{self, Manifest, Object};
use crate::manifest_store::ManifestStore;
use crate::object_store::ObjectStore;

const MANIFESTS_DIR: &str = "manifests";
const OBJECTS_DIR: &str = "objects";

pub struct PackageStore {
    manifests: ManifestStore,
    objects: ObjectStore,
}

/// Summary counts returned by [`PackageStore::validate`].
///
/// `packages` counts published manifests (every version of every package),
/// matching this store's on-disk layout of one manifest file per version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub packages: u64,
    pub objects: u64,
    pub size: u64,
}

impl PackageStore {
    pub fn open(root: Utf8PathBuf) -> Result<Self> {
        Ok(Self {
            manifests: ManifestStore::open(root.join(MANIFESTS_DIR))?,
            objects: ObjectStore::open(root.join(OBJECTS_DIR))?,
        })
    }

    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn publish_manifest(&self, manifest: &mut Manifest) -> Result<()> {
        self.manifests.publish(manifest)
    }

    pub fn add_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.manifests.add(manifest)
    }

    pub fn get_names(&self) -> Result<Vec<String>> {
        self.manifests.get_names()
    }

    pub fn get_versions(&self, package_name: &str) -> Result<Vec<u64>> {
        self.manifests.get_versions(package_name)
    }

    pub fn get_manifest(&self, package_name: &str, version: u64) -> Result<Manifest> {
        self.manifests.get_manifest(package_name, version)
    }

    pub fn get_object(&self, hash: &str) -> Result<Object> {
        self.objects.get_object(hash)
    }

    pub fn add_object<R: Read>(&self, reader: R) -> Result<Object> {
        self.objects.add_object(reader)
    }

    pub fn read_object(&self, hash: &str) -> Result<impl Read> {
        self.objects.read_object(hash)
    }

    pub fn get_objects(&self) -> Result<Vec<Object>> {
        self.objects.get_objects()
    }

    /// Checks the store for internal consistency: every published manifest
    /// is well-formed, every object it references exists, and every stored
    /// blob re-hashes to its own name. Returns summary counts on success.
    pub fn validate(&self) -> Result<ValidationStats> {
        use std::collections::HashSet;

        let mut referenced: HashSet<String> = HashSet::new();
        let mut package_count: u64 = 0;

        for name in self.manifests.get_names()? {
            for version in self.manifests.get_versions(&name)? {
                let m = self.manifests.get_manifest(&name, version)?;
                manifest::validate_published(&m)?;
                package_count += 1;
                for file in &m.files {
                    referenced.insert(file.object.hash.clone());
                }
            }
        }

        let stored_objects = self.objects.get_objects()?;
        let stored_hashes: HashSet<&str> =
            stored_objects.iter().map(|o| o.hash.as_str()).collect();

        for hash in &referenced {
            if !stored_hashes.contains(hash.as_str()) {
                return Err(crate::error::Error::Integrity(format!(
                    "manifest references missing object {hash}"
                )));
            }
        }

        let mut total_size: u64 = 0;
        for object in &stored_objects {
            let mut reader = self.objects.read_object(&object.hash)?;
            let mut hasher = crate::hashing::HashingWriter::new(std::io::sink());
            std::io::copy(&mut reader, &mut hasher)?;
            let (hash, _) = hasher.finalize();
            if hash.to_string() != object.hash {
                return Err(crate::error::Error::Integrity(format!(
                    "object {} does not match its own content (recomputed {hash})",
                    object.hash
                )));
            }
            total_size += object.size;
        }

        info!(
            packages = package_count,
            objects = stored_objects.len(),
            size = total_size,
            "store validated"
        );

        Ok(ValidationStats {
            packages: package_count,
            objects: stored_objects.len() as u64,
            size: total_size,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::manifest::File;

    fn store_in_temp_dir() -> (tempfile::TempDir, PackageStore) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            PackageStore::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap())
                .unwrap();
        (dir, store)
    }

    #[test]
    fn validate_succeeds_on_an_empty_store() {
        let (_dir, store) = store_in_temp_dir();
        assert_eq!(store.validate().unwrap(), ValidationStats::default());
    }

    #[test]
    fn validate_reports_packages_objects_and_size() -> anyhow::Result<()> {
        let (_dir, store) = store_in_temp_dir();

        let object = store.add_object(b"contents".as_slice())?;
        let mut m = manifest::new_unpublished(
            "pkg",
            vec![File {
                path: "f.bin".into(),
                object: object.clone(),
            }],
        );
        store.publish_manifest(&mut m)?;

        let stats = store.validate()?;
        assert_eq!(stats.packages, 1);
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.size, object.size);
        Ok(())
    }

    #[test]
    fn validate_detects_a_manifest_referencing_a_missing_object() -> anyhow::Result<()> {
        let (_dir, store) = store_in_temp_dir();

        let mut m = manifest::new_unpublished(
            "pkg",
            vec![File {
                path: "f.bin".into(),
                object: Object {
                    hash: "a".repeat(64),
                    size: 8,
                },
            }],
        );
        store.publish_manifest(&mut m)?;

        assert!(store.validate().is_err());
        Ok(())
    }
}
