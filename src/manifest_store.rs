//! Catalog of published manifests, keyed by `(package_name, version)`.
//!
//! Layout: `<root>/<package_name>/<version>/manifest.json`. Publication is
//! the only operation that assigns a version; [`add`] (used to restore a
//! manifest into a client-side cache) only ever writes an already-published
//! one.

use std::fs;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use camino::Utf8PathBuf;
use tracing::{debug, instrument};

use crate::counters::{self, Op};
use crate::error::{Error, Result};
use crate::manifest::{self, Manifest};

const MANIFEST_FILE_NAME: &str = "manifest.json";

pub struct ManifestStore {
    root: Utf8PathBuf,
    // Shared for queries; exclusive for the version-assignment-and-write
    // region of `publish`. Never held across network I/O.
    lock: RwLock<()>,
}

impl ManifestStore {
    pub fn open(root: Utf8PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock: RwLock::new(()),
        })
    }

    fn version_dir(&self, name: &str, version: u64) -> Utf8PathBuf {
        self.root.join(name).join(version.to_string())
    }

    fn write_locked(&self, manifest: &Manifest) -> Result<()> {
        manifest::validate_published(manifest)?;

        let dir = self.version_dir(&manifest.package_name, manifest.package_version);
        if dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "manifest with package name {} and version {} already exists",
                manifest.package_name, manifest.package_version
            )));
        }

        fs::create_dir_all(&dir)?;
        let json = serde_json::to_vec(manifest)?;
        fs::write(dir.join(MANIFEST_FILE_NAME), json)?;
        Ok(())
    }

    /// Scans the version directories of `package_name` directly, without
    /// taking `self.lock`. Callers already holding the lock (in either
    /// mode) must use this instead of the public, self-locking
    /// [`Self::get_versions`].
    fn scan_versions(&self, package_name: &str) -> Result<Vec<u64>> {
        let package_dir = self.root.join(package_name);
        if !package_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&package_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let version: u64 = name.parse().map_err(|_| {
                Error::Integrity(format!("non-numeric version directory {name:?}"))
            })?;
            versions.push(version);
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn search_duplicate(&self, manifest: &Manifest) -> Result<()> {
        for version in self.get_versions(&manifest.package_name)? {
            let existing = self.get_manifest(&manifest.package_name, version)?;
            if existing.files.len() != manifest.files.len() {
                continue;
            }
            let all_identical = existing.files.iter().all(|existing_file| {
                manifest.files.iter().any(|file| {
                    file.path == existing_file.path
                        && file.object.hash == existing_file.object.hash
                        && file.object.size == existing_file.object.size
                })
            });
            if all_identical {
                return Err(Error::DuplicatePackage {
                    package_name: manifest.package_name.clone(),
                    existing_version: version,
                });
            }
        }
        Ok(())
    }

    /// Validates, assigns the next version, stamps `published`, and
    /// persists `manifest`. Mutates `manifest` in place to reflect the
    /// assigned version and timestamp.
    #[instrument(skip_all, fields(package = %manifest.package_name))]
    pub fn publish(&self, manifest: &mut Manifest) -> Result<()> {
        manifest::validate_unpublished(manifest)?;
        self.search_duplicate(manifest)?;

        let _guard = self.lock.write().unwrap();

        let new_version = self
            .scan_versions(&manifest.package_name)?
            .into_iter()
            .max()
            .map(|v| v + 1)
            .unwrap_or(1);

        manifest.package_version = new_version;
        manifest.published = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        manifest.hash = manifest::hash_manifest(manifest);

        self.write_locked(manifest)?;
        counters::bump(Op::ManifestPublished);
        debug!(version = new_version, "published manifest");
        Ok(())
    }

    /// Adds an already-published manifest without assigning a new version.
    /// Used by the client-side cache and for restoring from backup.
    pub fn add(&self, manifest: &Manifest) -> Result<()> {
        let _guard = self.lock.write().unwrap();
        self.write_locked(manifest)
    }

    pub fn get_names(&self) -> Result<Vec<String>> {
        let _guard = self.lock.read().unwrap();
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    pub fn get_versions(&self, package_name: &str) -> Result<Vec<u64>> {
        let _guard = self.lock.read().unwrap();
        self.scan_versions(package_name)
    }

    pub fn get_manifest(&self, package_name: &str, version: u64) -> Result<Manifest> {
        let _guard = self.lock.read().unwrap();
        let path = self.version_dir(package_name, version).join(MANIFEST_FILE_NAME);
        let json = fs::read(&path)
            .map_err(|_| Error::NotFound(format!("manifest {package_name} version {version}")))?;
        Ok(serde_json::from_slice(&json)?)
    }
}
