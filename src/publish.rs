//! The client-side pipeline: turn a folder into a published package, and
//! turn a published package back into a folder.

use std::collections::{HashMap, HashSet};
use std::fs;

use anyhow::{Context, Result, bail, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, instrument};

use crate::counters::{self, Op};
use crate::hashing::hash_file;
use crate::limits;
use crate::manifest::{self, File, Manifest, Object};
use crate::transport::{self, Transport};

/// Walks `folder`, hashing every regular file it contains, concurrently.
/// Paths in the resulting [`File`] list are relative to `folder` and use
/// forward slashes regardless of host platform.
async fn hash_folder(folder: &Utf8Path) -> Result<Vec<File>> {
    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(folder) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let absolute = Utf8Path::from_path(entry.path())
            .with_context(|| format!("{} is not valid UTF-8", entry.path().display()))?
            .to_path_buf();
        let relative = absolute
            .strip_prefix(folder)
            .expect("walkdir always yields children of the root")
            .to_path_buf();
        entries.push((relative, absolute));
    }

    let hashed = crate::concurrently::map_concurrently(entries.into_iter().map(
        |(relative, absolute)| async move {
            let size = fs::metadata(&absolute)?.len();
            let object_hash =
                tokio::task::spawn_blocking(move || hash_file(&absolute)).await??;
            Ok::<File, anyhow::Error>(File {
                path: relative.as_str().replace('\\', "/"),
                object: Object {
                    hash: object_hash.to_string(),
                    size,
                },
            })
        },
    ))
    .await?;

    Ok(hashed)
}

/// Uploads every regular file under `folder` as a new version of
/// `package_name` and publishes the resulting manifest.
#[instrument(skip(transport))]
pub async fn upload_folder(
    transport: &dyn Transport,
    package_name: &str,
    folder: &Utf8Path,
) -> Result<Manifest> {
    let files = hash_folder(folder).await?;
    ensure!(!files.is_empty(), "{folder} contains no files to publish");
    let manifest = manifest::new_unpublished(package_name, files);

    let server_limits = transport.get_limits()?;
    limits::check(&manifest, &server_limits)?;

    let objects: Vec<Object> = manifest.files.iter().map(|f| f.object.clone()).collect();
    let present: HashSet<String> = transport
        .check_objects(&objects)?
        .into_iter()
        .map(|o| o.hash)
        .collect();

    let mut seen_hashes = HashSet::new();
    let mut missing_objects = Vec::new();
    let mut missing_paths = Vec::new();
    for file in &manifest.files {
        if present.contains(&file.object.hash) {
            counters::bump(Op::UploadFileSkippedAlreadyPresent);
            continue;
        }
        if seen_hashes.insert(file.object.hash.clone()) {
            missing_objects.push(file.object.clone());
            missing_paths.push(file.path.clone());
        }
    }

    if !missing_objects.is_empty() {
        info!(count = missing_objects.len(), "uploading missing objects");
        let payloads = missing_paths
            .iter()
            .map(|path| -> Result<Box<dyn std::io::Read + Send>> {
                Ok(Box::new(fs::File::open(folder.join(path))?))
            })
            .collect::<Result<Vec<_>>>()?;
        let stored = transport.upload_objects(&missing_objects, payloads)?;
        ensure!(
            stored.len() == missing_objects.len(),
            "server stored {} objects, expected {}",
            stored.len(),
            missing_objects.len()
        );
    }

    let published = transport.publish_manifest(&manifest)?;
    ensure!(
        published.package_name == package_name,
        "server published under a different package name: {}",
        published.package_name
    );
    ensure!(
        published.files.len() == manifest.files.len(),
        "server published a manifest with a different file count"
    );
    debug!(version = published.package_version, "published");
    Ok(published)
}

/// Fetches the published manifest for `(name, version)`.
#[instrument(skip(transport))]
pub fn download_manifest(transport: &dyn Transport, name: &str, version: u64) -> Result<Manifest> {
    let manifest = transport.get_manifest(name, version)?;
    manifest::validate_published(&manifest)?;
    Ok(manifest)
}

fn file_is_present(folder: &Utf8Path, file: &File) -> bool {
    let path = folder.join(&file.path);
    match fs::metadata(&path) {
        Ok(meta) if meta.len() == file.object.size => {
            hash_file(&path).is_ok_and(|h| h.to_string() == file.object.hash)
        }
        _ => false,
    }
}

/// Materializes every file in `manifest` under `folder`, fetching only
/// what isn't already present with matching size and hash. If `clean` is
/// set, anything under `folder` the manifest doesn't reference is removed
/// afterward.
#[instrument(skip(transport, manifest), fields(package = %manifest.package_name, version = manifest.package_version))]
pub fn download(
    transport: &dyn Transport,
    manifest: &Manifest,
    folder: &Utf8Path,
    clean: bool,
) -> Result<()> {
    fs::create_dir_all(folder)?;

    let missing: Vec<&File> = manifest
        .files
        .iter()
        .filter(|f| !file_is_present(folder, f))
        .collect();

    if missing.is_empty() {
        info!("every file already present");
    } else {
        let mut seen_hashes = HashSet::new();
        let unique_objects: Vec<Object> = missing
            .iter()
            .filter(|f| seen_hashes.insert(f.object.hash.clone()))
            .map(|f| f.object.clone())
            .collect();

        info!(count = unique_objects.len(), "downloading missing objects");
        let batch_bytes = transport.download_objects(&unique_objects)?;
        let (header, mut reader) = transport::open_download_batch(batch_bytes)?;

        // Group the files that need each hash so we can stream the first
        // one straight off the wire and copy the rest locally.
        let mut files_by_hash: HashMap<&str, Vec<&File>> = HashMap::new();
        for file in missing.iter().copied() {
            files_by_hash
                .entry(file.object.hash.as_str())
                .or_default()
                .push(file);
        }

        for object in &header {
            let Some(files) = files_by_hash.get(object.hash.as_str()) else {
                bail!("server returned unrequested object {}", object.hash);
            };
            let (first, rest) = files
                .split_first()
                .expect("files_by_hash entries are never empty");

            let target = folder.join(&first.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let out = fs::File::create(&target)?;
            let mut hashing_out = crate::hashing::HashingWriter::new(out);
            let mut limited = std::io::Read::take(reader.payload_reader(), object.size);
            let copied = std::io::copy(&mut limited, &mut hashing_out)?;
            let (hash, _) = hashing_out.finalize();
            ensure!(
                copied == object.size,
                "downloaded {copied} bytes for {} but expected {}",
                object.hash,
                object.size
            );
            ensure!(
                hash.to_string() == object.hash,
                "downloaded object {} re-hashed to {hash}",
                object.hash
            );
            counters::bump(Op::DownloadStreamedFromWire);

            for file in rest {
                let other_target = folder.join(&file.path);
                if let Some(parent) = other_target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&target, &other_target)?;
                let rehashed = hash_file(&other_target)?;
                ensure!(
                    rehashed.to_string() == object.hash,
                    "local copy to {} doesn't match {}",
                    file.path,
                    object.hash
                );
                counters::bump(Op::DownloadCopiedLocally);
            }
        }
    }

    if clean {
        clean_folder(manifest, folder)?;
    }
    Ok(())
}

/// Removes everything under `folder` not referenced by `manifest`,
/// skipping dot-prefixed entries and anything whose relative path would
/// contain `..`.
fn clean_folder(manifest: &Manifest, folder: &Utf8Path) -> Result<()> {
    let wanted: HashSet<&str> = manifest.files.iter().map(|f| f.path.as_str()).collect();
    let wanted_dirs: HashSet<Utf8PathBuf> = wanted
        .iter()
        .flat_map(|p| Utf8Path::new(p).ancestors().skip(1))
        .map(|p| p.to_path_buf())
        .collect();

    let mut to_remove = Vec::new();
    for entry in walkdir::WalkDir::new(folder).contents_first(true) {
        let entry = entry?;
        if entry.path() == folder.as_std_path() {
            continue;
        }
        let Some(relative) = Utf8Path::from_path(entry.path())
            .ok()
            .and_then(|p| p.strip_prefix(folder).ok())
        else {
            continue;
        };
        let relative_str = relative.as_str();
        if relative_str.starts_with('.') || relative_str.contains("..") {
            continue;
        }
        if wanted.contains(relative_str) || wanted_dirs.contains(relative) {
            continue;
        }
        to_remove.push(entry.path().to_owned());
    }

    for path in to_remove {
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::auth::AllowAll;
    use crate::limits::Limits;
    use crate::store::PackageStore;
    use crate::transport::Local;
    use std::sync::Arc;

    fn local_transport() -> (tempfile::TempDir, Local) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            PackageStore::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap())
                .unwrap();
        (
            dir,
            Local::new(Arc::new(store), Arc::new(AllowAll), Limits::default()),
        )
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_a_folder() -> Result<()> {
        let (_store_dir, transport) = local_transport();

        let src_dir = tempfile::tempdir()?;
        let src = Utf8PathBuf::from_path_buf(src_dir.path().to_owned()).unwrap();
        fs::write(src.join("a.txt"), b"hello")?;
        fs::create_dir(src.join("nested"))?;
        fs::write(src.join("nested/b.txt"), b"world")?;

        let published = upload_folder(&transport, "demo", &src).await?;
        assert_eq!(published.package_version, 1);
        assert_eq!(published.files.len(), 2);

        let dst_dir = tempfile::tempdir()?;
        let dst = Utf8PathBuf::from_path_buf(dst_dir.path().to_owned()).unwrap();
        download(&transport, &published, &dst, false)?;

        assert_eq!(fs::read(dst.join("a.txt"))?, b"hello");
        assert_eq!(fs::read(dst.join("nested/b.txt"))?, b"world");
        Ok(())
    }

    #[tokio::test]
    async fn download_clean_removes_unreferenced_files() -> Result<()> {
        let (_store_dir, transport) = local_transport();

        let src_dir = tempfile::tempdir()?;
        let src = Utf8PathBuf::from_path_buf(src_dir.path().to_owned()).unwrap();
        fs::write(src.join("keep.txt"), b"keep me")?;
        let published = upload_folder(&transport, "demo", &src).await?;

        let dst_dir = tempfile::tempdir()?;
        let dst = Utf8PathBuf::from_path_buf(dst_dir.path().to_owned()).unwrap();
        fs::write(dst.join("stray.txt"), b"should be removed")?;
        fs::write(dst.join(".dotfile"), b"left alone")?;

        download(&transport, &published, &dst, true)?;

        assert!(!dst.join("stray.txt").exists());
        assert!(dst.join(".dotfile").exists());
        assert!(dst.join("keep.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn upload_of_an_empty_folder_is_rejected() -> Result<()> {
        let (_store_dir, transport) = local_transport();
        let src_dir = tempfile::tempdir()?;
        let src = Utf8PathBuf::from_path_buf(src_dir.path().to_owned()).unwrap();
        assert!(upload_folder(&transport, "demo", &src).await.is_err());
        Ok(())
    }
}
