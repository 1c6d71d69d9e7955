//! Content-addressed store of compressed blobs on a filesystem.
//!
//! Layout: for hash `HH...`, the blob lives at `<root>/<HH>/<rest>`, with an
//! `<rest>_size` sidecar holding the uncompressed byte count. Inserts are
//! deduplicating: two concurrent inserts of identical content both
//! succeed, and exactly one temp file survives the race as the canonical
//! blob.

use std::fs;
use std::io::{Read, Write};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, instrument, trace};

use crate::compression;
use crate::counters::{self, Op};
use crate::error::{Error, Result};
use crate::framing;
use crate::hashing::HashingWriter;
use crate::manifest::Object;

const SIZE_SUFFIX: &str = "_size";

pub struct ObjectStore {
    root: Utf8PathBuf,
    // Serializes the decisive rename-and-sidecar region of `add_object`.
    // Reads never take this lock.
    insert_lock: Mutex<()>,
}

fn object_path(root: &Utf8Path, hash: &str) -> Utf8PathBuf {
    if hash.len() <= 2 {
        return root.join(hash);
    }
    let (folder, rest) = hash.split_at(2);
    root.join(folder).join(rest)
}

impl ObjectStore {
    pub fn open(root: Utf8PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            insert_lock: Mutex::new(()),
        })
    }

    pub fn get_object(&self, hash: &str) -> Result<Object> {
        let path = object_path(&self.root, hash);
        if !path.is_file() {
            return Err(Error::NotFound(format!("object {hash}")));
        }

        let size_path = format!("{path}{SIZE_SUFFIX}");
        let size_bytes = fs::read(&size_path)
            .map_err(|_| Error::Integrity(format!("missing size sidecar for object {hash}")))?;
        let buf: [u8; framing::PREFIX_LEN] = size_bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Integrity(format!("malformed size sidecar for object {hash}")))?;
        let size = framing::decode(&buf)?;
        if size < 0 {
            return Err(Error::Integrity(format!("negative size for object {hash}")));
        }

        Ok(Object {
            hash: hash.to_owned(),
            size: size as u64,
        })
    }

    /// Streams `reader` through the hasher and compressor, then
    /// deduplicates and persists the resulting blob.
    #[instrument(skip(self, reader))]
    pub fn add_object<R: Read>(&self, mut reader: R) -> Result<Object> {
        let mut temp = tempfile::Builder::new()
            .prefix("tmp_")
            .tempfile_in(&self.root)?;

        let (hash, size) = {
            let encoder = compression::compress(temp.as_file_mut())?;
            let mut hashing_encoder = HashingWriter::new(encoder);
            let size = std::io::copy(&mut reader, &mut hashing_encoder)?;
            let (hash, encoder) = hashing_encoder.finalize();
            encoder.finish()?;
            (hash, size)
        };
        let hash = hash.to_string();

        {
            let _guard = self.insert_lock.lock().unwrap();

            if self.get_object(&hash).is_ok() {
                trace!("object {hash} already present, dropping upload");
                counters::bump(Op::ObjectDeduplicated);
                drop(temp);
            } else {
                let final_path = object_path(&self.root, &hash);
                if let Some(parent) = final_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                temp.persist(&final_path)
                    .map_err(|e| Error::Io(e.error))?;

                let size_path = format!("{final_path}{SIZE_SUFFIX}");
                fs::write(&size_path, framing::encode(size as i64))?;
                debug!("stored object {hash} ({size} bytes)");
                counters::bump(Op::ObjectAdded);
            }
        }

        Ok(Object { hash, size })
    }

    /// Opens the blob for `hash`, returning a reader that yields
    /// uncompressed bytes.
    pub fn read_object(&self, hash: &str) -> Result<impl Read> {
        let path = object_path(&self.root, hash);
        let fh = fs::File::open(&path)
            .map_err(|_| Error::NotFound(format!("object {hash}")))?;
        Ok(compression::decompress(fh)?)
    }

    /// Walks the store, returning every object in unspecified order.
    pub fn get_objects(&self) -> Result<Vec<Object>> {
        let mut objects = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let folder_name = entry.file_name();
            let folder_name = folder_name.to_string_lossy();

            for inner in fs::read_dir(entry.path())? {
                let inner = inner?;
                if !inner.file_type()?.is_file() {
                    continue;
                }
                let file_name = inner.file_name();
                let file_name = file_name.to_string_lossy();
                if file_name.ends_with(SIZE_SUFFIX) {
                    continue;
                }
                let hash = format!("{folder_name}{file_name}");
                objects.push(self.get_object(&hash)?);
            }
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_then_read_round_trips_arbitrary_bytes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap())?;

        let bytes = b"some file content, not especially large".as_slice();
        let object = store.add_object(bytes)?;
        assert_eq!(object.size, bytes.len() as u64);

        let mut read_back = Vec::new();
        store.read_object(&object.hash)?.read_to_end(&mut read_back)?;
        assert_eq!(read_back, bytes);
        Ok(())
    }

    #[test]
    fn add_object_is_idempotent_on_disk() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap())?;

        let bytes = b"repeat content";
        let first = store.add_object(bytes.as_slice())?;
        let second = store.add_object(bytes.as_slice())?;
        assert_eq!(first, second);
        assert_eq!(store.get_objects()?.len(), 1);
        Ok(())
    }

    #[test]
    fn empty_object_is_valid() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap())?;

        let object = store.add_object(std::io::empty())?;
        assert_eq!(object.size, 0);
        assert_eq!(
            object.hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
        Ok(())
    }

    #[test]
    fn get_object_fails_for_unknown_hash() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ObjectStore::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap())?;
        assert!(store.get_object(&"0".repeat(64)).is_err());
        Ok(())
    }
}
