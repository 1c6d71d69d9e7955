//! The seam the publication pipeline (§ below, see [`crate::publish`]) calls
//! to reach a store -- in-process or over the network -- without knowing
//! which.

use std::io::Read;
use std::sync::Arc;

use anyhow::{Result, ensure};
use tracing::instrument;

use crate::auth::AuthOracle;
use crate::batch::{self, BatchReader};
use crate::counters::{self, Op};
use crate::limits::Limits;
use crate::manifest::{Manifest, Object};
use crate::store::PackageStore;

/// What the publication pipeline needs from a store, regardless of
/// whether it's in the same process or across the network. Every method
/// is blocking; callers that want overlap run several at once (see
/// [`crate::concurrently`]).
pub trait Transport: Send + Sync {
    fn get_limits(&self) -> Result<Limits>;
    fn get_manifest(&self, name: &str, version: u64) -> Result<Manifest>;
    /// Returns the subset of `objects` already present on the far side.
    fn check_objects(&self, objects: &[Object]) -> Result<Vec<Object>>;
    /// Uploads `objects` with their bytes (one reader per object, same
    /// order); returns what the far side actually stored.
    fn upload_objects(
        &self,
        objects: &[Object],
        payloads: Vec<Box<dyn Read + Send>>,
    ) -> Result<Vec<Object>>;
    /// Requests `objects`; returns a batch (§4.7 wire format) of whichever
    /// subset is present, to be opened with [`BatchReader`].
    fn download_objects(&self, objects: &[Object]) -> Result<Vec<u8>>;
    fn publish_manifest(&self, manifest: &Manifest) -> Result<Manifest>;
}

/// Talks directly to an in-process [`PackageStore`] after checking an
/// [`AuthOracle`]. What same-process hosting and most tests use instead of
/// a real socket.
pub struct Local {
    store: Arc<PackageStore>,
    auth: Arc<dyn AuthOracle>,
    limits: Limits,
}

impl Local {
    pub fn new(store: Arc<PackageStore>, auth: Arc<dyn AuthOracle>, limits: Limits) -> Self {
        Self {
            store,
            auth,
            limits,
        }
    }
}

impl Transport for Local {
    fn get_limits(&self) -> Result<Limits> {
        Ok(self.limits)
    }

    fn get_manifest(&self, name: &str, version: u64) -> Result<Manifest> {
        ensure!(self.auth.can_read(name), "not authorized to read {name}");
        Ok(self.store.get_manifest(name, version)?)
    }

    fn check_objects(&self, objects: &[Object]) -> Result<Vec<Object>> {
        Ok(objects
            .iter()
            .filter(|o| self.store.get_object(&o.hash).is_ok())
            .cloned()
            .collect())
    }

    fn upload_objects(
        &self,
        objects: &[Object],
        payloads: Vec<Box<dyn Read + Send>>,
    ) -> Result<Vec<Object>> {
        ensure!(objects.len() == payloads.len(), "object/payload count mismatch");
        let mut stored = Vec::with_capacity(objects.len());
        for (declared, payload) in objects.iter().zip(payloads) {
            let object = self.store.add_object(payload)?;
            ensure!(
                object.hash == declared.hash,
                "uploaded bytes for {} hashed to {} instead",
                declared.hash,
                object.hash
            );
            ensure!(
                object.size == declared.size,
                "uploaded bytes for {} had size {} instead of declared {}",
                declared.hash,
                object.size,
                declared.size
            );
            stored.push(object);
        }
        Ok(stored)
    }

    fn download_objects(&self, objects: &[Object]) -> Result<Vec<u8>> {
        let mut present = Vec::new();
        let mut payloads: Vec<Box<dyn Read>> = Vec::new();
        for object in objects {
            if let Ok(stored) = self.store.get_object(&object.hash) {
                payloads.push(Box::new(self.store.read_object(&stored.hash)?));
                present.push(stored);
            }
        }
        let mut out = Vec::new();
        batch::write_batch(&mut out, &present, payloads)?;
        Ok(out)
    }

    fn publish_manifest(&self, manifest: &Manifest) -> Result<Manifest> {
        ensure!(
            self.auth.can_write(&manifest.package_name),
            "not authorized to publish {}",
            manifest.package_name
        );
        let mut manifest = manifest.clone();
        self.store.publish_manifest(&mut manifest)?;
        Ok(manifest)
    }
}

/// Speaks the HTTP surface of a remote `bindepot` server with a blocking
/// `ureq` client. One `Http` per server; cheap to clone the pieces it
/// holds (`ureq::Agent` is already internally reference-counted).
pub struct Http {
    base_url: String,
    agent: ureq::Agent,
    token: Option<String>,
}

const API_TOKEN_HEADER: &str = "bdm-api-token";

impl Http {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            agent: ureq::Agent::new(),
            token,
        }
    }

    fn authed(&self, req: ureq::Request) -> ureq::Request {
        match &self.token {
            Some(token) => req.set(API_TOKEN_HEADER, token),
            None => req,
        }
    }

    fn get(&self, path: &str) -> ureq::Request {
        self.authed(self.agent.get(&format!("{}{path}", self.base_url)))
    }

    fn post(&self, path: &str) -> ureq::Request {
        self.authed(self.agent.post(&format!("{}{path}", self.base_url)))
    }
}

impl Transport for Http {
    #[instrument(skip(self))]
    fn get_limits(&self) -> Result<Limits> {
        Ok(self.get("/limits").call()?.into_json()?)
    }

    #[instrument(skip(self))]
    fn get_manifest(&self, name: &str, version: u64) -> Result<Manifest> {
        Ok(self
            .get(&format!("/manifests/{name}/{version}"))
            .call()?
            .into_json()?)
    }

    fn check_objects(&self, objects: &[Object]) -> Result<Vec<Object>> {
        let mut body = Vec::new();
        batch::write_batch(&mut body, objects, std::iter::empty::<&[u8]>())?;
        Ok(self
            .post("/objects/check")
            .send_bytes(&body)?
            .into_json()?)
    }

    fn upload_objects(
        &self,
        objects: &[Object],
        payloads: Vec<Box<dyn Read + Send>>,
    ) -> Result<Vec<Object>> {
        let mut body = Vec::new();
        batch::write_batch(&mut body, objects, payloads)?;
        Ok(self
            .post("/objects/upload")
            .send_bytes(&body)?
            .into_json()?)
    }

    fn download_objects(&self, objects: &[Object]) -> Result<Vec<u8>> {
        let mut request_body = Vec::new();
        batch::write_batch(&mut request_body, objects, std::iter::empty::<&[u8]>())?;
        let response = self.post("/objects/download").send_bytes(&request_body)?;
        let mut body = Vec::new();
        response.into_reader().read_to_end(&mut body)?;
        Ok(body)
    }

    #[instrument(skip(self, manifest), fields(package = %manifest.package_name))]
    fn publish_manifest(&self, manifest: &Manifest) -> Result<Manifest> {
        Ok(self.post("/manifests").send_json(manifest)?.into_json()?)
    }
}

/// Opens a download-batch response into its header and a payload reader.
pub fn open_download_batch(bytes: Vec<u8>) -> Result<(Vec<Object>, BatchReader<std::io::Cursor<Vec<u8>>>)> {
    Ok(BatchReader::open(std::io::Cursor::new(bytes))?)
}

/// Wraps another transport with a local cache store: manifests and objects
/// already in the cache are served from disk, with no trip through `inner`;
/// anything fetched from `inner` is saved into the cache for next time.
///
/// `cache_size_cap` bounds how much the cache is allowed to grow by new
/// writes (`0` means unlimited, the same convention [`Limits`] uses):
/// once the cache holds at least that many bytes, newly fetched objects are
/// still served but no longer written into it.
pub struct Cached {
    inner: Box<dyn Transport>,
    cache: Arc<PackageStore>,
    cache_size_cap: u64,
}

impl Cached {
    pub fn new(inner: Box<dyn Transport>, cache: Arc<PackageStore>, cache_size_cap: u64) -> Self {
        Self {
            inner,
            cache,
            cache_size_cap,
        }
    }

    fn cache_size(&self) -> Result<u64> {
        Ok(self.cache.get_objects()?.iter().map(|o| o.size).sum())
    }
}

impl Transport for Cached {
    fn get_limits(&self) -> Result<Limits> {
        self.inner.get_limits()
    }

    #[instrument(skip(self))]
    fn get_manifest(&self, name: &str, version: u64) -> Result<Manifest> {
        if let Ok(cached) = self.cache.get_manifest(name, version) {
            return Ok(cached);
        }
        let manifest = self.inner.get_manifest(name, version)?;
        self.cache.add_manifest(&manifest)?;
        Ok(manifest)
    }

    fn check_objects(&self, objects: &[Object]) -> Result<Vec<Object>> {
        self.inner.check_objects(objects)
    }

    fn upload_objects(
        &self,
        objects: &[Object],
        payloads: Vec<Box<dyn Read + Send>>,
    ) -> Result<Vec<Object>> {
        self.inner.upload_objects(objects, payloads)
    }

    fn download_objects(&self, objects: &[Object]) -> Result<Vec<u8>> {
        let mut header = Vec::new();
        let mut payloads: Vec<Box<dyn Read>> = Vec::new();
        let mut missing = Vec::new();

        for object in objects {
            if let Ok(stored) = self.cache.get_object(&object.hash) {
                counters::bump(Op::ObjectCacheHit);
                payloads.push(Box::new(self.cache.read_object(&stored.hash)?));
                header.push(stored);
            } else {
                counters::bump(Op::ObjectCacheMiss);
                missing.push(object.clone());
            }
        }

        if !missing.is_empty() {
            let fetched_bytes = self.inner.download_objects(&missing)?;
            let (fetched_header, mut fetched_reader) = open_download_batch(fetched_bytes)?;
            let mut cache_size = self.cache_size()?;

            for object in &fetched_header {
                let mut limited =
                    std::io::Read::take(fetched_reader.payload_reader(), object.size);
                if self.cache_size_cap == 0 || cache_size + object.size <= self.cache_size_cap {
                    let stored = self.cache.add_object(&mut limited)?;
                    ensure!(
                        stored.hash == object.hash,
                        "cache stored {} under a different hash {}",
                        object.hash,
                        stored.hash
                    );
                    cache_size += object.size;
                    header.push(stored.clone());
                    payloads.push(Box::new(self.cache.read_object(&stored.hash)?));
                } else {
                    let mut buf = Vec::with_capacity(object.size as usize);
                    limited.read_to_end(&mut buf)?;
                    header.push(object.clone());
                    payloads.push(Box::new(std::io::Cursor::new(buf)));
                }
            }
        }

        let mut out = Vec::new();
        batch::write_batch(&mut out, &header, payloads)?;
        Ok(out)
    }

    fn publish_manifest(&self, manifest: &Manifest) -> Result<Manifest> {
        self.inner.publish_manifest(manifest)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn store_in_temp_dir() -> (tempfile::TempDir, Arc<PackageStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(
            camino::Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap(),
        )
        .unwrap();
        (dir, Arc::new(store))
    }

    #[test]
    fn local_upload_then_check_then_download_round_trips() -> anyhow::Result<()> {
        let (_dir, store) = store_in_temp_dir();
        let transport = Local::new(store, Arc::new(crate::auth::AllowAll), Limits::default());

        let declared = Object {
            hash: crate::hashing::ObjectHash::of_bytes(b"payload").to_string(),
            size: 7,
        };
        let stored = transport.upload_objects(
            &[declared.clone()],
            vec![Box::new(b"payload".as_slice())],
        )?;
        assert_eq!(stored, vec![declared.clone()]);

        let present = transport.check_objects(&[declared.clone()])?;
        assert_eq!(present, vec![declared.clone()]);

        let batch_bytes = transport.download_objects(&[declared.clone()])?;
        let (header, mut reader) = open_download_batch(batch_bytes)?;
        assert_eq!(header, vec![declared]);
        let mut payload = vec![0u8; 7];
        reader.payload_reader().read_exact(&mut payload)?;
        assert_eq!(payload, b"payload");
        Ok(())
    }

    #[test]
    fn local_rejects_a_mismatched_upload() -> anyhow::Result<()> {
        let (_dir, store) = store_in_temp_dir();
        let transport = Local::new(store, Arc::new(crate::auth::AllowAll), Limits::default());

        let wrong = Object {
            hash: "a".repeat(64),
            size: 7,
        };
        assert!(
            transport
                .upload_objects(&[wrong], vec![Box::new(b"payload".as_slice())])
                .is_err()
        );
        Ok(())
    }

    #[test]
    fn cached_serves_a_second_download_without_the_inner_transport() -> anyhow::Result<()> {
        let (_remote_dir, remote_store) = store_in_temp_dir();
        let remote = Local::new(
            remote_store,
            Arc::new(crate::auth::AllowAll),
            Limits::default(),
        );
        let declared = remote.upload_objects(
            &[Object {
                hash: crate::hashing::ObjectHash::of_bytes(b"cached payload").to_string(),
                size: 14,
            }],
            vec![Box::new(b"cached payload".as_slice())],
        )?;

        let (_cache_dir, cache_store) = store_in_temp_dir();
        let cached = Cached::new(Box::new(remote), cache_store.clone(), 0);

        let first = cached.download_objects(&declared)?;
        let (header, mut reader) = open_download_batch(first)?;
        assert_eq!(header, declared);
        let mut payload = vec![0u8; 14];
        reader.payload_reader().read_exact(&mut payload)?;
        assert_eq!(payload, b"cached payload");

        // The object is now in the cache; a second fetch must not need the
        // inner transport at all, so dropping it and fetching again from a
        // `Cached` built over a transport that always fails should still
        // succeed as long as the cache already has the data.
        struct AlwaysFails;
        impl Transport for AlwaysFails {
            fn get_limits(&self) -> Result<Limits> {
                anyhow::bail!("no network")
            }
            fn get_manifest(&self, _: &str, _: u64) -> Result<Manifest> {
                anyhow::bail!("no network")
            }
            fn check_objects(&self, _: &[Object]) -> Result<Vec<Object>> {
                anyhow::bail!("no network")
            }
            fn upload_objects(
                &self,
                _: &[Object],
                _: Vec<Box<dyn Read + Send>>,
            ) -> Result<Vec<Object>> {
                anyhow::bail!("no network")
            }
            fn download_objects(&self, _: &[Object]) -> Result<Vec<u8>> {
                anyhow::bail!("no network")
            }
            fn publish_manifest(&self, _: &Manifest) -> Result<Manifest> {
                anyhow::bail!("no network")
            }
        }

        let offline = Cached::new(Box::new(AlwaysFails), cache_store, 0);
        let second = offline.download_objects(&declared)?;
        let (header, mut reader) = open_download_batch(second)?;
        assert_eq!(header, declared);
        let mut payload = vec![0u8; 14];
        reader.payload_reader().read_exact(&mut payload)?;
        assert_eq!(payload, b"cached payload");
        Ok(())
    }

    #[test]
    fn cached_stops_caching_new_objects_once_the_size_cap_is_reached() -> anyhow::Result<()> {
        let (_remote_dir, remote_store) = store_in_temp_dir();
        let remote = Local::new(
            remote_store,
            Arc::new(crate::auth::AllowAll),
            Limits::default(),
        );
        let declared = remote.upload_objects(
            &[Object {
                hash: crate::hashing::ObjectHash::of_bytes(b"too big").to_string(),
                size: 7,
            }],
            vec![Box::new(b"too big".as_slice())],
        )?;

        let (_cache_dir, cache_store) = store_in_temp_dir();
        let cached = Cached::new(Box::new(remote), cache_store.clone(), 1);

        let bytes = cached.download_objects(&declared)?;
        let (header, mut reader) = open_download_batch(bytes)?;
        assert_eq!(header, declared);
        let mut payload = vec![0u8; 7];
        reader.payload_reader().read_exact(&mut payload)?;
        assert_eq!(payload, b"too big");

        assert!(cache_store.get_object(&declared[0].hash).is_err());
        Ok(())
    }
}
