//! Tools for hashing everything we care about: object content, manifest
//! canonicalization, and local file re-hashing during check/download.

use std::fmt;
use std::io;
use std::io::prelude::*;

use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, digest::Output};

type Sha256Digest = Output<Sha256>;

/// The hash (a SHA-256) used to identify every object and manifest.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectHash {
    digest: Sha256Digest,
}

impl ObjectHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self {
            digest: Sha256::digest(bytes),
        }
    }

    fn from_digest(digest: Sha256Digest) -> Self {
        Self { digest }
    }
}

impl fmt::Debug for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHash({})", self)
    }
}

impl fmt::Display for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.digest))
    }
}

impl std::str::FromStr for ObjectHash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER
            .decode(s.as_bytes())
            .map_err(|e| anyhow::anyhow!("couldn't decode {s} as lowercase hex: {e}"))?;
        anyhow::ensure!(
            bytes.len() == <Sha256 as Digest>::output_size(),
            "expected a SHA-256 hex hash, got {} bytes",
            bytes.len()
        );
        Ok(ObjectHash::from_digest(*Sha256Digest::from_slice(&bytes)))
    }
}

impl Serialize for ObjectHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectHash {
    fn deserialize<D>(deserializer: D) -> Result<ObjectHash, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Wraps a reader, tracking a running digest of every byte that passes
/// through. `finalize()` hands back the digest and the wrapped reader.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn finalize(self) -> (ObjectHash, R) {
        (ObjectHash::from_digest(self.hasher.finalize()), self.inner)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}

/// The write-side counterpart of [`HashingReader`].
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn finalize(self) -> (ObjectHash, W) {
        (ObjectHash::from_digest(self.hasher.finalize()), self.inner)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hashes an entire file on disk without loading it all into memory at once.
pub fn hash_file(path: &camino::Utf8Path) -> anyhow::Result<ObjectHash> {
    let fh = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("couldn't open {path} for hashing: {e}"))?;
    let mut r = HashingReader::new(fh);
    io::copy(&mut r, &mut io::sink())?;
    Ok(r.finalize().0)
}
