//! The single global streaming compression codec. Every compressed
//! artifact in the store -- object blobs and batch transfer streams alike
//! -- goes through the same zstd encoder/decoder pair at the default level.

use std::io::{Read, Write};

use crate::error::Result;

pub type Encoder<W> = zstd::stream::write::Encoder<'static, W>;
pub type Decoder<R> = zstd::stream::read::Decoder<'static, R>;

/// Wraps `sink` in a streaming zstd encoder at the default compression level.
pub fn compress<W: Write>(sink: W) -> Result<Encoder<W>> {
    Ok(zstd::stream::write::Encoder::new(sink, 0)?)
}

/// Wraps `source` in a streaming zstd decoder.
pub fn decompress<R: Read>(source: R) -> Result<Decoder<R>> {
    Ok(zstd::stream::read::Decoder::new(source)?)
}
