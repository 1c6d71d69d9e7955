//! The wire format shared by the three object-transfer endpoints (check,
//! upload, download): one continuous zstd stream holding a length-prefixed
//! JSON header followed by zero or more raw payloads back to back. The
//! header alone carries enough information (an object's declared size) for
//! a reader to know where one payload ends and the next begins.

use std::io::{Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::compression::{self, Decoder, Encoder};
use crate::error::Result;
use crate::framing;

/// Serializes `header`, then copies each of `payloads` in order, all
/// through a single zstd encoder.
pub fn write_batch<W, T>(
    sink: W,
    header: &T,
    payloads: impl IntoIterator<Item = impl Read>,
) -> Result<()>
where
    W: Write,
    T: Serialize,
{
    let mut encoder = compression::compress(sink)?;
    write_header(&mut encoder, header)?;
    for mut payload in payloads {
        std::io::copy(&mut payload, &mut encoder)?;
    }
    encoder.finish()?;
    Ok(())
}

fn write_header<W: Write, T: Serialize>(w: &mut W, header: &T) -> Result<()> {
    let json = serde_json::to_vec(header)?;
    framing::write_length_prefix(&mut *w, json.len())?;
    w.write_all(&json)?;
    Ok(())
}

/// A batch being read back: the header has already been parsed out, and
/// [`BatchReader::payload_reader`] gives access to the decompressed
/// payload bytes that follow it, in the order they were written.
pub struct BatchReader<R> {
    decoder: Decoder<R>,
}

impl<R: Read> BatchReader<R> {
    /// Opens the stream and parses its header.
    pub fn open<T: DeserializeOwned>(source: R) -> Result<(T, Self)> {
        let mut decoder = compression::decompress(source)?;
        let len = framing::read_length_prefix(&mut decoder)?;
        let mut buf = vec![0u8; len];
        decoder.read_exact(&mut buf)?;
        let header = serde_json::from_slice(&buf)?;
        Ok((header, Self { decoder }))
    }

    /// The remaining decompressed bytes, i.e. the concatenated payloads.
    /// Callers that know each payload's length (from the header) read
    /// exactly that many bytes per payload in order.
    pub fn payload_reader(&mut self) -> &mut impl Read {
        &mut self.decoder
    }
}
