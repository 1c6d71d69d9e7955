//! The 8-byte signed-varint length prefix shared by the batch transfer
//! codec's JSON header and the object store's `_size` sidecar files.
//!
//! Values are zig-zag encoded (so small negative numbers stay small) and
//! then written as a little-endian base-128 varint, left-justified in an
//! 8-byte buffer with the remaining bytes zeroed. This is the same shape
//! as a `binary.PutVarint` call against a fixed 8-byte slice: decoding
//! stops at the first byte whose high bit is clear, so the trailing zero
//! padding is never touched.

use crate::error::{Error, Result};

pub const PREFIX_LEN: usize = 8;
pub const JSON_SIZE_LIMIT: i64 = 10 * 1024 * 1024;

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Encodes `value` into a fixed 8-byte buffer.
pub fn encode(value: i64) -> [u8; PREFIX_LEN] {
    let mut buf = [0u8; PREFIX_LEN];
    let mut v = zigzag_encode(value);
    let mut i = 0;
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        buf[i] = byte;
        i += 1;
        if v == 0 {
            break;
        }
    }
    buf
}

/// Decodes a value previously written by [`encode`].
pub fn decode(buf: &[u8; PREFIX_LEN]) -> Result<i64> {
    let mut v: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        v |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(zigzag_decode(v));
        }
        shift += 7;
        if i == PREFIX_LEN - 1 {
            break;
        }
    }
    Err(Error::InvalidInput(
        "varint prefix never terminated within 8 bytes".into(),
    ))
}

/// Reads an 8-byte length prefix and validates it against the JSON-payload
/// ceiling, returning the decoded length as a `usize`.
pub fn read_length_prefix<R: std::io::Read>(mut r: R) -> Result<usize> {
    let mut buf = [0u8; PREFIX_LEN];
    r.read_exact(&mut buf)
        .map_err(|e| Error::InvalidInput(format!("couldn't read length prefix: {e}")))?;
    let len = decode(&buf)?;
    if len <= 0 || len >= JSON_SIZE_LIMIT {
        return Err(Error::InvalidInput(format!(
            "invalid JSON length {len}, must be in (0, {JSON_SIZE_LIMIT})"
        )));
    }
    Ok(len as usize)
}

/// Writes `len` as a validated, framed length prefix.
pub fn write_length_prefix<W: std::io::Write>(mut w: W, len: usize) -> Result<()> {
    let len = len as i64;
    if len <= 0 || len >= JSON_SIZE_LIMIT {
        return Err(Error::InvalidInput(format!(
            "refusing to frame invalid JSON length {len}"
        )));
    }
    w.write_all(&encode(len))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_small_and_large_values() {
        for v in [0i64, 1, -1, 42, 10_000, i64::MAX / 2, i64::MIN / 2] {
            let encoded = encode(v);
            assert_eq!(decode(&encoded).unwrap(), v);
        }
    }

    #[test]
    fn rejects_zero_and_oversized_lengths() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode(0));
        assert!(read_length_prefix(&buf[..]).is_err());

        let mut buf = Vec::new();
        buf.extend_from_slice(&encode(JSON_SIZE_LIMIT));
        assert!(read_length_prefix(&buf[..]).is_err());
    }

    #[test]
    fn prefix_round_trips_through_a_stream() {
        let mut buf = Vec::new();
        write_length_prefix(&mut buf, 1234).unwrap();
        assert_eq!(buf.len(), PREFIX_LEN);
        assert_eq!(read_length_prefix(&buf[..]).unwrap(), 1234);
    }
}
