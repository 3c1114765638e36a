//! Record codec
//!
//! Encoding and decoding of a single log record.

use std::io::{self, ErrorKind, Read};

use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::error::{CaskError, DecodeError, Result};

/// Size of the trailing SHA-1 digest
pub const DIGEST_SIZE: usize = 20;

/// Longest stream name accepted, in bytes
pub const MAX_STREAM_NAME_LEN: usize = 64 * 1024;

/// Fixed bytes per record: name len + version + payload len + digest
const FIXED_SIZE: usize = 4 + 4 + 4 + DIGEST_SIZE;

/// A single record as stored in a segment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Stream the record belongs to
    pub stream: String,

    /// 1-based version within the stream
    pub version: u32,

    /// Opaque caller payload
    pub payload: Bytes,
}

impl Record {
    pub fn new(stream: impl Into<String>, version: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            stream: stream.into(),
            version,
            payload: payload.into(),
        }
    }

    /// Number of bytes this record occupies on disk
    pub fn encoded_len(&self) -> usize {
        FIXED_SIZE + self.stream.len() + self.payload.len()
    }

    /// Serialize to the exact on-disk layout, digest included
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(&self.stream, self.version, &self.payload)
    }

    /// Digest of this record's fields
    pub fn digest(&self) -> [u8; DIGEST_SIZE] {
        record_digest(&self.stream, self.version, &self.payload)
    }

    /// Read the next record from `reader`
    ///
    /// Returns `Truncated` when the reader is exhausted exactly at a field
    /// boundary, and `Malformed` for a partial field or a bad digest.
    pub fn decode<R: Read>(reader: &mut R) -> std::result::Result<Self, DecodeError> {
        let mut hasher = Sha1::new();

        let mut word = [0u8; 4];
        read_array(reader, &mut word, "name length")?;
        hasher.update(word);
        let name_len = u32::from_be_bytes(word) as usize;
        if name_len > MAX_STREAM_NAME_LEN {
            return Err(DecodeError::Malformed(format!(
                "stream name length {} exceeds {}",
                name_len, MAX_STREAM_NAME_LEN
            )));
        }

        let name = read_exact_vec(reader, name_len, "stream name")?;
        hasher.update(&name);

        read_array(reader, &mut word, "version")?;
        hasher.update(word);
        let version = i32::from_be_bytes(word);

        read_array(reader, &mut word, "payload length")?;
        hasher.update(word);
        let payload_len = i32::from_be_bytes(word);
        if payload_len < 0 {
            return Err(DecodeError::Malformed(format!(
                "negative payload length {}",
                payload_len
            )));
        }

        let payload = read_exact_vec(reader, payload_len as usize, "payload")?;
        hasher.update(&payload);

        let mut stored = [0u8; DIGEST_SIZE];
        read_array(reader, &mut stored, "digest")?;

        // A zeroed digest is what a torn write leaves behind
        if stored.iter().all(|&b| b == 0) {
            return Err(DecodeError::Malformed("zeroed digest".to_string()));
        }
        let computed: [u8; DIGEST_SIZE] = hasher.finalize().into();
        if computed != stored {
            return Err(DecodeError::Malformed("digest mismatch".to_string()));
        }

        if version < 1 {
            return Err(DecodeError::Malformed(format!("invalid version {}", version)));
        }
        let stream = String::from_utf8(name)
            .map_err(|_| DecodeError::Malformed("stream name is not UTF-8".to_string()))?;

        Ok(Self {
            stream,
            version: version as u32,
            payload: Bytes::from(payload),
        })
    }
}

/// Serialize one record without building a `Record` first
pub fn encode(stream: &str, version: u32, payload: &[u8]) -> Result<Vec<u8>> {
    check_encodable(stream, version, payload)?;

    let mut buf = Vec::with_capacity(FIXED_SIZE + stream.len() + payload.len());
    write_fields(&mut buf, stream, version, payload);
    let digest = Sha1::digest(&buf);
    buf.extend_from_slice(&digest);

    Ok(buf)
}

/// SHA-1 over the serialized `(name, version, payload_len, payload)` fields
pub fn record_digest(stream: &str, version: u32, payload: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut buf = Vec::with_capacity(FIXED_SIZE - DIGEST_SIZE + stream.len() + payload.len());
    write_fields(&mut buf, stream, version, payload);
    Sha1::digest(&buf).into()
}

fn check_encodable(stream: &str, version: u32, payload: &[u8]) -> Result<()> {
    if stream.len() > MAX_STREAM_NAME_LEN {
        return Err(CaskError::InvalidRecord(format!(
            "stream name is {} bytes (max {})",
            stream.len(),
            MAX_STREAM_NAME_LEN
        )));
    }
    if version == 0 || version > i32::MAX as u32 {
        return Err(CaskError::InvalidRecord(format!(
            "version {} out of range",
            version
        )));
    }
    if payload.len() > i32::MAX as usize {
        return Err(CaskError::InvalidRecord(format!(
            "payload is {} bytes (max {})",
            payload.len(),
            i32::MAX
        )));
    }
    Ok(())
}

/// Lengths must already be checked by `check_encodable`
fn write_fields(buf: &mut Vec<u8>, stream: &str, version: u32, payload: &[u8]) {
    buf.extend_from_slice(&(stream.len() as u32).to_be_bytes());
    buf.extend_from_slice(stream.as_bytes());
    buf.extend_from_slice(&(version as i32).to_be_bytes());
    buf.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    buf.extend_from_slice(payload);
}

// =============================================================================
// Read Helpers
// =============================================================================

/// Fill `buf` as far as the reader allows; returns bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// EOF before the first byte of a field is `Truncated`, inside it `Malformed`
fn short_read(field: &str, got: usize, want: usize) -> DecodeError {
    if got == 0 {
        DecodeError::Truncated
    } else {
        DecodeError::Malformed(format!("partial {}: {} of {} bytes", field, got, want))
    }
}

fn read_array<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    field: &str,
) -> std::result::Result<(), DecodeError> {
    let n = read_full(reader, buf)?;
    if n < buf.len() {
        return Err(short_read(field, n, buf.len()));
    }
    Ok(())
}

/// Read exactly `len` bytes without trusting `len` for the allocation
fn read_exact_vec<R: Read>(
    reader: &mut R,
    len: usize,
    field: &str,
) -> std::result::Result<Vec<u8>, DecodeError> {
    let mut buf = Vec::with_capacity(len.min(64 * 1024));
    reader.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() < len {
        return Err(short_read(field, buf.len(), len));
    }
    Ok(buf)
}
