//! Content fingerprints used for dedup and change detection.
//!
//! Digests are xxHash64 (seed 0). They are a probabilistic identity signal,
//! not a security property.

mod window;

use std::fmt;
use std::io::{self, Read, Seek};
use std::ops::Range;
use std::str::FromStr;

use xxhash_rust::xxh64::Xxh64;

pub use window::WindowReader;

const READ_BUFFER_BYTES: usize = 32 * 1024;

/// A 64-bit content digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(u64);

impl ContentHash {
    /// Lowercase hex of the little-endian digest bytes.
    pub fn to_hex(self) -> String {
        hex::encode(self.0.to_le_bytes())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = hex::FromHexError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(raw, &mut bytes)?;
        Ok(Self(u64::from_le_bytes(bytes)))
    }
}

/// Hash every byte the reader yields.
pub fn full_hash<R: Read>(mut reader: R) -> io::Result<ContentHash> {
    let mut hasher = Xxh64::new(0);
    let mut buffer = vec![0u8; READ_BUFFER_BYTES];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(ContentHash(hasher.digest()))
}

/// Hash `[offset, offset + length)` of the stream, clamped to its bounds.
pub fn partial_hash<R: Read + Seek>(
    reader: R,
    offset: u64,
    length: u64,
) -> io::Result<ContentHash> {
    full_hash(WindowReader::new(reader, offset, length)?)
}

/// Narrow `range` to at most `max_bytes` around its midpoint.
///
/// The result never starts before `range.start` nor ends after `range.end`.
pub fn centered_window(range: Range<u64>, max_bytes: u64) -> Range<u64> {
    let len = range.end.saturating_sub(range.start);
    if len <= max_bytes {
        return range.start..range.start + len;
    }
    let midpoint = range.start + len / 2;
    let start = midpoint.saturating_sub(max_bytes / 2).max(range.start);
    let end = start.saturating_add(max_bytes).min(range.end);
    start..end
}
