//! Stored entry record
//!
//! An entry is written as one byte string:
//!
//! ```text
//! [version: u8][header_len: u32 BE][header][data]
//! ```
//!
//! `header` and `data` are each encoded with the configured codec. Keeping
//! them apart lets `remove` read the tag list and `touch` rewrite the
//! expiration without knowing the value's type. Bare counters are stored as
//! ASCII digits and never start with the version byte.

use crate::codecs::Serializer;
use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};

const RECORD_VERSION: u8 = 1;
const PREAMBLE_LEN: usize = 5;

/// Metadata stored in front of every entry's data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    /// Unix time of the last write
    pub created_at: i64,
    /// Absolute unix expiration, `None` for entries without a lifetime
    pub expires_at: Option<i64>,
    /// Tags the entry was saved with (prefixed tag keys)
    pub tags: Vec<String>,
}

/// Freshness of a stored entry relative to "now"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// `now < expires_at`, or no expiration
    Fresh,
    /// `now >= expires_at`
    Stale,
}

impl EntryHeader {
    /// Classify the entry at time `now`.
    #[must_use]
    pub fn state(&self, now: i64) -> EntryState {
        match self.expires_at {
            Some(expires_at) if now >= expires_at => EntryState::Stale,
            _ => EntryState::Fresh,
        }
    }
}

/// Borrowed view of a decoded record
#[derive(Debug)]
pub struct Record<'a> {
    /// Decoded header
    pub header: EntryHeader,
    /// Still-encoded value bytes
    pub data: &'a [u8],
}

impl<'a> Record<'a> {
    /// Split and decode the header of a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Deserialization`] for bytes that are not an
    /// entry record (including bare counters).
    pub fn parse(bytes: &'a [u8], codec: &Serializer) -> CacheResult<Self> {
        let (preamble, rest) = bytes
            .split_at_checked(PREAMBLE_LEN)
            .ok_or_else(|| CacheError::Deserialization("record too short".to_string()))?;
        let (version, len) = preamble
            .split_first()
            .ok_or_else(|| CacheError::Deserialization("record too short".to_string()))?;
        if *version != RECORD_VERSION {
            return Err(CacheError::Deserialization(format!(
                "unknown record version {version}"
            )));
        }

        let len_bytes: [u8; 4] = len
            .try_into()
            .map_err(|_| CacheError::Deserialization("bad header length".to_string()))?;
        let header_len = usize::try_from(u32::from_be_bytes(len_bytes))
            .map_err(|_| CacheError::Deserialization("bad header length".to_string()))?;
        let (header_bytes, data) = rest.split_at_checked(header_len).ok_or_else(|| {
            CacheError::Deserialization("header length exceeds record".to_string())
        })?;

        Ok(Self {
            header: codec.decode(header_bytes)?,
            data,
        })
    }
}

/// Whether `bytes` carry the record framing at all.
///
/// Bare counters and tag lists are ASCII text and never start with the
/// version byte; framed bytes that then fail [`Record::parse`] are corrupt.
#[must_use]
pub fn is_record(bytes: &[u8]) -> bool {
    bytes.first() == Some(&RECORD_VERSION)
}

/// Assemble a record from a header and already-encoded data.
///
/// # Errors
///
/// Returns [`CacheError::Serialization`] if the header cannot be encoded.
pub fn encode_record(
    header: &EntryHeader,
    data: &[u8],
    codec: &Serializer,
) -> CacheResult<Vec<u8>> {
    let header_bytes = codec.encode(header)?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| CacheError::Serialization("entry header too large".to_string()))?;

    let mut out = Vec::with_capacity(PREAMBLE_LEN + header_bytes.len() + data.len());
    out.push(RECORD_VERSION);
    out.extend_from_slice(&header_len.to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(data);
    Ok(out)
}

/// Parse a bare counter value (ASCII decimal), `None` for anything else
#[must_use]
pub fn try_parse_counter(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
}

/// Parse a bare counter value (ASCII decimal). Anything else counts as 0.
#[must_use]
pub fn parse_counter(bytes: &[u8]) -> i64 {
    try_parse_counter(bytes).unwrap_or(0)
}
