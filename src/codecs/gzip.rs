//! Compressing codec
//!
//! Wraps another codec and deflates its output with `flate2`. Useful for large
//! JSON payloads on memory-bound backends.

use crate::traits::CacheCodec;
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

use super::JsonCodec;

/// Deflate-compressed codec, JSON inside by default
#[derive(Debug, Clone)]
pub struct GzipCodec<C = JsonCodec> {
    inner: C,
    level: Compression,
}

impl<C: CacheCodec> GzipCodec<C> {
    /// Wrap `inner` with the given compression level (0-9).
    pub fn new(inner: C, level: u32) -> Self {
        Self {
            inner,
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipCodec<JsonCodec> {
    fn default() -> Self {
        Self::new(JsonCodec, 6)
    }
}

impl<C: CacheCodec> CacheCodec for GzipCodec<C> {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let raw = self.inner.serialize(value)?;
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(raw.len() / 2), self.level);
        encoder.write_all(&raw).context("deflate write failed")?;
        encoder.finish().context("deflate finish failed")
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let mut raw = Vec::with_capacity(bytes.len() * 2);
        DeflateDecoder::new(bytes)
            .read_to_end(&mut raw)
            .context("inflate failed")?;
        self.inner.deserialize(&raw)
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}
