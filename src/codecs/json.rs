//! JSON codec, the default for both entry headers and values

use crate::traits::CacheCodec;
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Self-describing text codec on `serde_json`
///
/// Values saved as one type can be loaded as a compatible one, including
/// `serde_json::Value`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).context("json encode failed")
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).context("json decode failed")
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
