//! Bincode Codec using `bincode`

use crate::traits::CacheCodec;
use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Compact binary codec using `bincode`
///
/// Not self-describing: values must be read back with the exact type they
/// were written with.
#[cfg_attr(docsrs, doc(cfg(feature = "bincode")))]
#[derive(Debug, Default, Clone)]
pub struct BincodeCodec;

impl CacheCodec for BincodeCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn name(&self) -> &'static str {
        "bincode"
    }
}
