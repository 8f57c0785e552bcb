//! Cache Codec Implementations
//!
//! This module provides built-in implementations of the [`CacheCodec`](crate::traits::CacheCodec) trait
//! for different serialization backends, and the [`Serializer`] enum the driver
//! holds so the codec can be picked from configuration.

mod gzip;
mod json;
pub use gzip::GzipCodec;
pub use json::JsonCodec;

#[cfg(feature = "bincode")]
mod bincode_codec;
#[cfg(feature = "bincode")]
#[cfg_attr(docsrs, doc(cfg(feature = "bincode")))]
pub use bincode_codec::BincodeCodec;

#[cfg(feature = "msgpack")]
mod msgpack;
#[cfg(feature = "msgpack")]
#[cfg_attr(docsrs, doc(cfg(feature = "msgpack")))]
pub use msgpack::MsgPackCodec;

use crate::error::{CacheError, CacheResult};
use crate::traits::CacheCodec;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Serializer selected in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerKind {
    /// `serde_json`
    #[default]
    Json,
    /// Deflate-compressed JSON
    Gzip,
    /// `bincode` (feature `bincode`)
    Bincode,
    /// `rmp-serde` (feature `msgpack`)
    Msgpack,
}

/// Closed set of built-in codecs
#[derive(Debug, Clone)]
pub enum Serializer {
    /// JSON
    Json(JsonCodec),
    /// Deflate-compressed JSON
    Gzip(GzipCodec),
    /// Bincode
    #[cfg(feature = "bincode")]
    Bincode(BincodeCodec),
    /// `MessagePack`
    #[cfg(feature = "msgpack")]
    MsgPack(MsgPackCodec),
}

impl Serializer {
    /// Build the codec named by `kind`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the codec's cargo feature is disabled.
    pub fn from_kind(kind: SerializerKind) -> CacheResult<Self> {
        match kind {
            SerializerKind::Json => Ok(Self::Json(JsonCodec)),
            SerializerKind::Gzip => Ok(Self::Gzip(GzipCodec::default())),
            #[cfg(feature = "bincode")]
            SerializerKind::Bincode => Ok(Self::Bincode(BincodeCodec)),
            #[cfg(feature = "msgpack")]
            SerializerKind::Msgpack => Ok(Self::MsgPack(MsgPackCodec)),
            #[allow(unreachable_patterns)]
            other => Err(CacheError::Config(format!(
                "serializer {other:?} requires its cargo feature to be enabled"
            ))),
        }
    }

    /// Encode, mapping codec failures into [`CacheError::Serialization`].
    pub(crate) fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<Vec<u8>> {
        self.serialize(value)
            .map_err(|e| CacheError::Serialization(format!("{}: {e}", self.name())))
    }

    /// Decode, mapping codec failures into [`CacheError::Deserialization`].
    pub(crate) fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        self.deserialize(bytes)
            .map_err(|e| CacheError::Deserialization(format!("{}: {e}", self.name())))
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::Json(JsonCodec)
    }
}

impl CacheCodec for Serializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::Json(codec) => codec.serialize(value),
            Self::Gzip(codec) => codec.serialize(value),
            #[cfg(feature = "bincode")]
            Self::Bincode(codec) => codec.serialize(value),
            #[cfg(feature = "msgpack")]
            Self::MsgPack(codec) => codec.serialize(value),
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::Json(codec) => codec.deserialize(bytes),
            Self::Gzip(codec) => codec.deserialize(bytes),
            #[cfg(feature = "bincode")]
            Self::Bincode(codec) => codec.deserialize(bytes),
            #[cfg(feature = "msgpack")]
            Self::MsgPack(codec) => codec.deserialize(bytes),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Json(codec) => codec.name(),
            Self::Gzip(codec) => codec.name(),
            #[cfg(feature = "bincode")]
            Self::Bincode(codec) => codec.name(),
            #[cfg(feature = "msgpack")]
            Self::MsgPack(codec) => codec.name(),
        }
    }
}
