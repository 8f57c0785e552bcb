//! Driver configuration types.
//!
//! All options live in [`DriverConfig`], an explicit struct with documented
//! defaults. It derives `Deserialize`, so applications can load it from any
//! serde format; [`DriverConfig::validate`] runs when the driver is built.

use crate::codecs::SerializerKind;
use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default hard ceiling on entry lifetime: 31 days.
pub const MAX_LIFETIME_SECS: u64 = 2_678_400;

/// Default number of virtual replica points per unit of weight on the hash ring.
pub const DEFAULT_REPLICAS: usize = 256;

/// Default capacity of the shard router's key → node lookup cache.
pub const DEFAULT_LOOKUP_CACHE_SIZE: usize = 256;

/// How `remove_by_tags` combines several tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMatch {
    /// Entries carrying any of the tags (union).
    #[default]
    Any,
    /// Entries carrying every one of the tags (intersection).
    All,
}

/// One node of a sharded deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardNodeConfig {
    /// Connection URL. Its host, port and database identify the node on the ring
    pub url: String,
    /// Relative share of the keyspace
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Storage engine selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-process `DashMap` store with native sets.
    #[default]
    Memory,
    /// Stores nothing: saves succeed and every load misses.
    BlackHole,
    /// Bounded in-process store (moka), serialized-list tags.
    Process {
        /// Maximum number of keys before eviction
        max_capacity: u64,
    },
    /// Single Redis server. `url = None` reads `REDIS_URL`.
    Redis {
        /// Connection URL
        #[serde(default)]
        url: Option<String>,
    },
    /// Several Redis servers behind the consistent-hash router.
    ShardedRedis {
        /// Ring members
        nodes: Vec<ShardNodeConfig>,
        /// Virtual points per unit of weight
        #[serde(default = "default_replicas")]
        replicas: usize,
        /// Lookup cache capacity, 0 disables it
        #[serde(default = "default_lookup_cache_size")]
        lookup_cache_size: usize,
    },
    /// Memcached server. `url = None` reads `MEMCACHED_URL`.
    Memcached {
        /// Connection URL
        #[serde(default)]
        url: Option<String>,
    },
    /// SQLite database through `sqlx`.
    Sqlite {
        /// e.g. `sqlite::memory:` or `sqlite://cache.db?mode=rwc`
        url: String,
        /// Prefix for the `cache` and `tag` tables
        #[serde(default = "default_table_prefix")]
        table_prefix: String,
    },
}

fn default_replicas() -> usize {
    DEFAULT_REPLICAS
}

fn default_lookup_cache_size() -> usize {
    DEFAULT_LOOKUP_CACHE_SIZE
}

fn default_table_prefix() -> String {
    "cache_".to_string()
}

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Suffix appended to a prefixed id to build its stampede lock key
    pub lock_suffix: String,

    /// Prepended to every entry, lock and counter key
    pub prefix_id: String,

    /// Prepended (after `prefix_id`) to tag names
    pub prefix_tag: String,

    /// Codec for entry headers and values
    pub serializer: SerializerKind,

    /// Propagate backend errors (`true`) or degrade them to misses (`false`)
    pub throw_errors: bool,

    /// Hard ceiling on any entry lifetime, in seconds
    pub max_lifetime_secs: u64,

    /// Let the backend drop entries at their logical expiration.
    ///
    /// When off, the backend keeps records until the ceiling so stale values
    /// can be served while one caller recomputes.
    pub native_expires: bool,

    /// Union or intersection for multi-tag removal
    pub tag_match: TagMatch,

    /// Storage engine
    pub backend: BackendConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            lock_suffix: ".lock".to_string(),
            prefix_id: String::new(),
            prefix_tag: "tag.".to_string(),
            serializer: SerializerKind::Json,
            throw_errors: true,
            max_lifetime_secs: MAX_LIFETIME_SECS,
            native_expires: false,
            tag_match: TagMatch::Any,
            backend: BackendConfig::Memory,
        }
    }
}

impl DriverConfig {
    /// Configuration for the given backend, defaults elsewhere.
    #[must_use]
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Set the key prefix.
    #[must_use]
    pub fn with_prefix_id(mut self, prefix: impl Into<String>) -> Self {
        self.prefix_id = prefix.into();
        self
    }

    /// Set the tag prefix.
    #[must_use]
    pub fn with_prefix_tag(mut self, prefix: impl Into<String>) -> Self {
        self.prefix_tag = prefix.into();
        self
    }

    /// Set the lock suffix.
    #[must_use]
    pub fn with_lock_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.lock_suffix = suffix.into();
        self
    }

    /// Set the serializer.
    #[must_use]
    pub fn with_serializer(mut self, serializer: SerializerKind) -> Self {
        self.serializer = serializer;
        self
    }

    /// Propagate or degrade backend errors.
    #[must_use]
    pub fn with_throw_errors(mut self, throw: bool) -> Self {
        self.throw_errors = throw;
        self
    }

    /// Set the lifetime ceiling.
    #[must_use]
    pub fn with_max_lifetime(mut self, max: Duration) -> Self {
        self.max_lifetime_secs = max.as_secs();
        self
    }

    /// Toggle backend-native expiration.
    #[must_use]
    pub fn with_native_expires(mut self, native: bool) -> Self {
        self.native_expires = native;
        self
    }

    /// Set multi-tag removal semantics.
    #[must_use]
    pub fn with_tag_match(mut self, tag_match: TagMatch) -> Self {
        self.tag_match = tag_match;
        self
    }

    /// Lifetime ceiling as a duration.
    #[must_use]
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    /// Check option values.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for an empty lock suffix, a zero or
    /// oversized lifetime ceiling, or an invalid shard list.
    pub fn validate(&self) -> CacheResult<()> {
        if self.lock_suffix.is_empty() {
            return Err(CacheError::Config("lock_suffix must not be empty".into()));
        }
        if self.max_lifetime_secs == 0 {
            return Err(CacheError::Config("max_lifetime_secs must be positive".into()));
        }
        if i64::try_from(self.max_lifetime_secs).is_err() {
            return Err(CacheError::Config("max_lifetime_secs is too large".into()));
        }

        match &self.backend {
            BackendConfig::Process { max_capacity } if *max_capacity == 0 => Err(
                CacheError::Config("process backend needs a positive max_capacity".into()),
            ),
            BackendConfig::ShardedRedis {
                nodes, replicas, ..
            } => {
                if nodes.is_empty() {
                    return Err(CacheError::Config(
                        "sharded backend needs at least one node".into(),
                    ));
                }
                if *replicas == 0 {
                    return Err(CacheError::Config("replicas must be positive".into()));
                }
                if let Some(node) = nodes.iter().find(|n| n.weight == 0) {
                    return Err(CacheError::Config(format!(
                        "node {} has zero weight",
                        node.url
                    )));
                }
                #[cfg(feature = "redis")]
                {
                    let mut seen = Vec::with_capacity(nodes.len());
                    for node in nodes {
                        let id = crate::backends::redis_storage::node_id(&node.url)
                            .map_err(|e| CacheError::Config(format!("node {}: {e}", node.url)))?;
                        if seen.contains(&id) {
                            return Err(CacheError::Config(format!(
                                "node {} duplicates endpoint {id}",
                                node.url
                            )));
                        }
                        seen.push(id);
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Full key for an entry id.
    pub fn entry_key(&self, id: &str) -> String {
        format!("{}{}", self.prefix_id, id)
    }

    /// Full key for a tag name.
    pub fn tag_key(&self, tag: &str) -> String {
        format!("{}{}{}", self.prefix_id, self.prefix_tag, tag)
    }

    /// Full lock key for an entry id.
    pub fn lock_key(&self, id: &str) -> String {
        format!("{}{}{}", self.prefix_id, id, self.lock_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.lock_suffix, ".lock");
        assert_eq!(config.prefix_tag, "tag.");
        assert!(config.throw_errors);
        assert_eq!(config.max_lifetime(), Duration::from_secs(2_678_400));
        assert_eq!(config.tag_match, TagMatch::Any);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_key_building() {
        let config = DriverConfig::default().with_prefix_id("app:");
        assert_eq!(config.entry_key("user:1"), "app:user:1");
        assert_eq!(config.tag_key("users"), "app:tag.users");
        assert_eq!(config.lock_key("user:1"), "app:user:1.lock");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let empty_suffix = DriverConfig::default().with_lock_suffix("");
        assert!(empty_suffix.validate().is_err());

        let zero_ceiling = DriverConfig::default().with_max_lifetime(Duration::ZERO);
        assert!(zero_ceiling.validate().is_err());

        let no_nodes = DriverConfig::new(BackendConfig::ShardedRedis {
            nodes: vec![],
            replicas: DEFAULT_REPLICAS,
            lookup_cache_size: 0,
        });
        assert!(no_nodes.validate().is_err());

        let zero_weight = DriverConfig::new(BackendConfig::ShardedRedis {
            nodes: vec![ShardNodeConfig {
                url: "redis://a".into(),
                weight: 0,
            }],
            replicas: DEFAULT_REPLICAS,
            lookup_cache_size: 0,
        });
        assert!(zero_weight.validate().is_err());
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_same_endpoint_spelled_twice_is_rejected() {
        let sharded = |urls: &[&str]| {
            DriverConfig::new(BackendConfig::ShardedRedis {
                nodes: urls
                    .iter()
                    .map(|url| ShardNodeConfig {
                        url: (*url).to_string(),
                        weight: 1,
                    })
                    .collect(),
                replicas: DEFAULT_REPLICAS,
                lookup_cache_size: 0,
            })
        };

        let err = sharded(&["redis://127.0.0.1:6379", "redis://127.0.0.1"])
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("duplicates"));
        assert!(sharded(&["redis://127.0.0.1:6379/", "redis://127.0.0.1:6379/0"])
            .validate()
            .is_err());
        assert!(sharded(&["redis://127.0.0.1:6379/1", "redis://127.0.0.1:6379/2"])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let json = r#"{
            "prefix_id": "shop:",
            "throw_errors": false,
            "tag_match": "all",
            "backend": {
                "type": "sharded_redis",
                "nodes": [
                    {"url": "redis://10.0.0.1:6379", "weight": 2},
                    {"url": "redis://10.0.0.2:6379"}
                ]
            }
        }"#;
        let config: DriverConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.prefix_id, "shop:");
        assert_eq!(config.lock_suffix, ".lock");
        assert!(!config.throw_errors);
        assert_eq!(config.tag_match, TagMatch::All);
        match config.backend {
            BackendConfig::ShardedRedis {
                nodes,
                replicas,
                lookup_cache_size,
            } => {
                assert_eq!(nodes.len(), 2);
                assert_eq!(nodes[1].weight, 1);
                assert_eq!(replicas, DEFAULT_REPLICAS);
                assert_eq!(lookup_cache_size, DEFAULT_LOOKUP_CACHE_SIZE);
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }
}
