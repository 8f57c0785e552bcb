//! Tag Index
//!
//! Reverse mapping from tag key to the entry keys carrying that tag. The
//! strategy is picked once from the adapter's [`TagIndexKind`]:
//!
//! - **`NativeSet`**: one backend set per tag. Adding a member refreshes the
//!   tag's own expiration to the lifetime ceiling; removing the last member
//!   deletes the set.
//! - **`SerializedList`**: one stored blob per tag holding `|`-joined keys,
//!   read and rewritten whole on every change. Not atomic: concurrent
//!   writers to one tag may drop each other's additions.
//! - **`JoinTable`**: rows written and deleted with the entry in one
//!   transaction (`write_tagged` / `delete_tagged`), so `add` and `remove`
//!   here are no-ops and only lookups and cleanup touch the index.
//!
//! Members are full (prefixed) entry keys.

use crate::config::TagMatch;
use crate::error::{CacheError, CacheResult};
use crate::traits::{StorageAdapter, TagIndexKind};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Separator between members in a serialized tag list
pub const LIST_SEPARATOR: char = '|';

/// Tag index operations over one adapter
#[derive(Debug, Clone, Copy)]
pub struct TagIndex {
    kind: TagIndexKind,
    tag_ttl: Duration,
}

impl TagIndex {
    /// Index of the given kind; tag keys are kept alive for `tag_ttl`.
    #[must_use]
    pub fn new(kind: TagIndexKind, tag_ttl: Duration) -> Self {
        Self { kind, tag_ttl }
    }

    /// Strategy in use
    #[must_use]
    pub fn kind(&self) -> TagIndexKind {
        self.kind
    }

    /// Reject entry keys the strategy cannot represent.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a key containing the list separator
    /// when tags are stored as serialized lists.
    pub fn validate_member(&self, entry_key: &str) -> CacheResult<()> {
        if self.kind == TagIndexKind::SerializedList && entry_key.contains(LIST_SEPARATOR) {
            return Err(CacheError::validation(
                entry_key,
                format!("tagged ids cannot contain '{LIST_SEPARATOR}'"),
            ));
        }
        Ok(())
    }

    /// Record `entry_key` as a member of every tag in `tag_keys`.
    ///
    /// # Errors
    ///
    /// Propagates adapter errors.
    pub async fn add(
        &self,
        storage: &dyn StorageAdapter,
        tag_keys: &[String],
        entry_key: &str,
    ) -> CacheResult<()> {
        match self.kind {
            TagIndexKind::NativeSet => {
                for tag_key in tag_keys {
                    storage.set_add(tag_key, entry_key).await?;
                    storage.expire(tag_key, self.tag_ttl).await?;
                }
            }
            TagIndexKind::SerializedList => {
                for tag_key in tag_keys {
                    let mut members = self.read_list(storage, tag_key).await?;
                    if !members.iter().any(|m| m == entry_key) {
                        members.push(entry_key.to_string());
                    }
                    // rewrite even when unchanged to refresh the tag's expiry
                    self.write_list(storage, tag_key, &members).await?;
                }
            }
            TagIndexKind::JoinTable => {}
        }
        Ok(())
    }

    /// Drop `entry_key` from every tag in `tag_keys`, deleting tags left empty.
    ///
    /// # Errors
    ///
    /// Propagates adapter errors.
    pub async fn remove(
        &self,
        storage: &dyn StorageAdapter,
        tag_keys: &[String],
        entry_key: &str,
    ) -> CacheResult<()> {
        match self.kind {
            TagIndexKind::NativeSet => {
                for tag_key in tag_keys {
                    storage.set_remove(tag_key, entry_key).await?;
                    if storage.set_members(tag_key).await?.is_empty() {
                        storage.delete(tag_key).await?;
                    }
                }
            }
            TagIndexKind::SerializedList => {
                for tag_key in tag_keys {
                    let mut members = self.read_list(storage, tag_key).await?;
                    let before = members.len();
                    members.retain(|m| m != entry_key);
                    if members.is_empty() {
                        storage.delete(tag_key).await?;
                    } else if members.len() != before {
                        self.write_list(storage, tag_key, &members).await?;
                    }
                }
            }
            TagIndexKind::JoinTable => {}
        }
        Ok(())
    }

    /// Members of one tag.
    ///
    /// # Errors
    ///
    /// Propagates adapter errors.
    pub async fn members(
        &self,
        storage: &dyn StorageAdapter,
        tag_key: &str,
    ) -> CacheResult<Vec<String>> {
        match self.kind {
            TagIndexKind::NativeSet | TagIndexKind::JoinTable => storage.set_members(tag_key).await,
            TagIndexKind::SerializedList => self.read_list(storage, tag_key).await,
        }
    }

    /// Entry keys matching `tag_keys` under `mode`, each once, in first-seen
    /// order.
    ///
    /// # Errors
    ///
    /// Propagates adapter errors.
    pub async fn resolve(
        &self,
        storage: &dyn StorageAdapter,
        tag_keys: &[String],
        mode: TagMatch,
    ) -> CacheResult<Vec<String>> {
        let mut per_tag = Vec::with_capacity(tag_keys.len());
        for tag_key in tag_keys {
            per_tag.push(self.members(storage, tag_key).await?);
        }

        let resolved: Vec<String> = match mode {
            TagMatch::Any => {
                let mut seen = HashSet::new();
                per_tag
                    .into_iter()
                    .flatten()
                    .filter(|key| seen.insert(key.clone()))
                    .collect()
            }
            TagMatch::All => {
                let mut sets = per_tag.into_iter();
                let first = sets.next().unwrap_or_default();
                let rest: Vec<HashSet<String>> =
                    sets.map(|members| members.into_iter().collect()).collect();
                let mut seen = HashSet::new();
                first
                    .into_iter()
                    .filter(|key| rest.iter().all(|set| set.contains(key)))
                    .filter(|key| seen.insert(key.clone()))
                    .collect()
            }
        };
        debug!(tags = tag_keys.len(), matched = resolved.len(), "Resolved tag members");
        Ok(resolved)
    }

    /// Delete the tag records themselves.
    ///
    /// Failures are logged and skipped: a leftover tag only lists keys that
    /// no longer exist.
    pub async fn clear(&self, storage: &dyn StorageAdapter, tag_keys: &[String]) {
        for tag_key in tag_keys {
            let cleared = match self.kind {
                TagIndexKind::NativeSet | TagIndexKind::SerializedList => {
                    storage.delete(tag_key).await.map(|_| ())
                }
                TagIndexKind::JoinTable => self.clear_rows(storage, tag_key).await,
            };
            if let Err(err) = cleared {
                warn!(tag = %tag_key, error = %err, "Could not clear tag index");
            }
        }
    }

    async fn clear_rows(&self, storage: &dyn StorageAdapter, tag_key: &str) -> CacheResult<()> {
        for member in storage.set_members(tag_key).await? {
            storage.set_remove(tag_key, &member).await?;
        }
        Ok(())
    }

    async fn read_list(
        &self,
        storage: &dyn StorageAdapter,
        tag_key: &str,
    ) -> CacheResult<Vec<String>> {
        let Some(bytes) = storage.get(tag_key).await? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8(bytes).map_err(|_| {
            CacheError::Deserialization(format!("tag list {tag_key} is not UTF-8"))
        })?;
        Ok(text
            .split(LIST_SEPARATOR)
            .filter(|member| !member.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    async fn write_list(
        &self,
        storage: &dyn StorageAdapter,
        tag_key: &str,
        members: &[String],
    ) -> CacheResult<()> {
        let joined = members.join(&LIST_SEPARATOR.to_string());
        storage
            .set(tag_key, joined.as_bytes(), Some(self.tag_ttl))
            .await?;
        Ok(())
    }
}
