//! SQL Storage - Relational Backend
//!
//! SQLite storage through `sqlx`. Entries live in `<prefix>cache` and tag
//! memberships in a `<prefix>tag` join table:
//!
//! ```sql
//! <prefix>cache(id TEXT PRIMARY KEY, data BLOB, created_at INTEGER, expires_at INTEGER)
//! <prefix>tag(name TEXT, id TEXT, PRIMARY KEY (name, id))
//! ```
//!
//! `expires_at = 0` means the row never expires. An entry and its tag rows
//! are written and deleted in one transaction. The statement helpers take a
//! borrowed connection rather than the pool, so a helper running inside a
//! transaction can only use that transaction and never opens a second one.

use crate::clock::{Clock, SystemClock, ttl_secs};
use crate::entry::try_parse_counter;
use crate::error::{CacheError, CacheResult};
use crate::traits::{StorageAdapter, TagIndexKind};
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Longest entry id the `cache.id` column is meant for
const MAX_ID_LEN: usize = 255;

/// Table names derived from the configured prefix
#[derive(Debug, Clone)]
struct Tables {
    cache: String,
    tag: String,
}

/// SQLite storage with a join-table tag index
///
/// **Example**:
/// ```rust,no_run
/// use tagged_cache::backends::SqlStorage;
///
/// # async fn example() -> tagged_cache::CacheResult<()> {
/// let storage = SqlStorage::connect("sqlite://cache.db?mode=rwc", "cache_").await?;
/// storage.create_schema().await?;
/// # Ok(())
/// # }
/// ```
pub struct SqlStorage {
    pool: SqlitePool,
    tables: Tables,
    clock: Arc<dyn Clock>,
}

impl SqlStorage {
    /// Open a pool on `url` using tables named `<table_prefix>cache` and
    /// `<table_prefix>tag`
    ///
    /// In-memory databases get a single connection so every query sees the
    /// same database.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for a prefix that is not a plain
    /// identifier, or [`CacheError::Sql`] if the pool cannot connect.
    pub async fn connect(url: &str, table_prefix: &str) -> CacheResult<Self> {
        info!(url = %url, "Initializing SQL Storage");

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = if in_memory {
            // the database lives only as long as its one connection
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(url).await?;

        let storage = Self::with_pool(pool, table_prefix)?;
        info!(url = %url, cache_table = %storage.tables.cache, "SQL Storage connected");
        Ok(storage)
    }

    /// Wrap an existing pool
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for a prefix that is not a plain identifier.
    pub fn with_pool(pool: SqlitePool, table_prefix: &str) -> CacheResult<Self> {
        if !table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(CacheError::Config(format!(
                "table prefix {table_prefix:?} must be alphanumeric or '_'"
            )));
        }

        Ok(Self {
            pool,
            tables: Tables {
                cache: format!("{table_prefix}cache"),
                tag: format!("{table_prefix}tag"),
            },
            clock: Arc::new(SystemClock),
        })
    }

    /// Read time from `clock` instead of the system clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create the cache and tag tables if they do not exist
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Sql`] if the DDL fails.
    pub async fn create_schema(&self) -> CacheResult<()> {
        let Tables { cache, tag } = &self.tables;
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {cache} (\
                 id TEXT PRIMARY KEY NOT NULL, \
                 data BLOB NOT NULL, \
                 created_at INTEGER NOT NULL, \
                 expires_at INTEGER NOT NULL DEFAULT 0)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {tag} (\
                 name TEXT NOT NULL, \
                 id TEXT NOT NULL, \
                 PRIMARY KEY (name, id))"
            ),
            format!("CREATE INDEX IF NOT EXISTS {tag}_id ON {tag} (id)"),
        ];

        let mut tx = self.pool.begin().await?;
        for statement in &statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!(cache_table = %cache, tag_table = %tag, "SQL schema ready");
        Ok(())
    }

    /// Delete rows whose expiration has passed, returning how many went
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Sql`] if the delete fails.
    pub async fn purge_expired(&self) -> CacheResult<u64> {
        let now = self.clock.now();
        let sql = format!(
            "DELETE FROM {} WHERE expires_at != 0 AND expires_at <= ?",
            self.tables.cache
        );
        let removed = sqlx::query(&sql)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed > 0 {
            debug!(count = removed, "[SQL] Purged expired rows");
        }
        Ok(removed)
    }

    fn expires_at(&self, ttl: Option<Duration>) -> i64 {
        ttl.map_or(0, |ttl| self.clock.now().saturating_add(ttl_secs(ttl)))
    }

    async fn upsert(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
        value: &[u8],
        expires_at: i64,
    ) -> CacheResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, data, created_at, expires_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET data = excluded.data, \
             created_at = excluded.created_at, expires_at = excluded.expires_at",
            self.tables.cache
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .bind(self.clock.now())
            .bind(expires_at)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Live row `(data, expires_at)` for `key`
    async fn fetch_live(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
    ) -> CacheResult<Option<(Vec<u8>, i64)>> {
        let sql = format!(
            "SELECT data, expires_at FROM {} WHERE id = ? AND (expires_at = 0 OR expires_at > ?)",
            self.tables.cache
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .bind(self.clock.now())
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(Some((row.try_get("data")?, row.try_get("expires_at")?))),
            None => Ok(None),
        }
    }

    async fn delete_entry(&self, conn: &mut SqliteConnection, key: &str) -> CacheResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE id = ? AND (expires_at = 0 OR expires_at > ?)",
            self.tables.cache
        );
        let live = sqlx::query(&sql)
            .bind(key)
            .bind(self.clock.now())
            .execute(&mut *conn)
            .await?
            .rows_affected();

        // expired rows go too, but do not count as removed
        let sql = format!("DELETE FROM {} WHERE id = ?", self.tables.cache);
        sqlx::query(&sql).bind(key).execute(&mut *conn).await?;
        Ok(live > 0)
    }

    async fn delete_tag_rows(&self, conn: &mut SqliteConnection, key: &str) -> CacheResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?", self.tables.tag);
        sqlx::query(&sql).bind(key).execute(&mut *conn).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqlStorage {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.validate_key(key)?;
        let mut conn = self.pool.acquire().await?;
        Ok(self.fetch_live(&mut *conn, key).await?.map(|(data, _)| data))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        self.validate_key(key)?;
        let mut conn = self.pool.acquire().await?;
        self.upsert(&mut *conn, key, value, self.expires_at(ttl))
            .await?;
        debug!(key = %key, ttl_secs = ?ttl.map(|t| t.as_secs()), "[SQL] Stored row");
        Ok(true)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        self.validate_key(key)?;
        let mut tx = self.pool.begin().await?;

        let purge = format!(
            "DELETE FROM {} WHERE id = ? AND expires_at != 0 AND expires_at <= ?",
            self.tables.cache
        );
        sqlx::query(&purge)
            .bind(key)
            .bind(self.clock.now())
            .execute(&mut *tx)
            .await?;

        let insert = format!(
            "INSERT INTO {} (id, data, created_at, expires_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO NOTHING",
            self.tables.cache
        );
        let inserted = sqlx::query(&insert)
            .bind(key)
            .bind(value)
            .bind(self.clock.now())
            .bind(self.expires_at(Some(ttl)))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(inserted == 1)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.validate_key(key)?;
        let mut conn = self.pool.acquire().await?;
        self.delete_entry(&mut *conn, key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.validate_key(key)?;
        let sql = format!(
            "UPDATE {} SET expires_at = ? WHERE id = ? AND (expires_at = 0 OR expires_at > ?)",
            self.tables.cache
        );
        let updated = sqlx::query(&sql)
            .bind(self.expires_at(Some(ttl)))
            .bind(key)
            .bind(self.clock.now())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.validate_key(key)?;
        let mut conn = self.pool.acquire().await?;
        let now = self.clock.now();
        Ok(self
            .fetch_live(&mut *conn, key)
            .await?
            .and_then(|(_, expires_at)| {
                (expires_at != 0).then(|| Duration::from_secs((expires_at - now).unsigned_abs()))
            }))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.validate_key(key)?;
        let mut tx = self.pool.begin().await?;
        let (current, expires_at) = self
            .fetch_live(&mut *tx, key)
            .await?
            .and_then(|(data, expires_at)| {
                try_parse_counter(&data).map(|current| (current, expires_at))
            })
            .unwrap_or((0, 0));
        let next = current.saturating_add(delta);
        self.upsert(&mut *tx, key, next.to_string().as_bytes(), expires_at)
            .await?;
        tx.commit().await?;
        Ok(next)
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        let sql = format!("SELECT id FROM {} WHERE name = ? ORDER BY id", self.tables.tag);
        let rows = sqlx::query(&sql).bind(key).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(CacheError::from))
            .collect()
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<bool> {
        let sql = format!(
            "INSERT INTO {} (name, id) VALUES (?, ?) ON CONFLICT(name, id) DO NOTHING",
            self.tables.tag
        );
        let added = sqlx::query(&sql)
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<bool> {
        let sql = format!("DELETE FROM {} WHERE name = ? AND id = ?", self.tables.tag);
        let removed = sqlx::query(&sql)
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    async fn write_tagged(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
        tag_keys: &[String],
    ) -> CacheResult<bool> {
        self.validate_key(key)?;
        let mut tx = self.pool.begin().await?;

        self.delete_tag_rows(&mut *tx, key).await?;
        let insert_tag = format!(
            "INSERT INTO {} (name, id) VALUES (?, ?) ON CONFLICT(name, id) DO NOTHING",
            self.tables.tag
        );
        for tag_key in tag_keys {
            sqlx::query(&insert_tag)
                .bind(tag_key)
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        self.upsert(&mut *tx, key, value, self.expires_at(ttl))
            .await?;

        // dropping `tx` on an early return rolls it back
        tx.commit().await?;
        debug!(key = %key, tags = tag_keys.len(), "[SQL] Stored tagged row");
        Ok(true)
    }

    async fn delete_tagged(&self, key: &str) -> CacheResult<bool> {
        self.validate_key(key)?;
        let mut tx = self.pool.begin().await?;
        let removed = self.delete_entry(&mut *tx, key).await?;
        self.delete_tag_rows(&mut *tx, key).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn flush_all(&self) -> CacheResult<bool> {
        let mut tx = self.pool.begin().await?;
        for table in [&self.tables.tag, &self.tables.cache] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(cache_table = %self.tables.cache, "[SQL] Flushed all rows");
        Ok(true)
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    fn validate_key(&self, key: &str) -> CacheResult<()> {
        if key.chars().count() > MAX_ID_LEN {
            return Err(CacheError::validation(
                key,
                format!("id exceeds {MAX_ID_LEN} characters"),
            ));
        }
        Ok(())
    }

    fn tag_index_kind(&self) -> TagIndexKind {
        TagIndexKind::JoinTable
    }

    fn atomic_increment(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "Sql"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    async fn storage() -> (SqlStorage, ManualClock) {
        let clock = ManualClock::new(10_000);
        let storage = SqlStorage::connect("sqlite::memory:", "t_")
            .await
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        storage.create_schema().await.unwrap();
        (storage, clock)
    }

    #[tokio::test]
    async fn test_prefix_must_be_identifier() {
        let pool = SqlitePoolOptions::new().connect_lazy("sqlite::memory:").unwrap();
        assert!(SqlStorage::with_pool(pool, "x; DROP TABLE y").is_err());
    }

    #[tokio::test]
    async fn test_rows_expire_logically() {
        let (storage, clock) = storage().await;
        storage
            .set("a", b"1", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(storage.ttl("a").await.unwrap(), Some(Duration::from_secs(5)));

        clock.advance(5);
        assert!(storage.get("a").await.unwrap().is_none());
        assert_eq!(storage.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_if_absent_replaces_expired_lock() {
        let (storage, clock) = storage().await;
        let ttl = Duration::from_secs(2);
        assert!(storage.set_if_absent("l", b"1", ttl).await.unwrap());
        assert!(!storage.set_if_absent("l", b"1", ttl).await.unwrap());
        clock.advance(2);
        assert!(storage.set_if_absent("l", b"1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_and_delete_tagged() {
        let (storage, _) = storage().await;
        let tags = vec!["tag.a".to_string(), "tag.b".to_string()];
        storage.write_tagged("e1", b"x", None, &tags).await.unwrap();
        storage
            .write_tagged("e2", b"y", None, &tags[..1])
            .await
            .unwrap();

        assert_eq!(storage.set_members("tag.a").await.unwrap(), vec!["e1", "e2"]);
        assert_eq!(storage.set_members("tag.b").await.unwrap(), vec!["e1"]);

        // rewriting replaces the membership rows
        storage
            .write_tagged("e1", b"x", None, &tags[1..])
            .await
            .unwrap();
        assert_eq!(storage.set_members("tag.a").await.unwrap(), vec!["e2"]);

        assert!(storage.delete_tagged("e1").await.unwrap());
        assert!(storage.set_members("tag.b").await.unwrap().is_empty());
        assert!(!storage.delete_tagged("e1").await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_by_keeps_counting() {
        let (storage, _) = storage().await;
        assert_eq!(storage.incr_by("n", 2).await.unwrap(), 2);
        assert_eq!(storage.incr_by("n", -7).await.unwrap(), -5);
        assert!(!storage.atomic_increment());
    }

    #[tokio::test]
    async fn test_long_ids_rejected_before_io() {
        let (storage, _) = storage().await;
        let err = storage.get(&"x".repeat(256)).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }
}
