//! Key-Value Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::KeyValueStore,
};
use bytes::Bytes;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::debug;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS kv_entries (
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

fn db_error(action: &str, e: sqlx::Error) -> BridgeError {
    BridgeError::DatabaseError(format!("Failed to {}: {}", action, e))
}

/// SQLite-backed key-value store
///
/// One row per key. Each `set` is a single upsert statement, so readers never
/// observe a half-written value.
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Open (or create) the store at `db_path`
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| db_error("connect to DB", e))?;

        let store = Self::with_pool(pool).await?;
        debug!(path = ?db_path, "Initialized key-value store");
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// pinned to one connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| db_error("connect to DB", e))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| db_error("create table", e))?;

        Ok(Self { pool })
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("read entry", e))?;

        Ok(row.map(|row| {
            let value: Vec<u8> = row.get(0);
            Bytes::from(value)
        }))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value.as_ref())
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("write entry", e))?;

        debug!(key = key, size = value.len(), "Stored entry");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete entry", e))?;

        debug!(key = key, "Removed entry");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM kv_entries ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list keys", e))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("check key", e))?;

        Ok(row.is_some())
    }
}

/// SQLite store opened on first use.
///
/// Lets synchronous configuration code hand out a store without a Tokio
/// runtime; the pool is created inside whichever runtime first touches it.
pub struct LazySqliteKeyValueStore {
    db_path: PathBuf,
    store: OnceCell<SqliteKeyValueStore>,
}

impl LazySqliteKeyValueStore {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            store: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    async fn store(&self) -> Result<&SqliteKeyValueStore> {
        self.store
            .get_or_try_init(|| SqliteKeyValueStore::new(self.db_path.clone()))
            .await
    }
}

#[async_trait]
impl KeyValueStore for LazySqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.store().await?.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.store().await?.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.store().await?.remove(key).await
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.store().await?.list_keys().await
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        self.store().await?.contains(key).await
    }
}
