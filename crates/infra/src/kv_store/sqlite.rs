use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::{KeyValueStore, StorageError};

/// SQLite-backed store: survives restarts, shared by every window of the app.
///
/// Cheap to clone (the pool is reference-counted).
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create session store directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to create SQLite pool for session store at {:?}", path))?;

        Self::init(pool).await
    }

    /// Private in-memory database. One connection, never recycled, or the data
    /// would vanish with it.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory SQLite URL")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to create in-memory SQLite pool")?;

        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_store (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create session_store table")?;

        Ok(Self { pool })
    }
}

fn backend(err: sqlx::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        sqlx::query_scalar::<_, String>("SELECT value FROM session_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }

    async fn set(&self, key: &str, value: &str) -> Result<Option<String>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let previous =
            sqlx::query_scalar::<_, String>("SELECT value FROM session_store WHERE key = ?1")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO session_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key)
            DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(previous)
    }

    async fn remove(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let previous =
            sqlx::query_scalar::<_, String>("SELECT value FROM session_store WHERE key = ?1")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;

        if previous.is_some() {
            sqlx::query("DELETE FROM session_store WHERE key = ?1")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(previous)
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar::<_, String>("SELECT key FROM session_store ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
    }
}
