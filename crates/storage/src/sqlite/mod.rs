//! `SQLite` backing for the key-value port: one `kv_store` row per persisted blob.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use thiserror::Error;

use crate::repository::{KeyValueStore, Storage};

mod kv_repo;
mod migrate;

/// Persisted client state (course progress, focus settings) keyed by name.
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: SqlitePool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl SqliteKvStore {
    /// Open a pool on `database_url` without touching the schema.
    ///
    /// Each connection runs in WAL mode with a busy timeout so a front end and
    /// a background task can write blobs concurrently.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the database cannot be opened or a pragma fails.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode = WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 5000;")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Connect and bring the `kv_store` schema up to date.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if connecting or migrating fails.
    pub async fn open(database_url: &str) -> Result<Self, SqliteInitError> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Apply pending `schema_migrations` entries; safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if a migration statement fails.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }
}

impl Storage {
    /// Storage whose blobs live in the `SQLite` database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the database cannot be opened or migrated.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteKvStore::open(database_url).await?);
        Ok(Self { kv })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_can_back_the_shared_port() {
        fn assert_port<T: KeyValueStore + Clone + 'static>() {}
        assert_port::<SqliteKvStore>();
    }

    #[tokio::test]
    async fn open_is_idempotent_on_one_database() {
        let url = "sqlite:file:memdb_kv_open_twice?mode=memory&cache=shared";
        let first = SqliteKvStore::open(url).await.unwrap();
        first
            .save("lesson-focus-storage", &serde_json::json!({ "focusMode": "classic" }))
            .await
            .unwrap();

        let second = SqliteKvStore::open(url).await.unwrap();
        assert_eq!(
            second.load("lesson-focus-storage").await.unwrap(),
            Some(serde_json::json!({ "focusMode": "classic" }))
        );
    }
}
