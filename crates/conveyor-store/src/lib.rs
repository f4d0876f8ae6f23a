//! Checkpoint Store (C1) — spec.md §4.1.
//!
//! A single-writer transactional store over SQLite (WAL mode), grounded on
//! `mqk-db`'s connection/migration/query style but swapped from Postgres to
//! SQLite (see SPEC_FULL.md §0). Every state-changing method is atomic with
//! respect to crashes: either every row write lands, or none do.

mod audit;
mod extraction;
mod file_registry;
mod kv;
mod manifest;
mod runs;
mod schedules;
mod sync_history;

pub use audit::*;
pub use extraction::*;
pub use file_registry::*;
pub use kv::*;
pub use manifest::*;
pub use runs::*;
pub use schedules::*;
pub use sync_history::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for conveyor_core::CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => conveyor_core::CoreError::NotFound(msg),
            StoreError::Conflict(msg) => conveyor_core::CoreError::Validation(msg),
            StoreError::Sqlx(err) => conveyor_core::CoreError::FatalRun(err.to_string()),
            StoreError::Migrate(err) => conveyor_core::CoreError::FatalRun(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to the checkpoint store. Cheaply `Clone`-able (wraps a pool).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if absent) the SQLite database at `path`, apply WAL
    /// mode, and run embedded migrations.
    pub async fn open(path: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        // Single-writer discipline (spec.md §5): SQLite WAL allows
        // concurrent readers alongside the one writer, so a small pool is
        // safe — unlike the teacher's Postgres pool sized for many
        // concurrent writers.
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        store.normalize_legacy_paths().await?;
        Ok(store)
    }

    /// In-memory store for tests — no file, no WAL needed.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// One-time migration pass applying path normalisation to any legacy
    /// rows (spec.md §4.1).
    async fn normalize_legacy_paths(&self) -> StoreResult<()> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT relative_path FROM file_registry")
            .fetch_all(&self.pool)
            .await?;

        for (path,) in rows {
            let normalized = conveyor_core::normalize_relative_path(&path);
            if normalized != path {
                // Two rows could collide after normalisation only if the
                // legacy data already duplicated a logical path under two
                // spellings; keep the newer one by ignoring a conflict.
                let _ = sqlx::query(
                    "UPDATE OR IGNORE file_registry SET relative_path = ?1 WHERE relative_path = ?2",
                )
                .bind(&normalized)
                .bind(&path)
                .execute(&self.pool)
                .await;
            }
        }
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
