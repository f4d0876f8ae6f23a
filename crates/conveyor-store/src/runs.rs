//! `runs` table plus the `last_run_number`/`current_run_id`/
//! `last_run_completed` KV entries that back run-id allocation (spec.md
//! §4.3). Skip ids never reach this module — they are derived purely in
//! `conveyor_core::derive_skip_id` without touching the store, precisely so
//! that deriving one never consumes a sequence number.

use crate::{Store, StoreResult};
use conveyor_core::{Run, RunStatus};
use sqlx::Row;

impl Store {
    /// Allocate the next sequential run id, persist `current_run_id`, and
    /// insert a `running` Run row. `prefix` is normally `"RUN"`.
    pub async fn start_new_run(&self, prefix: &str) -> StoreResult<String> {
        let mut tx = self.pool().begin().await?;

        let current: Option<(String,)> =
            sqlx::query_as("SELECT value FROM app_config_kv WHERE key = 'last_run_number'")
                .fetch_optional(&mut *tx)
                .await?;
        let next: i64 = current
            .and_then(|(v,)| v.parse::<i64>().ok())
            .unwrap_or(0)
            + 1;

        sqlx::query(
            r#"
            INSERT INTO app_config_kv (key, value) VALUES ('last_run_number', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(next.to_string())
        .execute(&mut *tx)
        .await?;

        let run_id = format!("{prefix}{next}");

        sqlx::query(
            r#"
            INSERT INTO app_config_kv (key, value) VALUES ('current_run_id', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(&run_id)
        .execute(&mut *tx)
        .await?;

        let now = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO runs (run_id, started_at, status) VALUES (?1, ?2, 'running')",
        )
        .bind(&run_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(run_id)
    }

    pub async fn mark_run_completed(&self, run_id: &str) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        let now = chrono::Utc::now();

        sqlx::query("UPDATE runs SET finished_at = ?1, status = 'done' WHERE run_id = ?2")
            .bind(now)
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO app_config_kv (key, value) VALUES ('last_run_completed', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Finalise a run as `error` without marking it completed — used on
    /// `NetworkAbort` (spec.md §7).
    pub async fn mark_run_errored(&self, run_id: &str) -> StoreResult<()> {
        let now = chrono::Utc::now();
        sqlx::query("UPDATE runs SET finished_at = ?1, status = 'error' WHERE run_id = ?2")
            .bind(now)
            .bind(run_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn save_run_summary(
        &self,
        run_id: &str,
        summary: &serde_json::Value,
    ) -> StoreResult<()> {
        let summary_text = serde_json::to_string(summary)
            .map_err(|e| crate::StoreError::Conflict(e.to_string()))?;
        sqlx::query("UPDATE runs SET summary = ?1 WHERE run_id = ?2")
            .bind(summary_text)
            .bind(run_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> StoreResult<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE run_id = ?1")
            .bind(run_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_run).transpose()
    }

    pub async fn current_run_id(&self) -> StoreResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM app_config_kv WHERE key = 'current_run_id'")
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|(v,)| v))
    }
}

fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Run> {
    let status: String = row.try_get("status")?;
    let summary: Option<String> = row.try_get("summary")?;
    let summary = summary
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e: serde_json::Error| crate::StoreError::Conflict(e.to_string()))?;

    Ok(Run {
        run_id: row.try_get("run_id")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| crate::StoreError::Conflict(format!("bad run status {status}")))?,
        summary,
    })
}
