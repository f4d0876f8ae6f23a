//! `extraction_records` table — spec.md §4.1 `UpsertRecord`/`UpsertRecords`
//! and the `GetRecordsForRun`/`GetProcessedPaths`/`GetCompletedPaths`/
//! `GetErrorPaths` readers.
//!
//! Every upsert also updates the matching `file_registry` row inside the
//! same transaction (spec.md §9 Open Question: the source sometimes did
//! this in two transactions, this store never does).

use crate::{Store, StoreResult};
use conveyor_core::{ExtractStatus, ExtractionRecord};
use sqlx::Row;

impl Store {
    pub async fn upsert_record(&self, record: &ExtractionRecord) -> StoreResult<()> {
        self.upsert_records(std::slice::from_ref(record)).await
    }

    pub async fn upsert_records(&self, records: &[ExtractionRecord]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;

        for record in records {
            let relative_path = conveyor_core::normalize_relative_path(&record.relative_path);
            let full_response = record
                .full_response
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| crate::StoreError::Conflict(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO extraction_records
                    (run_id, relative_path, file_path, brand, purchaser, status,
                     started_at, finished_at, latency_ms, status_code, error_message,
                     pattern_key, full_response)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(run_id, relative_path) DO UPDATE SET
                    file_path = excluded.file_path,
                    status = excluded.status,
                    started_at = COALESCE(extraction_records.started_at, excluded.started_at),
                    finished_at = excluded.finished_at,
                    latency_ms = excluded.latency_ms,
                    status_code = excluded.status_code,
                    error_message = excluded.error_message,
                    pattern_key = excluded.pattern_key,
                    full_response = excluded.full_response
                "#,
            )
            .bind(&record.run_id)
            .bind(&relative_path)
            .bind(&record.file_path)
            .bind(&record.brand)
            .bind(&record.purchaser)
            .bind(record.status.as_str())
            .bind(record.started_at)
            .bind(record.finished_at)
            .bind(record.latency_ms)
            .bind(record.status_code)
            .bind(&record.error_message)
            .bind(&record.pattern_key)
            .bind(&full_response)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE file_registry
                SET extract_status = ?1, last_run_id = ?2, extracted_at = COALESCE(?3, extracted_at)
                WHERE relative_path = ?4
                "#,
            )
            .bind(record.status.as_str())
            .bind(&record.run_id)
            .bind(record.finished_at)
            .bind(&relative_path)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_records_for_run(&self, run_id: &str) -> StoreResult<Vec<ExtractionRecord>> {
        let rows = sqlx::query("SELECT * FROM extraction_records WHERE run_id = ?1")
            .bind(run_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Union of `{done, skipped, error}`.
    pub async fn get_processed_paths(&self, run_id: &str) -> StoreResult<Vec<String>> {
        self.paths_for_run_with_statuses(run_id, &["done", "skipped", "error"])
            .await
    }

    /// `{done, skipped}`.
    pub async fn get_completed_paths(&self, run_id: &str) -> StoreResult<Vec<String>> {
        self.paths_for_run_with_statuses(run_id, &["done", "skipped"])
            .await
    }

    pub async fn get_error_paths(&self, run_id: &str) -> StoreResult<Vec<String>> {
        self.paths_for_run_with_statuses(run_id, &["error"]).await
    }

    async fn paths_for_run_with_statuses(
        &self,
        run_id: &str,
        statuses: &[&str],
    ) -> StoreResult<Vec<String>> {
        let placeholders: Vec<String> = (0..statuses.len())
            .map(|i| format!("?{}", i + 2))
            .collect();
        let sql = format!(
            "SELECT DISTINCT relative_path FROM extraction_records WHERE run_id = ?1 AND status IN ({})",
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql).bind(run_id);
        for status in statuses {
            query = query.bind(*status);
        }
        let rows = query.fetch_all(self.pool()).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("relative_path").map_err(Into::into))
            .collect()
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> StoreResult<ExtractionRecord> {
    let status: String = row.try_get("status")?;
    let full_response: Option<String> = row.try_get("full_response")?;
    let full_response = full_response
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e: serde_json::Error| crate::StoreError::Conflict(e.to_string()))?;

    Ok(ExtractionRecord {
        run_id: row.try_get("run_id")?,
        relative_path: row.try_get("relative_path")?,
        file_path: row.try_get("file_path")?,
        brand: row.try_get("brand")?,
        purchaser: row.try_get("purchaser")?,
        status: ExtractStatus::parse(&status)
            .ok_or_else(|| crate::StoreError::Conflict(format!("bad status {status}")))?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        latency_ms: row.try_get("latency_ms")?,
        status_code: row.try_get("status_code")?,
        error_message: row.try_get("error_message")?,
        pattern_key: row.try_get("pattern_key")?,
        full_response,
    })
}
