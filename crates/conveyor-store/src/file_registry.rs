//! `file_registry` table — spec.md §4.1 `RegisterFiles`/`UpdateFileStatus`/
//! `GetUnextractedFiles`/`GetFailedFiles`.

use crate::{Store, StoreResult};
use conveyor_core::{ExtractStatus, FileRegistryEntry, Pair};
use sqlx::Row;

/// One inbound sync observation, as handed off by the Sync Engine.
#[derive(Debug, Clone)]
pub struct RegisterFileInput {
    pub relative_path: String,
    pub full_path: String,
    pub brand: String,
    pub purchaser: String,
    pub size: i64,
    pub etag: Option<String>,
    pub sha256: Option<String>,
    pub synced_at: chrono::DateTime<chrono::Utc>,
}

/// Optional scoping for `GetUnextractedFiles`/`GetFailedFiles`.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub brand: Option<String>,
    pub purchaser: Option<String>,
    pub pairs: Vec<Pair>,
}

impl Store {
    /// Upsert-with-preserve: `registeredAt` is set only on insert, every
    /// other column is overwritten with the freshly synced values.
    pub async fn register_files(&self, entries: &[RegisterFileInput]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        let now = chrono::Utc::now();

        for entry in entries {
            let relative_path = conveyor_core::normalize_relative_path(&entry.relative_path);
            sqlx::query(
                r#"
                INSERT INTO file_registry
                    (relative_path, full_path, brand, purchaser, size, etag, sha256,
                     synced_at, registered_at, extract_status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending')
                ON CONFLICT(relative_path) DO UPDATE SET
                    full_path = excluded.full_path,
                    brand = excluded.brand,
                    purchaser = excluded.purchaser,
                    size = excluded.size,
                    etag = excluded.etag,
                    sha256 = excluded.sha256,
                    synced_at = excluded.synced_at
                "#,
            )
            .bind(&relative_path)
            .bind(&entry.full_path)
            .bind(&entry.brand)
            .bind(&entry.purchaser)
            .bind(entry.size)
            .bind(&entry.etag)
            .bind(&entry.sha256)
            .bind(entry.synced_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn update_file_status(
        &self,
        relative_path: &str,
        status: ExtractStatus,
        run_id: Option<&str>,
        extracted_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> StoreResult<()> {
        let relative_path = conveyor_core::normalize_relative_path(relative_path);
        sqlx::query(
            r#"
            UPDATE file_registry
            SET extract_status = ?1, last_run_id = COALESCE(?2, last_run_id), extracted_at = COALESCE(?3, extracted_at)
            WHERE relative_path = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(run_id)
        .bind(extracted_at)
        .bind(&relative_path)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All registry rows with `extractStatus != done`, filtered by optional
    /// `brand`, `purchaser`, or explicit `(brand, purchaser)` pairs.
    pub async fn get_unextracted_files(
        &self,
        filter: &FileFilter,
    ) -> StoreResult<Vec<FileRegistryEntry>> {
        let rows = sqlx::query("SELECT * FROM file_registry WHERE extract_status != 'done'")
            .fetch_all(self.pool())
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = row_to_entry(&row)?;
            if matches_filter(&entry, filter) {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Distinct `relativePath`s whose *latest* extraction record under the
    /// filter has `status = error`.
    pub async fn get_failed_files(&self, filter: &FileFilter) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT er.relative_path, er.status
            FROM extraction_records er
            INNER JOIN (
                SELECT relative_path, MAX(rowid) AS latest_rowid
                FROM extraction_records
                GROUP BY relative_path
            ) latest
              ON er.relative_path = latest.relative_path AND er.rowid = latest.latest_rowid
            WHERE er.status = 'error'
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::new();
        for row in rows {
            let relative_path: String = row.try_get("relative_path")?;
            if filter.brand.is_none() && filter.purchaser.is_none() && filter.pairs.is_empty() {
                out.push(relative_path);
                continue;
            }
            if let Some(entry) = self.get_file_by_path(&relative_path).await? {
                if matches_filter(&entry, filter) {
                    out.push(relative_path);
                }
            }
        }
        Ok(out)
    }

    pub async fn get_file_by_path(
        &self,
        relative_path: &str,
    ) -> StoreResult<Option<FileRegistryEntry>> {
        let relative_path = conveyor_core::normalize_relative_path(relative_path);
        let row = sqlx::query("SELECT * FROM file_registry WHERE relative_path = ?1")
            .bind(&relative_path)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_entry).transpose()
    }
}

fn matches_filter(entry: &FileRegistryEntry, filter: &FileFilter) -> bool {
    if !filter.pairs.is_empty() {
        return filter
            .pairs
            .iter()
            .any(|p| p.tenant == entry.brand && p.purchaser == entry.purchaser);
    }
    let brand_ok = filter.brand.as_deref().map_or(true, |b| b == entry.brand);
    let purchaser_ok = filter
        .purchaser
        .as_deref()
        .map_or(true, |p| p == entry.purchaser);
    brand_ok && purchaser_ok
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> StoreResult<FileRegistryEntry> {
    let status: String = row.try_get("extract_status")?;
    Ok(FileRegistryEntry {
        relative_path: row.try_get("relative_path")?,
        full_path: row.try_get("full_path")?,
        brand: row.try_get("brand")?,
        purchaser: row.try_get("purchaser")?,
        size: row.try_get("size")?,
        etag: row.try_get("etag")?,
        sha256: row.try_get("sha256")?,
        synced_at: row.try_get("synced_at")?,
        registered_at: row.try_get("registered_at")?,
        extract_status: ExtractStatus::parse(&status)
            .ok_or_else(|| crate::StoreError::Conflict(format!("bad extract_status {status}")))?,
        extracted_at: row.try_get("extracted_at")?,
        last_run_id: row.try_get("last_run_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_preserve_registered_at() {
        let store = Store::open_in_memory().await.unwrap();
        let now = chrono::Utc::now();
        let input = RegisterFileInput {
            relative_path: "/a\\b.csv".into(),
            full_path: "/stage/acme/p1/a/b.csv".into(),
            brand: "acme".into(),
            purchaser: "p1".into(),
            size: 10,
            etag: Some("e1".into()),
            sha256: None,
            synced_at: now,
        };
        store.register_files(&[input.clone()]).await.unwrap();
        let first = store.get_file_by_path("a/b.csv").await.unwrap().unwrap();
        assert_eq!(first.relative_path, "a/b.csv");

        let mut second = input;
        second.size = 20;
        store.register_files(&[second]).await.unwrap();
        let updated = store.get_file_by_path("a/b.csv").await.unwrap().unwrap();
        assert_eq!(updated.size, 20);
        assert_eq!(updated.registered_at, first.registered_at);
    }

    #[tokio::test]
    async fn unextracted_filters_by_pairs() {
        let store = Store::open_in_memory().await.unwrap();
        let now = chrono::Utc::now();
        store
            .register_files(&[
                RegisterFileInput {
                    relative_path: "a.csv".into(),
                    full_path: "x".into(),
                    brand: "acme".into(),
                    purchaser: "p1".into(),
                    size: 1,
                    etag: None,
                    sha256: None,
                    synced_at: now,
                },
                RegisterFileInput {
                    relative_path: "b.csv".into(),
                    full_path: "y".into(),
                    brand: "acme".into(),
                    purchaser: "p2".into(),
                    size: 1,
                    etag: None,
                    sha256: None,
                    synced_at: now,
                },
            ])
            .await
            .unwrap();

        let filter = FileFilter {
            pairs: vec![Pair {
                tenant: "acme".into(),
                purchaser: "p1".into(),
            }],
            ..Default::default()
        };
        let rows = store.get_unextracted_files(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].relative_path, "a.csv");
    }
}
