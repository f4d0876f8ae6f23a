//! `sync_history` table — one row appended per `SyncBucket` invocation,
//! read back (paged) for the control-plane API (spec.md §3, §6).

use crate::{Store, StoreResult};
use conveyor_core::SyncHistoryEntry;
use sqlx::Row;

impl Store {
    pub async fn append_sync_history(&self, entry: &SyncHistoryEntry) -> StoreResult<()> {
        let brands = serde_json::to_string(&entry.brands)
            .map_err(|e| crate::StoreError::Conflict(e.to_string()))?;
        let purchasers = serde_json::to_string(&entry.purchasers)
            .map_err(|e| crate::StoreError::Conflict(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO sync_history (timestamp, synced, skipped, errors, brands, purchasers)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(entry.timestamp)
        .bind(entry.synced)
        .bind(entry.skipped)
        .bind(entry.errors)
        .bind(brands)
        .bind(purchasers)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_sync_history(
        &self,
        page: i64,
        limit: i64,
    ) -> StoreResult<Vec<SyncHistoryEntry>> {
        let offset = (page.max(1) - 1) * limit.max(1);
        let rows = sqlx::query(
            "SELECT * FROM sync_history ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit.max(1))
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<SyncHistoryEntry> {
                let brands: String = row.try_get("brands")?;
                let purchasers: String = row.try_get("purchasers")?;
                Ok(SyncHistoryEntry {
                    timestamp: row.try_get("timestamp")?,
                    synced: row.try_get("synced")?,
                    skipped: row.try_get("skipped")?,
                    errors: row.try_get("errors")?,
                    brands: serde_json::from_str(&brands)
                        .map_err(|e| crate::StoreError::Conflict(e.to_string()))?,
                    purchasers: serde_json::from_str(&purchasers)
                        .map_err(|e| crate::StoreError::Conflict(e.to_string()))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_page_newest_first() {
        let store = Store::open_in_memory().await.unwrap();
        for i in 0..3 {
            store
                .append_sync_history(&SyncHistoryEntry {
                    timestamp: chrono::Utc::now(),
                    synced: i,
                    skipped: 0,
                    errors: 0,
                    brands: vec!["acme".into()],
                    purchasers: vec!["p1".into()],
                })
                .await
                .unwrap();
        }
        let page = store.list_sync_history(1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].synced, 2);
    }
}
