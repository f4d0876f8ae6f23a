//! `schedule_audit` table — one row per schedule tick attempt (spec.md
//! §4.6). Append failures are logged and swallowed, never propagated: this
//! is the one store surface where the caller must not see a `StoreError`.

use crate::Store;
use conveyor_core::{AuditLevel, AuditOutcome, ScheduleAuditEntry};
use sqlx::Row;

impl Store {
    /// Never fails the caller (spec.md §7 `AuditFailure`): logs and returns.
    pub async fn append_audit(&self, entry: &ScheduleAuditEntry) {
        let data = match entry.data.as_ref().map(serde_json::to_string).transpose() {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialise audit entry data");
                return;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT INTO schedule_audit (timestamp, schedule_id, outcome, level, message, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(entry.timestamp)
        .bind(&entry.schedule_id)
        .bind(entry.outcome.as_str())
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(&data)
        .execute(self.pool())
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "failed to append audit entry");
        }
    }

    pub async fn list_audit(
        &self,
        page: i64,
        limit: i64,
    ) -> crate::StoreResult<Vec<ScheduleAuditEntry>> {
        let offset = (page.max(1) - 1) * limit.max(1);
        let rows = sqlx::query(
            "SELECT * FROM schedule_audit ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit.max(1))
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> crate::StoreResult<ScheduleAuditEntry> {
                let outcome: String = row.try_get("outcome")?;
                let level: String = row.try_get("level")?;
                let data: Option<String> = row.try_get("data")?;
                Ok(ScheduleAuditEntry {
                    timestamp: row.try_get("timestamp")?,
                    schedule_id: row.try_get("schedule_id")?,
                    outcome: AuditOutcome::parse(&outcome).ok_or_else(|| {
                        crate::StoreError::Conflict(format!("bad audit outcome {outcome}"))
                    })?,
                    level: AuditLevel::parse(&level).ok_or_else(|| {
                        crate::StoreError::Conflict(format!("bad audit level {level}"))
                    })?,
                    message: row.try_get("message")?,
                    data: data
                        .map(|d| serde_json::from_str(&d))
                        .transpose()
                        .map_err(|e: serde_json::Error| crate::StoreError::Conflict(e.to_string()))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_page() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .append_audit(&ScheduleAuditEntry {
                timestamp: chrono::Utc::now(),
                schedule_id: Some("s1".into()),
                outcome: AuditOutcome::Skipped,
                level: AuditLevel::Warn,
                message: "paused".into(),
                data: None,
            })
            .await;
        let page = store.list_audit(1, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].message, "paused");
    }
}
