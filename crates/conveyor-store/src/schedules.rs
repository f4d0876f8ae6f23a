//! `schedules` table — CRUD for the Cron Dispatcher (spec.md §4.6, §6).
//! Cron/timezone validation lives in `conveyor-cron`; this module only
//! enforces the `(cron, timezone)` uniqueness invariant at the data layer.

use crate::{Store, StoreResult};
use conveyor_core::Schedule;
use sqlx::Row;

impl Store {
    pub async fn create_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
        let brands = serde_json::to_string(&schedule.brands)
            .map_err(|e| crate::StoreError::Conflict(e.to_string()))?;
        let purchasers = serde_json::to_string(&schedule.purchasers)
            .map_err(|e| crate::StoreError::Conflict(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO schedules (id, created_at, brands, purchasers, cron, timezone)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&schedule.id)
        .bind(schedule.created_at)
        .bind(&brands)
        .bind(&purchasers)
        .bind(&schedule.cron)
        .bind(&schedule.timezone)
        .execute(self.pool())
        .await;

        map_unique_violation(result)
    }

    /// Replace a schedule's fields in place, keeping its id and
    /// `created_at`. Rejects a `(cron, timezone)` that collides with a
    /// *different* schedule.
    pub async fn update_schedule(
        &self,
        id: &str,
        brands: &[String],
        purchasers: &[String],
        cron: &str,
        timezone: &str,
    ) -> StoreResult<()> {
        if self.get_schedule(id).await?.is_none() {
            return Err(crate::StoreError::NotFound(format!("schedule {id}")));
        }

        let brands_json =
            serde_json::to_string(brands).map_err(|e| crate::StoreError::Conflict(e.to_string()))?;
        let purchasers_json = serde_json::to_string(purchasers)
            .map_err(|e| crate::StoreError::Conflict(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE schedules SET brands = ?1, purchasers = ?2, cron = ?3, timezone = ?4
            WHERE id = ?5
            "#,
        )
        .bind(&brands_json)
        .bind(&purchasers_json)
        .bind(cron)
        .bind(timezone)
        .bind(id)
        .execute(self.pool())
        .await;

        map_unique_violation(result)
    }

    pub async fn delete_schedule(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(crate::StoreError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    pub async fn get_schedule(&self, id: &str) -> StoreResult<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_schedule).transpose()
    }

    pub async fn list_schedules(&self) -> StoreResult<Vec<Schedule>> {
        let rows = sqlx::query("SELECT * FROM schedules ORDER BY created_at ASC")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_schedule).collect()
    }
}

fn map_unique_violation(result: Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error>) -> StoreResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
            crate::StoreError::Conflict("A schedule for this time and timezone already exists.".into()),
        ),
        Err(e) => Err(e.into()),
    }
}

fn row_to_schedule(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Schedule> {
    let brands: String = row.try_get("brands")?;
    let purchasers: String = row.try_get("purchasers")?;
    Ok(Schedule {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        brands: serde_json::from_str(&brands)
            .map_err(|e| crate::StoreError::Conflict(e.to_string()))?,
        purchasers: serde_json::from_str(&purchasers)
            .map_err(|e| crate::StoreError::Conflict(e.to_string()))?,
        cron: row.try_get("cron")?,
        timezone: row.try_get("timezone")?,
    })
}
