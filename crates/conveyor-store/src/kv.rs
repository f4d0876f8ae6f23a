//! `app_config_kv` — generic string key/value storage backing the
//! `/api/email-config` pass-through and the per-`caseId` `RunState` used for
//! resume (spec.md §3, §4.3, §6).

use crate::{Store, StoreResult};
use conveyor_core::{CaseId, RunState};
use sqlx::Row;

fn run_state_key(case_id: CaseId) -> String {
    format!("run_state:{}", case_id.as_str())
}

impl Store {
    pub async fn get_kv(&self, key: &str) -> StoreResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM app_config_kv WHERE key = ?1")
                .bind(key)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set_kv(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO app_config_kv (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_run_state(&self, case_id: CaseId) -> StoreResult<Option<RunState>> {
        let raw = self.get_kv(&run_state_key(case_id)).await?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e: serde_json::Error| crate::StoreError::Conflict(e.to_string()))
    }

    pub async fn set_run_state(&self, case_id: CaseId, state: &RunState) -> StoreResult<()> {
        let raw =
            serde_json::to_string(state).map_err(|e| crate::StoreError::Conflict(e.to_string()))?;
        self.set_kv(&run_state_key(case_id), &raw).await
    }

    pub async fn clear_run_state(&self, case_id: CaseId) -> StoreResult<()> {
        let existed = self.get_run_state(case_id).await?.is_some();
        if !existed {
            return Err(crate::StoreError::NotFound(format!(
                "run state for {}",
                case_id.as_str()
            )));
        }
        sqlx::query("DELETE FROM app_config_kv WHERE key = ?1")
            .bind(run_state_key(case_id))
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::RunStateStatus;

    #[tokio::test]
    async fn run_state_round_trip_then_clear() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.get_run_state(CaseId::Pipe).await.unwrap().is_none());

        store
            .set_run_state(
                CaseId::Pipe,
                &RunState {
                    status: RunStateStatus::Stopped,
                    run_id: "RUN1".into(),
                },
            )
            .await
            .unwrap();

        let state = store.get_run_state(CaseId::Pipe).await.unwrap().unwrap();
        assert_eq!(state.run_id, "RUN1");

        store.clear_run_state(CaseId::Pipe).await.unwrap();
        assert!(store.get_run_state(CaseId::Pipe).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_missing_run_state_is_not_found() {
        let store = Store::open_in_memory().await.unwrap();
        let err = store.clear_run_state(CaseId::Sync).await.unwrap_err();
        assert!(matches!(err, crate::StoreError::NotFound(_)));
    }
}
