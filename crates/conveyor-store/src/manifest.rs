//! `sync_manifest` — per-object dedup fingerprints keyed by
//! `brand + "/" + key` (spec.md §4.2). Legacy rows hold a bare SHA-256
//! string; this store only ever *writes* the structured form but must keep
//! reading both indefinitely (spec.md §9 Open Question).

use crate::{Store, StoreResult};
use serde::{Deserialize, Serialize};
use sqlx::Row;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredManifestEntry {
    pub sha256: String,
    pub etag: Option<String>,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManifestEntry {
    Structured(StructuredManifestEntry),
    /// A bare SHA-256 hex digest, as written by code that predates the
    /// structured form.
    Legacy(String),
}

impl ManifestEntry {
    pub fn sha256(&self) -> &str {
        match self {
            ManifestEntry::Structured(e) => &e.sha256,
            ManifestEntry::Legacy(s) => s,
        }
    }
}

impl Store {
    pub async fn get_manifest_entry(&self, manifest_key: &str) -> StoreResult<Option<ManifestEntry>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT entry FROM sync_manifest WHERE manifest_key = ?1")
                .bind(manifest_key)
                .fetch_optional(self.pool())
                .await?;
        let Some((raw,)) = row else {
            return Ok(None);
        };
        Ok(Some(parse_entry(&raw)))
    }

    /// Always writes the structured form, regardless of what was there
    /// before.
    pub async fn upsert_manifest_entry(
        &self,
        manifest_key: &str,
        entry: &StructuredManifestEntry,
    ) -> StoreResult<()> {
        let encoded =
            serde_json::to_string(entry).map_err(|e| crate::StoreError::Conflict(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO sync_manifest (manifest_key, entry) VALUES (?1, ?2)
            ON CONFLICT(manifest_key) DO UPDATE SET entry = excluded.entry
            "#,
        )
        .bind(manifest_key)
        .bind(encoded)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

fn parse_entry(raw: &str) -> ManifestEntry {
    match serde_json::from_str::<StructuredManifestEntry>(raw) {
        Ok(structured) => ManifestEntry::Structured(structured),
        Err(_) => ManifestEntry::Legacy(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn structured_round_trip() {
        let store = Store::open_in_memory().await.unwrap();
        let entry = StructuredManifestEntry {
            sha256: "abc123".into(),
            etag: Some("e1".into()),
            size: 10,
        };
        store.upsert_manifest_entry("acme/key.csv", &entry).await.unwrap();
        let fetched = store
            .get_manifest_entry("acme/key.csv")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.sha256(), "abc123");
        assert!(matches!(fetched, ManifestEntry::Structured(_)));
    }

    #[tokio::test]
    async fn legacy_bare_string_parses_as_legacy() {
        let store = Store::open_in_memory().await.unwrap();
        sqlx::query("INSERT INTO sync_manifest (manifest_key, entry) VALUES (?1, ?2)")
            .bind("acme/old.csv")
            .bind("deadbeef")
            .execute(store.pool())
            .await
            .unwrap();

        let fetched = store
            .get_manifest_entry("acme/old.csv")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.sha256(), "deadbeef");
        assert!(matches!(fetched, ManifestEntry::Legacy(_)));
    }
}
