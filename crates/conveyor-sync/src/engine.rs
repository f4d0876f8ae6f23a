use crate::events::SyncEvents;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use conveyor_config::BucketConfig;
use conveyor_core::traits::{ObjectListing, ObjectStoreClient, ObjectStoreError};
use conveyor_store::{ManifestEntry, Store, StoreError, StructuredManifestEntry};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(String),
}

/// Shared, cross-bucket download budget (spec.md §4.2 "Limit semantics").
/// `initial_limit <= 0` means unlimited: `limit_remaining` is then ignored.
#[derive(Clone)]
pub struct SyncOptions {
    pub limit_remaining: Option<Arc<AtomicI64>>,
    pub initial_limit: i64,
    pub already_extracted_paths: Arc<std::collections::HashSet<String>>,
}

impl SyncOptions {
    pub fn unlimited() -> Self {
        Self {
            limit_remaining: None,
            initial_limit: 0,
            already_extracted_paths: Arc::new(std::collections::HashSet::new()),
        }
    }

    fn limit_exhausted(&self) -> bool {
        self.limit_remaining
            .as_ref()
            .is_some_and(|r| r.load(Ordering::SeqCst) <= 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncedFile {
    pub relative_path: String,
    pub full_path: String,
    pub brand: String,
    pub purchaser: String,
    pub size: i64,
    pub etag: Option<String>,
    pub sha256: Option<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncBucketResult {
    pub brand: String,
    pub purchaser: String,
    pub synced: i64,
    pub skipped: i64,
    pub errors: i64,
    pub files: Vec<SyncedFile>,
}

enum SkipDecision {
    Skip { sha256: Option<String> },
    Download,
}

pub async fn sync_bucket(
    client: &dyn ObjectStoreClient,
    store: &Store,
    bucket_cfg: &BucketConfig,
    staging_dir: &str,
    options: &SyncOptions,
    events: &dyn SyncEvents,
) -> Result<SyncBucketResult, SyncError> {
    let objects = client.list(&bucket_cfg.bucket, &bucket_cfg.prefix).await?;
    let total_discovered = objects.len() as i64;

    let mut result = SyncBucketResult {
        brand: bucket_cfg.tenant.clone(),
        purchaser: bucket_cfg.purchaser.clone(),
        ..Default::default()
    };

    for object in objects {
        if options.limit_exhausted() {
            break;
        }

        let (dest_path, relative_path, manifest_key) =
            destination_for(bucket_cfg, staging_dir, &object);

        if options.already_extracted_paths.contains(&dest_path) {
            result.skipped += 1;
            let job = SyncedFile {
                relative_path,
                full_path: dest_path,
                brand: bucket_cfg.tenant.clone(),
                purchaser: bucket_cfg.purchaser.clone(),
                size: object.size,
                etag: Some(object.etag.clone()),
                sha256: None,
                synced_at: Utc::now(),
            };
            events.on_file_synced(&job);
            events.on_sync_skip_progress(result.skipped, result.synced + result.skipped + result.errors);
            result.files.push(job);
            emit_progress(events, options, &result, total_discovered);
            continue;
        }

        let decision = match decide_skip(store, &dest_path, &object, &manifest_key).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(key = %object.key, error = %e, "sync: skip decision failed");
                result.errors += 1;
                emit_progress(events, options, &result, total_discovered);
                continue;
            }
        };

        match decision {
            SkipDecision::Skip { sha256 } => {
                result.skipped += 1;
                let job = SyncedFile {
                    relative_path,
                    full_path: dest_path,
                    brand: bucket_cfg.tenant.clone(),
                    purchaser: bucket_cfg.purchaser.clone(),
                    size: object.size,
                    etag: Some(object.etag.clone()),
                    sha256,
                    synced_at: Utc::now(),
                };
                events.on_file_synced(&job);
                events.on_sync_skip_progress(result.skipped, result.synced + result.skipped + result.errors);
                result.files.push(job);
            }
            SkipDecision::Download => {
                events.on_start_download(&dest_path, &manifest_key);
                match download_and_hash(client, bucket_cfg, &object, &dest_path).await {
                    Ok(sha256) => {
                        store
                            .upsert_manifest_entry(
                                &manifest_key,
                                &StructuredManifestEntry {
                                    sha256: sha256.clone(),
                                    etag: Some(object.etag.clone()),
                                    size: object.size,
                                },
                            )
                            .await?;
                        if let Some(counter) = &options.limit_remaining {
                            counter.fetch_sub(1, Ordering::SeqCst);
                        }
                        result.synced += 1;
                        let job = SyncedFile {
                            relative_path,
                            full_path: dest_path,
                            brand: bucket_cfg.tenant.clone(),
                            purchaser: bucket_cfg.purchaser.clone(),
                            size: object.size,
                            etag: Some(object.etag.clone()),
                            sha256: Some(sha256),
                            synced_at: Utc::now(),
                        };
                        events.on_file_synced(&job);
                        result.files.push(job);
                    }
                    Err(e) => {
                        tracing::error!(key = %object.key, error = %e, "sync: download failed");
                        result.errors += 1;
                    }
                }
            }
        }

        emit_progress(events, options, &result, total_discovered);
    }

    Ok(result)
}

fn emit_progress(
    events: &dyn SyncEvents,
    options: &SyncOptions,
    result: &SyncBucketResult,
    total_discovered: i64,
) {
    let processed = result.synced + result.skipped + result.errors;
    let done = if options.initial_limit > 0 {
        let remaining = options
            .limit_remaining
            .as_ref()
            .map(|r| r.load(Ordering::SeqCst))
            .unwrap_or(0);
        options.initial_limit - remaining
    } else {
        processed
    };
    let total = done.max(if options.initial_limit > 0 {
        options.initial_limit
    } else {
        total_discovered
    });
    events.on_progress(done, total);
}

fn destination_for(
    bucket_cfg: &BucketConfig,
    staging_dir: &str,
    object: &ObjectListing,
) -> (String, String, String) {
    let key_after_prefix = object
        .key
        .strip_prefix(&bucket_cfg.prefix)
        .unwrap_or(&object.key)
        .trim_start_matches('/');
    let relative_path = conveyor_core::normalize_relative_path(&format!(
        "{}/{}/{}",
        bucket_cfg.tenant, bucket_cfg.purchaser, key_after_prefix
    ));
    let dest_path = format!("{staging_dir}/{relative_path}");
    let manifest_key = format!("{}/{}", bucket_cfg.tenant, object.key);
    (dest_path, relative_path, manifest_key)
}

async fn decide_skip(
    store: &Store,
    dest_path: &str,
    object: &ObjectListing,
    manifest_key: &str,
) -> Result<SkipDecision, SyncError> {
    let local_exists = tokio::fs::metadata(dest_path).await.is_ok();
    if !local_exists {
        return Ok(SkipDecision::Download);
    }

    match store.get_manifest_entry(manifest_key).await? {
        Some(ManifestEntry::Structured(entry)) => {
            let etag_matches = entry.etag.as_deref() == Some(object.etag.as_str());
            if etag_matches && entry.size == object.size {
                Ok(SkipDecision::Skip {
                    sha256: Some(entry.sha256),
                })
            } else {
                Ok(SkipDecision::Download)
            }
        }
        Some(ManifestEntry::Legacy(legacy_sha)) => {
            let actual = sha256_of_file(dest_path).await?;
            if actual == legacy_sha {
                Ok(SkipDecision::Skip {
                    sha256: Some(legacy_sha),
                })
            } else {
                Ok(SkipDecision::Download)
            }
        }
        None => {
            let metadata = tokio::fs::metadata(dest_path)
                .await
                .map_err(|e| SyncError::Io(e.to_string()))?;
            if metadata.len() as i64 != object.size {
                return Ok(SkipDecision::Download);
            }
            let sha256 = sha256_of_file(dest_path).await?;
            store
                .upsert_manifest_entry(
                    manifest_key,
                    &StructuredManifestEntry {
                        sha256: sha256.clone(),
                        etag: Some(object.etag.clone()),
                        size: object.size,
                    },
                )
                .await?;
            Ok(SkipDecision::Skip {
                sha256: Some(sha256),
            })
        }
    }
}

async fn sha256_of_file(path: &str) -> Result<String, SyncError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| SyncError::Io(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex_encode(&hasher.finalize()))
}

/// Lowercase hex encoding — small enough not to warrant a dependency.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

async fn download_and_hash(
    client: &dyn ObjectStoreClient,
    bucket_cfg: &BucketConfig,
    object: &ObjectListing,
    dest_path: &str,
) -> Result<String, SyncError> {
    let dest = Path::new(dest_path);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::Io(e.to_string()))?;
    }

    let temp_path: PathBuf = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .map_err(|e| SyncError::Io(e.to_string()))?;

    let mut stream = client.get(&bucket_cfg.bucket, &object.key).await?;
    let mut hasher = Sha256::new();

    use tokio::io::AsyncWriteExt;
    while let Some(chunk) = stream.next().await {
        let chunk: Bytes = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| SyncError::Io(e.to_string()))?;
    }
    file.sync_all().await.map_err(|e| SyncError::Io(e.to_string()))?;
    drop(file);

    tokio::fs::rename(&temp_path, dest)
        .await
        .map_err(|e| SyncError::Io(e.to_string()))?;

    Ok(hex_encode(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopSyncEvents;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct MockStore {
        objects: HashMap<String, (String, Vec<u8>)>, // key -> (etag, body)
    }

    #[async_trait]
    impl ObjectStoreClient for MockStore {
        async fn list(
            &self,
            _bucket: &str,
            prefix: &str,
        ) -> Result<Vec<ObjectListing>, ObjectStoreError> {
            Ok(self
                .objects
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, (etag, body))| ObjectListing {
                    key: k.clone(),
                    etag: etag.clone(),
                    size: body.len() as i64,
                })
                .collect())
        }

        async fn get(
            &self,
            _bucket: &str,
            key: &str,
        ) -> Result<futures_util::stream::BoxStream<'static, Result<Bytes, ObjectStoreError>>, ObjectStoreError>
        {
            let (_, body) = self
                .objects
                .get(key)
                .ok_or_else(|| ObjectStoreError::Get(format!("no such key {key}")))?;
            let body = Bytes::from(body.clone());
            Ok(Box::pin(futures_util::stream::once(async move { Ok(body) })))
        }
    }

    fn bucket_cfg() -> BucketConfig {
        BucketConfig {
            name: "acme-bucket".into(),
            bucket: "acme-bucket".into(),
            prefix: "raw/".into(),
            tenant: "acme".into(),
            purchaser: "p1".into(),
        }
    }

    #[tokio::test]
    async fn downloads_new_objects_and_records_manifest() {
        let store = Store::open_in_memory().await.unwrap();
        let staging = tempfile::tempdir().unwrap();
        let client = MockStore {
            objects: HashMap::from([("raw/a.csv".to_string(), ("e1".to_string(), b"hello".to_vec()))]),
        };

        let options = SyncOptions::unlimited();
        let result = sync_bucket(
            &client,
            &store,
            &bucket_cfg(),
            staging.path().to_str().unwrap(),
            &options,
            &NoopSyncEvents,
        )
        .await
        .unwrap();

        assert_eq!(result.synced, 1);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.errors, 0);
        assert_eq!(result.files.len(), 1);
        assert!(result.files[0].sha256.is_some());

        let manifest = store
            .get_manifest_entry("acme/raw/a.csv")
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(manifest, ManifestEntry::Structured(_)));
    }

    #[tokio::test]
    async fn rerun_with_unchanged_etag_skips_everything() {
        let store = Store::open_in_memory().await.unwrap();
        let staging = tempfile::tempdir().unwrap();
        let client = MockStore {
            objects: HashMap::from([("raw/a.csv".to_string(), ("e1".to_string(), b"hello".to_vec()))]),
        };
        let options = SyncOptions::unlimited();

        sync_bucket(
            &client,
            &store,
            &bucket_cfg(),
            staging.path().to_str().unwrap(),
            &options,
            &NoopSyncEvents,
        )
        .await
        .unwrap();

        let second = sync_bucket(
            &client,
            &store,
            &bucket_cfg(),
            staging.path().to_str().unwrap(),
            &options,
            &NoopSyncEvents,
        )
        .await
        .unwrap();

        assert_eq!(second.synced, 0);
        assert_eq!(second.errors, 0);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn download_limit_caps_new_downloads_only() {
        let store = Store::open_in_memory().await.unwrap();
        let staging = tempfile::tempdir().unwrap();
        let objects: HashMap<String, (String, Vec<u8>)> = (0..10)
            .map(|i| (format!("raw/f{i}.csv"), (format!("e{i}"), b"x".to_vec())))
            .collect();
        let client = MockStore { objects };

        let counter = Arc::new(AtomicI64::new(3));
        let options = SyncOptions {
            limit_remaining: Some(counter),
            initial_limit: 3,
            already_extracted_paths: Arc::new(std::collections::HashSet::new()),
        };

        let result = sync_bucket(
            &client,
            &store,
            &bucket_cfg(),
            staging.path().to_str().unwrap(),
            &options,
            &NoopSyncEvents,
        )
        .await
        .unwrap();

        assert_eq!(result.synced, 3);
        assert_eq!(result.skipped, 0);
    }
}
