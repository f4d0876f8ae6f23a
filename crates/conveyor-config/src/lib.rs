//! Configuration structs consumed by the core (spec.md §6). Loading these
//! from YAML, resolving secrets, etc. is explicitly out of scope (spec.md
//! §1) — this crate defines shape only, the way `mqk-config`'s
//! `LoadedConfig` is the shape its (in-scope, here out-of-scope) YAML loader
//! produces.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub s3: S3Config,
    pub run: RunConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Config {
    pub buckets: Vec<BucketConfig>,
    pub staging_dir: String,
    pub region: String,
    #[serde(default)]
    pub sync_limit: Option<i64>,
}

/// `bucketCfg = {name, bucket, prefix, tenant, purchaser}` (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub name: String,
    pub bucket: String,
    pub prefix: String,
    pub tenant: String,
    pub purchaser: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub concurrency: usize,
    pub requests_per_second: u32,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub checkpoint_path: String,
    #[serde(default)]
    pub skip_completed: bool,
}

impl Config {
    /// Bucket configs touching a given `(tenant, purchaser)` scope — used
    /// by the Run Coordinator to resolve which buckets a run's SYNC phase
    /// should visit (spec.md §4.3 step 4).
    pub fn buckets_for(
        &self,
        tenant: Option<&str>,
        purchaser: Option<&str>,
        pairs: &[conveyor_core::Pair],
    ) -> Vec<&BucketConfig> {
        if !pairs.is_empty() {
            return self
                .s3
                .buckets
                .iter()
                .filter(|b| {
                    pairs
                        .iter()
                        .any(|p| p.tenant == b.tenant && p.purchaser == b.purchaser)
                })
                .collect();
        }

        self.s3
            .buckets
            .iter()
            .filter(|b| {
                let tenant_ok = tenant.map_or(true, |t| t == b.tenant);
                let purchaser_ok = purchaser.map_or(true, |p| p == b.purchaser);
                tenant_ok && purchaser_ok
            })
            .collect()
    }

    /// `brand -> purchasers[]` map derived from the configured buckets, used
    /// by the Cron Dispatcher to expand `(brands, purchasers)` into a pair
    /// list (spec.md §4.6 step 1).
    pub fn purchasers_for_brand(&self, brand: &str) -> Vec<String> {
        self.s3
            .buckets
            .iter()
            .filter(|b| b.tenant == brand)
            .map(|b| b.purchaser.clone())
            .collect()
    }
}
