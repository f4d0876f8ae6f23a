//! S3-backed `ObjectStoreClient` (C2). One client is shared across every
//! configured bucket; `bucket`/`prefix` are per-call arguments, matching the
//! trait's shape rather than binding a client to a single bucket the way
//! `decision-gate-mcp`'s `S3ObjectStoreClient` does.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use bytes::Bytes;
use conveyor_core::traits::{ObjectListing, ObjectStoreClient, ObjectStoreError};
use futures_util::stream::{self, BoxStream};

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub async fn new(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let shared_config = loader.load().await;
        let client = aws_sdk_s3::Client::new(&shared_config);
        Self { client }
    }
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectListing>, ObjectStoreError> {
        let mut out = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token.clone() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ObjectStoreError::List(e.to_string()))?;

            for object in response.contents() {
                let key = match object.key() {
                    Some(k) => k.to_string(),
                    None => continue,
                };
                let etag = object
                    .e_tag()
                    .unwrap_or_default()
                    .trim_matches('"')
                    .to_string();
                let size = object.size().unwrap_or(0);
                out.push(ObjectListing { key, etag, size });
            }

            if response.is_truncated().unwrap_or(false) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(out)
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, ObjectStoreError>>, ObjectStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Get(e.to_string()))?;

        let stream = stream::unfold(output.body, |mut body| async move {
            let item = body.next().await?;
            Some((item.map_err(|e| ObjectStoreError::Get(e.to_string())), body))
        });
        Ok(Box::pin(stream))
    }
}
