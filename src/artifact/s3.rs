//! Amazon S3 artifact store.
//!
//! [`S3ArtifactStore`] maps [`ArtifactStore`] onto `PutObject`,
//! `GetObject`, paginated `ListObjectsV2`, `DeleteObjects`, and presigned
//! `GetObject` requests.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bulkcert::artifact::s3::S3ArtifactStore;
//!
//! # async fn example() {
//! let store = S3ArtifactStore::from_env("my-cert-bucket").await;
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;

use super::{ArtifactError, ArtifactStore};

/// `DeleteObjects` accepts at most this many keys per call.
const MAX_DELETE_BATCH: usize = 1000;

/// S3-backed [`ArtifactStore`] for one bucket.
#[derive(Debug, Clone)]
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
}

impl S3ArtifactStore {
    /// Creates a store with a pre-built S3 client.
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Creates a store from the standard AWS SDK config chain.
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), bucket)
    }
}

fn map_sdk_error(err: impl std::error::Error + Send + Sync + 'static, key: &str) -> ArtifactError {
    ArtifactError::Backend {
        message: format!("S3 error for key {key}: {err}"),
        source: Some(Box::new(err)),
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), ArtifactError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/zip")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ArtifactError> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| map_sdk_error(e, key))?;
                Ok(Some(data.into_bytes().to_vec()))
            },
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|service_err| service_err.is_no_such_key())
                {
                    return Ok(None);
                }
                Err(map_sdk_error(err, key))
            },
        }
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, ArtifactError> {
        let mut keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, prefix))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if !token.is_empty() => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, ArtifactError> {
        let mut deleted = 0;

        for batch in keys.chunks(MAX_DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| map_sdk_error(e, "<batch>"))?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| map_sdk_error(e, "<batch>"))?;

            let output = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "<batch>"))?;

            let failures = output.errors();
            if let Some(first) = failures.first() {
                return Err(ArtifactError::backend(format!(
                    "{} of {} deletes failed; first: {} ({})",
                    failures.len(),
                    batch.len(),
                    first.key().unwrap_or_default(),
                    first.message().unwrap_or_default()
                )));
            }
            deleted += batch.len();
        }

        Ok(deleted)
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, ArtifactError> {
        let config = PresigningConfig::expires_in(expires_in).map_err(|e| map_sdk_error(e, key))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(request.uri().to_string())
    }
}
