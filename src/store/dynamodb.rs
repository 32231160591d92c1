//! DynamoDB storage backend for chunk records.
//!
//! [`DynamoDbBackend`] implements [`StorageBackend`] with `GetItem`,
//! `PutItem`, and a paginated `Query` for `list_by_prefix`.
//!
//! # Single-Table Design
//!
//! | Attribute | Type   | Description                               |
//! |-----------|--------|-------------------------------------------|
//! | `PK`      | String | Partition key: `TASK#<task_id>`           |
//! | `SK`      | String | Sort key: `CHUNK#<chunk_id, 8 digits>`    |
//! | `data`    | String | Serialized `ChunkRecord` JSON             |
//!
//! All chunks of a task share a partition, so the status query is a single
//! partition `Query` with no sort-key filter. Zero-padding keeps the sort key
//! in chunk order.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bulkcert::store::dynamodb::DynamoDbBackend;
//! use bulkcert::store::generic::ChunkStore;
//!
//! # async fn example() {
//! let backend = DynamoDbBackend::from_env_with_table("bulkcert_chunks").await;
//! let store = ChunkStore::new(backend);
//! # }
//! ```

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;

use crate::store::backend::{make_key, parse_key, StorageBackend, StorageError};

/// DynamoDB storage backend for chunk records.
#[derive(Debug, Clone)]
pub struct DynamoDbBackend {
    client: Client,
    table_name: String,
}

impl DynamoDbBackend {
    /// Creates a backend with a pre-built DynamoDB client.
    ///
    /// The table must already exist with `PK` (String, partition key) and
    /// `SK` (String, sort key).
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Creates a backend from the standard AWS SDK config chain with the
    /// given table name.
    pub async fn from_env_with_table(table_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), table_name)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn make_pk(task_id: &str) -> String {
    format!("TASK#{task_id}")
}

fn make_sk(chunk_id: u32) -> String {
    format!("CHUNK#{chunk_id:08}")
}

fn parse_pk(pk: &str) -> Option<&str> {
    pk.strip_prefix("TASK#")
}

fn parse_sk(sk: &str) -> Option<u32> {
    sk.strip_prefix("CHUNK#")?.parse().ok()
}

/// Splits a composite `{task_id}:{chunk_id}` key into `(PK, SK)`.
fn split_key(key: &str) -> Result<(String, String), StorageError> {
    let (task_id, chunk_id) = parse_key(key)
        .ok_or_else(|| StorageError::backend(format!("invalid key format: {key}")))?;
    Ok((make_pk(task_id), make_sk(chunk_id)))
}

/// Turns a `{task_id}:` prefix into the partition key to query.
fn split_prefix(prefix: &str) -> Result<String, StorageError> {
    let task_id = prefix.strip_suffix(':').ok_or_else(|| {
        StorageError::backend(format!(
            "invalid prefix format (missing trailing ':'): {prefix}"
        ))
    })?;
    Ok(make_pk(task_id))
}

fn map_sdk_error(err: impl std::error::Error + Send + Sync + 'static, key: &str) -> StorageError {
    StorageError::Backend {
        message: format!("DynamoDB error for key {key}: {err}"),
        source: Some(Box::new(err)),
    }
}

// ---------------------------------------------------------------------------
// StorageBackend implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl StorageBackend for DynamoDbBackend {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let (pk, sk) = split_key(key)?;

        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(pk))
            .key("SK", AttributeValue::S(sk))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let item = result.item().ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;

        let data = item
            .get("data")
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| {
                StorageError::backend(format!("missing or invalid data attribute for key {key}"))
            })?;

        Ok(data.as_bytes().to_vec())
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let (pk, sk) = split_key(key)?;
        let data_str = std::str::from_utf8(data).map_err(|e| StorageError::Backend {
            message: format!("data is not valid UTF-8: {e}"),
            source: Some(Box::new(e)),
        })?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .item("PK", AttributeValue::S(pk))
            .item("SK", AttributeValue::S(sk))
            .item("data", AttributeValue::S(data_str.to_string()))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let pk = split_prefix(prefix)?;

        let mut results = Vec::new();
        let mut exclusive_start_key = None;

        loop {
            let mut query = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("PK = :pk")
                .expression_attribute_values(":pk", AttributeValue::S(pk.clone()))
                .consistent_read(true);

            if let Some(start_key) = exclusive_start_key.take() {
                query = query.set_exclusive_start_key(Some(start_key));
            }

            let output = query.send().await.map_err(|e| map_sdk_error(e, prefix))?;

            for item in output.items() {
                let task_id = item
                    .get("PK")
                    .and_then(|v: &AttributeValue| v.as_s().ok())
                    .and_then(|pk| parse_pk(pk));
                let chunk_id = item
                    .get("SK")
                    .and_then(|v: &AttributeValue| v.as_s().ok())
                    .and_then(|sk| parse_sk(sk));
                let data = item.get("data").and_then(|v: &AttributeValue| v.as_s().ok());

                match (task_id, chunk_id, data) {
                    (Some(task_id), Some(chunk_id), Some(data)) => {
                        results.push((make_key(task_id, chunk_id), data.as_bytes().to_vec()));
                    },
                    _ => {
                        tracing::warn!(prefix = prefix, "skipping malformed chunk item");
                    },
                }
            }

            match output.last_evaluated_key() {
                Some(last_key) if !last_key.is_empty() => {
                    exclusive_start_key = Some(last_key.clone());
                },
                _ => break,
            }
        }

        Ok(results)
    }
}
