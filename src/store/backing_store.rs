use async_trait::async_trait;
use serde_json::Value;

use crate::config::StreamPosition;

// ============================================================================
// Backing Provider Abstraction
// ============================================================================
//
// The abstract put/query/describeStream/getShardIterator/getRecords/
// describeTable/createTable surface the specification calls the "backing
// provider". `ScyllaBackingStore` (the reference adapter) and
// `store::fake::FakeBackingStore` (used only by this crate's own tests)
// are the two implementations.
//
// ============================================================================

/// The composite key identifying a stored record, echoed onto CDC records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RecordKey {
    pub hash_key: String,
    pub range_key: String,
}

/// One row written by [`BackingStore::put`]. See specification §3.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredRecord {
    pub hash_key: String,
    pub range_key: String,
    pub data: Value,
    pub timestamp: i64,
    pub expires: i64,
}

impl StoredRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            hash_key: self.hash_key.clone(),
            range_key: self.range_key.clone(),
        }
    }
}

/// A change-data-capture record, as emitted from a shard.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CdcRecord {
    pub sequence_number: String,
    pub keys: RecordKey,
    pub new_image: Option<Value>,
    pub old_image: Option<Value>,
}

/// One partition of the change stream, discovered via `describe_stream`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shard {
    pub shard_id: String,
}

/// Opaque cursor into a shard, returned by `get_shard_iterator` and
/// advanced by `get_records`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardIterator(pub(crate) String);

/// Description of the table backing one stream, validated during bootstrap.
#[derive(Debug, Clone)]
pub struct TableDescription {
    pub hash_key_name: String,
    pub hash_key_type: AttributeType,
    pub range_key_name: String,
    pub range_key_type: AttributeType,
    pub stream_enabled: bool,
    pub table_active: bool,
}

/// Description of the TTL configuration, validated during bootstrap.
#[derive(Debug, Clone)]
pub struct TtlDescription {
    pub attribute_name: String,
    pub attribute_type: AttributeType,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Number,
}

/// Errors surfaced by a [`BackingStore`] implementation. Classified into
/// the specification's two-tier taxonomy via [`crate::utils::IsTransient`].
#[derive(Debug, thiserror::Error)]
pub enum BackingStoreError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("resource in use: {0}")]
    ResourceInUse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("connection refused")]
    ConnectionRefused,

    #[error("backing store error: {0}")]
    Other(#[from] anyhow::Error),
}

impl crate::utils::IsTransient for BackingStoreError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            BackingStoreError::ResourceNotFound(_)
                | BackingStoreError::ResourceInUse(_)
                | BackingStoreError::Validation(_)
                | BackingStoreError::ConnectionRefused
        )
    }
}

/// The abstract backing provider capability surface (specification §4.A).
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn put(&self, table_name: &str, record: &StoredRecord) -> Result<(), BackingStoreError>;

    async fn query(&self, table_name: &str, consistent_read: bool) -> Result<Vec<StoredRecord>, BackingStoreError>;

    async fn describe_table(&self, table_name: &str) -> Result<TableDescription, BackingStoreError>;

    async fn describe_ttl(&self, table_name: &str) -> Result<TtlDescription, BackingStoreError>;

    async fn create_table(&self, table_name: &str, hash_key: &str, range_key: &str) -> Result<(), BackingStoreError>;

    async fn update_ttl(&self, table_name: &str, ttl_attribute: &str) -> Result<(), BackingStoreError>;

    async fn describe_stream(&self, table_name: &str) -> Result<Vec<Shard>, BackingStoreError>;

    async fn get_shard_iterator(
        &self,
        table_name: &str,
        shard: &Shard,
        position: StreamPosition,
    ) -> Result<ShardIterator, BackingStoreError>;

    async fn get_records(
        &self,
        table_name: &str,
        iterator: &ShardIterator,
    ) -> Result<(Vec<CdcRecord>, Option<ShardIterator>), BackingStoreError>;
}
