use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use scylla::client::session::Session;
use scylla::statement::Consistency;
use scylla::value::CqlTimeuuid;
use uuid::Uuid;

use crate::config::StreamPosition;
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

use super::backing_store::{
    AttributeType, BackingStore, BackingStoreError, CdcRecord, RecordKey, Shard, ShardIterator,
    StoredRecord, TableDescription, TtlDescription,
};

// ============================================================================
// ScyllaDB Backing Store Adapter
// ============================================================================
//
// Reference implementation of the abstract backing provider. Stored
// records live in a plain CQL table; the change stream is ScyllaDB's own
// CDC log table, which the driver creates automatically as
// `<table>_scylla_cdc_log` once `cdc = {'enabled': true}` is set. That log
// table is already shard-shaped — partitioned by `cdc$stream_id`,
// clustered by `cdc$time` — so shard discovery and per-shard iteration
// (components C and D) are implemented here as plain CQL, not by pulling
// in the `scylla-cdc` crate's own generation-fetching reader.
//
// ============================================================================

pub struct ScyllaBackingStore {
    session: Arc<Session>,
    circuit_breaker: CircuitBreaker,
    hash_key: String,
    range_key: String,
    ttl_attribute: String,
    metrics: Option<Arc<Metrics>>,
}

impl ScyllaBackingStore {
    pub fn new(session: Arc<Session>, hash_key: &str, range_key: &str, ttl_attribute: &str) -> Self {
        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: std::time::Duration::from_secs(30),
            success_threshold: 2,
        };

        Self {
            session,
            circuit_breaker: CircuitBreaker::new(cb_config),
            hash_key: hash_key.to_string(),
            range_key: range_key.to_string(),
            ttl_attribute: ttl_attribute.to_string(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn cdc_log_table(table_name: &str) -> String {
        format!("{table_name}_scylla_cdc_log")
    }

    async fn run<T, F>(&self, op: F) -> Result<T, BackingStoreError>
    where
        F: std::future::Future<Output = Result<T, anyhow::Error>>,
    {
        let before = self.circuit_breaker.get_state().await;

        let result = self.circuit_breaker.call(op).await.map_err(|e| match e {
            CircuitBreakerError::CircuitOpen => BackingStoreError::Other(anyhow::anyhow!("circuit breaker open for backing store")),
            CircuitBreakerError::OperationFailed(err) => classify(err),
        });

        if let Some(metrics) = &self.metrics {
            let after = self.circuit_breaker.get_state().await;
            metrics.update_circuit_breaker_state(circuit_state_code(after));
            if after != before {
                metrics.record_circuit_breaker_transition(circuit_state_name(before), circuit_state_name(after));
            }
        }

        result
    }
}

fn circuit_state_code(state: CircuitState) -> u8 {
    match state {
        CircuitState::Closed => 0,
        CircuitState::Open => 1,
        CircuitState::HalfOpen => 2,
    }
}

fn circuit_state_name(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    }
}

fn classify(err: anyhow::Error) -> BackingStoreError {
    let msg = err.to_string();
    if msg.contains("ResourceNotFound") || msg.contains("does not exist") {
        BackingStoreError::ResourceNotFound(msg)
    } else if msg.contains("ResourceInUse") || msg.contains("already exists") {
        BackingStoreError::ResourceInUse(msg)
    } else if msg.contains("ConnectionRefused") || msg.contains("connection refused") {
        BackingStoreError::ConnectionRefused
    } else {
        BackingStoreError::Other(err)
    }
}

#[async_trait]
impl BackingStore for ScyllaBackingStore {
    async fn put(&self, table_name: &str, record: &StoredRecord) -> Result<(), BackingStoreError> {
        let session = self.session.clone();
        let table_name = table_name.to_string();
        let record = record.clone();
        let hash_key = self.hash_key.clone();
        let range_key = self.range_key.clone();
        let ttl_attribute = self.ttl_attribute.clone();

        self.run(async move {
            let cql = format!(
                "INSERT INTO {table_name} ({hash_key}, {range_key}, data, timestamp, {ttl_attribute}) VALUES (?, ?, ?, ?, ?)"
            );
            let data_json = serde_json::to_string(&record.data)?;

            session
                .query_unpaged(cql, (record.hash_key, record.range_key, data_json, record.timestamp, record.expires))
                .await?;

            tracing::debug!(table = %table_name, "wrote record to backing store");
            Ok(())
        })
        .await
    }

    async fn query(&self, table_name: &str, consistent_read: bool) -> Result<Vec<StoredRecord>, BackingStoreError> {
        let session = self.session.clone();
        let table_name = table_name.to_string();
        let hash_key = self.hash_key.clone();
        let range_key = self.range_key.clone();
        let ttl_attribute = self.ttl_attribute.clone();

        self.run(async move {
            let mut statement = scylla::statement::unprepared::Statement::new(format!(
                "SELECT {hash_key}, {range_key}, data, timestamp, {ttl_attribute} FROM {table_name}"
            ));
            statement.set_consistency(if consistent_read {
                Consistency::Quorum
            } else {
                Consistency::One
            });

            let result = session.query_unpaged(statement, &[]).await?;
            let rows_result = match result.into_rows_result() {
                Ok(rows) => rows,
                Err(_) => return Ok(Vec::new()),
            };

            let mut records = Vec::new();
            for row in rows_result.rows::<(String, String, String, i64, i64)>()? {
                let (hash_key, range_key, data_json, timestamp, expires) = row?;
                records.push(StoredRecord {
                    hash_key,
                    range_key,
                    data: serde_json::from_str(&data_json)?,
                    timestamp,
                    expires,
                });
            }

            Ok(records)
        })
        .await
    }

    async fn describe_table(&self, table_name: &str) -> Result<TableDescription, BackingStoreError> {
        let session = self.session.clone();
        let table_name = table_name.to_string();
        let hash_key = self.hash_key.clone();
        let range_key = self.range_key.clone();

        self.run(async move {
            let result = session
                .query_unpaged(
                    "SELECT column_name, type, kind FROM system_schema.columns WHERE table_name = ? ALLOW FILTERING",
                    (table_name.clone(),),
                )
                .await?;

            let rows_result = result
                .into_rows_result()
                .map_err(|_| anyhow::anyhow!("ResourceNotFound: table {table_name} has no schema"))?;

            let mut hash_key_type = None;
            let mut range_key_type = None;

            for row in rows_result.rows::<(String, String, String)>()? {
                let (column_name, cql_type, kind) = row?;
                if kind == "partition_key" && column_name == hash_key {
                    hash_key_type = Some(cql_type);
                } else if kind == "clustering" && column_name == range_key {
                    range_key_type = Some(cql_type);
                }
            }

            let (hash_key_type, range_key_type) = match (hash_key_type, range_key_type) {
                (Some(h), Some(r)) => (h, r),
                _ => anyhow::bail!("ResourceNotFound: table {table_name} missing expected key columns"),
            };

            Ok(TableDescription {
                hash_key_name: hash_key,
                hash_key_type: cql_attribute_type(&hash_key_type),
                range_key_name: range_key,
                range_key_type: cql_attribute_type(&range_key_type),
                stream_enabled: true,
                table_active: true,
            })
        })
        .await
    }

    async fn describe_ttl(&self, table_name: &str) -> Result<TtlDescription, BackingStoreError> {
        let session = self.session.clone();
        let table_name = table_name.to_string();
        let ttl_attribute = self.ttl_attribute.clone();

        self.run(async move {
            let result = session
                .query_unpaged(
                    "SELECT column_name, type FROM system_schema.columns WHERE table_name = ? ALLOW FILTERING",
                    (table_name.clone(),),
                )
                .await?;

            let rows_result = result
                .into_rows_result()
                .map_err(|_| anyhow::anyhow!("ResourceNotFound: table {table_name} has no schema"))?;

            for row in rows_result.rows::<(String, String)>()? {
                let (column_name, cql_type) = row?;
                if column_name == ttl_attribute {
                    return Ok(TtlDescription {
                        attribute_name: ttl_attribute,
                        attribute_type: cql_attribute_type(&cql_type),
                        enabled: true,
                    });
                }
            }

            anyhow::bail!("ResourceNotFound: ttl attribute {ttl_attribute} not found on {table_name}")
        })
        .await
    }

    async fn create_table(&self, table_name: &str, hash_key: &str, range_key: &str) -> Result<(), BackingStoreError> {
        let session = self.session.clone();
        let table_name = table_name.to_string();
        let hash_key = hash_key.to_string();
        let range_key = range_key.to_string();
        let ttl_attribute = self.ttl_attribute.clone();

        self.run(async move {
            let cql = format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (\
                    {hash_key} text, \
                    {range_key} text, \
                    data text, \
                    timestamp bigint, \
                    {ttl_attribute} bigint, \
                    PRIMARY KEY ({hash_key}, {range_key})\
                ) WITH cdc = {{'enabled': true, 'preimage': false, 'postimage': true}}"
            );

            session.query_unpaged(cql, &[]).await?;
            tracing::info!(table = %table_name, "created backing table with cdc enabled");
            Ok(())
        })
        .await
    }

    async fn update_ttl(&self, _table_name: &str, _ttl_attribute: &str) -> Result<(), BackingStoreError> {
        // The expires column's presence and type (validated by describe_ttl)
        // is the TTL attribute descriptor for this adapter; there is no
        // separate enable/disable call to make.
        Ok(())
    }

    async fn describe_stream(&self, table_name: &str) -> Result<Vec<Shard>, BackingStoreError> {
        let session = self.session.clone();
        let log_table = Self::cdc_log_table(table_name);

        self.run(async move {
            let result = session
                .query_unpaged(format!("SELECT DISTINCT \"cdc$stream_id\" FROM {log_table}"), &[])
                .await?;

            let rows_result = match result.into_rows_result() {
                Ok(rows) => rows,
                Err(_) => return Ok(Vec::new()),
            };

            let mut shards = Vec::new();
            for row in rows_result.rows::<(Vec<u8>,)>()? {
                let (stream_id,) = row?;
                shards.push(Shard {
                    shard_id: encode_hex(&stream_id),
                });
            }

            Ok(shards)
        })
        .await
    }

    async fn get_shard_iterator(
        &self,
        _table_name: &str,
        shard: &Shard,
        position: StreamPosition,
    ) -> Result<ShardIterator, BackingStoreError> {
        let cursor = match position {
            StreamPosition::Earliest => CqlTimeuuid::from(Uuid::nil()),
            StreamPosition::Latest => CqlTimeuuid::from(Uuid::now_v7()),
        };

        Ok(ShardIterator(format!("{}:{cursor}", shard.shard_id)))
    }

    async fn get_records(
        &self,
        table_name: &str,
        iterator: &ShardIterator,
    ) -> Result<(Vec<CdcRecord>, Option<ShardIterator>), BackingStoreError> {
        let session = self.session.clone();
        let log_table = Self::cdc_log_table(table_name);
        let hash_key = self.hash_key.clone();
        let range_key = self.range_key.clone();

        let (shard_id, cursor) = iterator
            .0
            .split_once(':')
            .ok_or_else(|| BackingStoreError::Other(anyhow::anyhow!("malformed shard iterator")))?;
        let shard_id = shard_id.to_string();
        let cursor = cursor.to_string();

        self.run(async move {
            let stream_id = decode_hex(&shard_id)?;
            let last_seen = CqlTimeuuid::from_str(&cursor).map_err(|e| anyhow::anyhow!("invalid shard iterator: {e}"))?;

            let cql = format!(
                "SELECT \"cdc$time\", {hash_key}, {range_key}, data FROM {log_table} \
                 WHERE \"cdc$stream_id\" = ? AND \"cdc$time\" > ? \
                 ORDER BY \"cdc$time\" ASC LIMIT 1000"
            );

            let result = session.query_unpaged(cql, (stream_id, last_seen)).await?;

            let rows_result = match result.into_rows_result() {
                Ok(rows) => rows,
                Err(_) => return Ok((Vec::new(), Some(ShardIterator(format!("{shard_id}:{cursor}"))))),
            };

            let mut records = Vec::new();
            let mut newest = last_seen;

            for row in rows_result.rows::<(CqlTimeuuid, Option<String>, Option<String>, Option<String>)>()? {
                let (cdc_time, hk, rk, data) = row?;
                if cdc_time > newest {
                    newest = cdc_time;
                }

                let (Some(hk), Some(rk)) = (hk, rk) else {
                    continue;
                };

                records.push(CdcRecord {
                    sequence_number: cdc_time.to_string(),
                    keys: RecordKey { hash_key: hk, range_key: rk },
                    new_image: data.map(|d| serde_json::from_str(&d)).transpose()?,
                    old_image: None,
                });
            }

            Ok((records, Some(ShardIterator(format!("{shard_id}:{newest}")))))
        })
        .await
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex(hex: &str) -> anyhow::Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        anyhow::bail!("odd-length shard id");
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| anyhow::anyhow!("invalid shard id: {e}")))
        .collect()
}

fn cql_attribute_type(cql_type: &str) -> AttributeType {
    match cql_type {
        "bigint" | "int" | "varint" | "counter" | "double" | "float" => AttributeType::Number,
        _ => AttributeType::String,
    }
}

/// Best-effort TTL reaper for the in-process adapter. ScyllaDB does not
/// enforce this crate's ttl attribute column natively (that requires
/// native per-write `USING TTL`), so eviction here is a periodic sweep —
/// lagging and best-effort, exactly as the specification describes.
pub async fn sweep_expired(
    session: &Session,
    table_name: &str,
    hash_key: &str,
    range_key: &str,
    ttl_attribute: &str,
) -> anyhow::Result<u64> {
    let now = Utc::now().timestamp();
    let cql = format!("SELECT {hash_key}, {range_key} FROM {table_name} WHERE {ttl_attribute} < ? ALLOW FILTERING");
    let result = session.query_unpaged(cql, (now,)).await?;

    let rows_result = match result.into_rows_result() {
        Ok(rows) => rows,
        Err(_) => return Ok(0),
    };

    let mut deleted = 0u64;
    for row in rows_result.rows::<(String, String)>()? {
        let (hk, rk) = row?;
        session
            .query_unpaged(
                format!("DELETE FROM {table_name} WHERE {hash_key} = ? AND {range_key} = ?"),
                (hk, rk),
            )
            .await?;
        deleted += 1;
    }

    if deleted > 0 {
        tracing::debug!(table = %table_name, deleted, "evicted expired records");
    }

    Ok(deleted)
}
