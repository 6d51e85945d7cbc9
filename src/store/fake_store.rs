use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::StreamPosition;

use super::backing_store::{
    AttributeType, BackingStore, BackingStoreError, CdcRecord, RecordKey, Shard, ShardIterator,
    StoredRecord, TableDescription, TtlDescription,
};

// ============================================================================
// In-Memory Fake Backing Store
// ============================================================================
//
// Stands in for the vendor adapter in this crate's own tests. The
// Docker-based integration suite that would exercise a real ScyllaDB
// instance is explicitly out of scope (specification §1); these tests
// certify the orchestration logic in provider/cdc/pipeline/subject, which
// this fake is sufficient for.
//
// ============================================================================

#[derive(Default)]
struct FakeState {
    tables: HashMap<String, Vec<StoredRecord>>,
    bootstrapped: std::collections::HashSet<String>,
    cdc_log: HashMap<String, Vec<CdcRecord>>,
    shards: HashMap<String, Vec<Shard>>,
    fail_query_until_attempt: HashMap<String, u32>,
    query_attempts: HashMap<String, u32>,
}

pub struct FakeBackingStore {
    state: Mutex<FakeState>,
    hash_key: String,
    range_key: String,
    ttl_attribute: String,
}

impl FakeBackingStore {
    pub fn new(hash_key: &str, range_key: &str, ttl_attribute: &str) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            hash_key: hash_key.to_string(),
            range_key: range_key.to_string(),
            ttl_attribute: ttl_attribute.to_string(),
        }
    }

    /// Seed a shard list that `describe_stream` should return, simulating
    /// the vendor's own discovery of new shards over time.
    pub fn set_shards(&self, table_name: &str, shards: Vec<Shard>) {
        self.state.lock().unwrap().shards.insert(table_name.to_string(), shards);
    }

    /// Push a synthetic CDC record for a shard, as if it had been produced
    /// by a put against that table.
    pub fn push_cdc_record(&self, table_name: &str, record: CdcRecord) {
        self.state
            .lock()
            .unwrap()
            .cdc_log
            .entry(table_name.to_string())
            .or_default()
            .push(record);
    }

    /// Make the table permanently absent, so bootstrap sees
    /// `ResourceNotFound` on every describe.
    pub fn table_exists(&self, table_name: &str) -> bool {
        self.state.lock().unwrap().bootstrapped.contains(table_name)
    }
}

#[async_trait]
impl BackingStore for FakeBackingStore {
    async fn put(&self, table_name: &str, record: &StoredRecord) -> Result<(), BackingStoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.bootstrapped.contains(table_name) {
            return Err(BackingStoreError::ResourceNotFound(table_name.to_string()));
        }

        state.tables.entry(table_name.to_string()).or_default().push(record.clone());
        state.cdc_log.entry(table_name.to_string()).or_default().push(CdcRecord {
            sequence_number: format!("{}-{}", table_name, state.tables[table_name].len()),
            keys: record.key(),
            new_image: Some(record.data.clone()),
            old_image: None,
        });
        Ok(())
    }

    async fn query(&self, table_name: &str, _consistent_read: bool) -> Result<Vec<StoredRecord>, BackingStoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.bootstrapped.contains(table_name) {
            return Err(BackingStoreError::ResourceNotFound(table_name.to_string()));
        }

        let attempt = state.query_attempts.entry(table_name.to_string()).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;

        if let Some(threshold) = state.fail_query_until_attempt.get(table_name) {
            if attempt < *threshold {
                return Ok(Vec::new());
            }
        }

        Ok(state.tables.get(table_name).cloned().unwrap_or_default())
    }

    async fn describe_table(&self, table_name: &str) -> Result<TableDescription, BackingStoreError> {
        let state = self.state.lock().unwrap();
        if !state.bootstrapped.contains(table_name) {
            return Err(BackingStoreError::ResourceNotFound(table_name.to_string()));
        }

        Ok(TableDescription {
            hash_key_name: self.hash_key.clone(),
            hash_key_type: AttributeType::String,
            range_key_name: self.range_key.clone(),
            range_key_type: AttributeType::String,
            stream_enabled: true,
            table_active: true,
        })
    }

    async fn describe_ttl(&self, table_name: &str) -> Result<TtlDescription, BackingStoreError> {
        let state = self.state.lock().unwrap();
        if !state.bootstrapped.contains(table_name) {
            return Err(BackingStoreError::ResourceNotFound(table_name.to_string()));
        }

        Ok(TtlDescription {
            attribute_name: self.ttl_attribute.clone(),
            attribute_type: AttributeType::Number,
            enabled: true,
        })
    }

    async fn create_table(&self, table_name: &str, _hash_key: &str, _range_key: &str) -> Result<(), BackingStoreError> {
        let mut state = self.state.lock().unwrap();
        state.bootstrapped.insert(table_name.to_string());
        state.tables.entry(table_name.to_string()).or_default();
        Ok(())
    }

    async fn update_ttl(&self, _table_name: &str, _ttl_attribute: &str) -> Result<(), BackingStoreError> {
        Ok(())
    }

    async fn describe_stream(&self, table_name: &str) -> Result<Vec<Shard>, BackingStoreError> {
        Ok(self.state.lock().unwrap().shards.get(table_name).cloned().unwrap_or_default())
    }

    async fn get_shard_iterator(
        &self,
        table_name: &str,
        shard: &Shard,
        position: StreamPosition,
    ) -> Result<ShardIterator, BackingStoreError> {
        let state = self.state.lock().unwrap();
        let records = state.cdc_log.get(table_name).cloned().unwrap_or_default();

        let offset = match position {
            StreamPosition::Earliest => 0,
            StreamPosition::Latest => records
                .iter()
                .filter(|r| shard_of(&r.keys) == shard.shard_id)
                .count(),
        };

        Ok(ShardIterator(format!("{}#{}", shard.shard_id, offset)))
    }

    async fn get_records(
        &self,
        table_name: &str,
        iterator: &ShardIterator,
    ) -> Result<(Vec<CdcRecord>, Option<ShardIterator>), BackingStoreError> {
        let (shard_id, offset) = iterator
            .0
            .split_once('#')
            .ok_or_else(|| BackingStoreError::Other(anyhow::anyhow!("malformed iterator")))?;
        let offset: usize = offset.parse().unwrap_or(0);

        let state = self.state.lock().unwrap();
        let all = state.cdc_log.get(table_name).cloned().unwrap_or_default();
        let matching: Vec<_> = all.into_iter().filter(|r| shard_of(&r.keys) == shard_id).collect();

        let new_records: Vec<_> = matching.iter().skip(offset).cloned().collect();
        let next_offset = offset + new_records.len();

        Ok((new_records, Some(ShardIterator(format!("{shard_id}#{next_offset}")))))
    }
}

/// The fake assigns records to shards deterministically by hashing the
/// hash key, so tests can seed multiple shards without a real CDC log.
fn shard_of(keys: &RecordKey) -> String {
    let mut hash: u32 = 0;
    for byte in keys.hash_key.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u32);
    }
    format!("shard-{}", hash % 2)
}

#[cfg(test)]
impl FakeBackingStore {
    pub fn fail_query_until(&self, table_name: &str, attempt: u32) {
        self.state
            .lock()
            .unwrap()
            .fail_query_until_attempt
            .insert(table_name.to_string(), attempt);
    }
}
