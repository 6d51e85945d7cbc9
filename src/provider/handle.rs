use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cdc::{RecordStream, ShardMultiplexer};
use crate::config::{StreamPosition, DEFAULT_TTL_SECONDS};
use crate::metrics::Metrics;
use crate::pipeline::Matcher;
use crate::store::{BackingStore, CdcRecord, Shard, StoredRecord};

use super::errors::ProviderError;

/// The handle returned by [`crate::provider::obtain_provider`]. Shared by
/// every [`crate::subject::CloudSubject`] bound to the same `streamId`
/// (specification §4.B — "singleton-per-id").
pub struct Provider {
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) table_name: String,
    pub(crate) abort_signal: CancellationToken,
    multiplexer: Arc<ShardMultiplexer>,
    metrics: Option<Arc<Metrics>>,
}

impl Provider {
    pub(crate) fn new(
        store: Arc<dyn BackingStore>,
        table_name: String,
        poll_interval: std::time::Duration,
        abort_signal: CancellationToken,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let multiplexer = ShardMultiplexer::spawn(
            store.clone(),
            table_name.clone(),
            poll_interval,
            abort_signal.clone(),
            metrics.clone(),
        );

        Self {
            store,
            table_name,
            abort_signal,
            multiplexer: Arc::new(multiplexer),
            metrics,
        }
    }

    /// Shared metrics registry, if this provider was configured with one.
    pub(crate) fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Writes `value` as a fresh record (specification §3) and returns a
    /// [`Matcher`] correlating it to its eventual CDC echo.
    pub async fn store(&self, value: Value) -> Result<(StoredRecord, Matcher), ProviderError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let timestamp_ms = now.as_millis() as i64;

        let record = StoredRecord {
            hash_key: format!("item-{timestamp_ms}"),
            range_key: timestamp_ms.to_string(),
            data: value,
            timestamp: timestamp_ms,
            expires: now.as_secs() as i64 + DEFAULT_TTL_SECONDS,
        };

        self.store.put(&self.table_name, &record).await?;

        let key = record.key();
        let matcher = Matcher::new(move |cdc: &CdcRecord| cdc.keys == key);

        Ok((record, matcher))
    }

    /// Reads back every currently-stored record for this stream. Used by
    /// `weak`-consistency verification and by
    /// `CloudSubject::subscribe`'s replay path.
    pub(crate) async fn query(&self, consistent_read: bool) -> Result<Vec<StoredRecord>, ProviderError> {
        Ok(self.store.query(&self.table_name, consistent_read).await?)
    }

    /// The shared, deduplicated shard sequence (component C).
    pub fn shards(&self) -> impl Stream<Item = Shard> + Send + 'static {
        self.multiplexer.subscribe()
    }

    /// A dedicated per-shard CDC record pipeline (component D).
    pub fn stream(&self, position: StreamPosition) -> RecordStream {
        RecordStream::new(
            self.store.clone(),
            self.table_name.clone(),
            self.multiplexer.clone(),
            position,
            self.abort_signal.clone(),
            self.metrics.clone(),
        )
    }

    /// Unwraps a CDC record's new image into caller data plus its
    /// sequence number.
    pub fn unmarshal<T: DeserializeOwned>(&self, record: &CdcRecord) -> Result<Unmarshalled<T>, ProviderError> {
        let image = record
            .new_image
            .clone()
            .ok_or_else(|| ProviderError::Unknown(anyhow::anyhow!("cdc record has no new image")))?;

        let data = serde_json::from_value(image).map_err(|e| ProviderError::Unknown(e.into()))?;

        Ok(Unmarshalled {
            data,
            sequence_number: record.sequence_number.clone(),
        })
    }
}

pub struct Unmarshalled<T> {
    pub data: T,
    pub sequence_number: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake_store::FakeBackingStore;
    use serde_json::json;

    async fn bootstrapped_fake() -> Arc<FakeBackingStore> {
        let store = Arc::new(FakeBackingStore::new("hashKey", "rangeKey", "expires"));
        store.create_table("t1", "hashKey", "rangeKey").await.unwrap();
        store
    }

    #[tokio::test]
    async fn store_then_query_round_trips_the_value() {
        let store = bootstrapped_fake().await;
        let provider = Provider::new(store, "t1".to_string(), std::time::Duration::from_secs(5), CancellationToken::new(), None);

        let (record, matcher) = provider.store(json!({"x": 1})).await.unwrap();
        assert_eq!(record.data, json!({"x": 1}));

        let rows = provider.query(true).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key(), record.key());

        let cdc = CdcRecord {
            sequence_number: "1".to_string(),
            keys: record.key(),
            new_image: Some(record.data.clone()),
            old_image: None,
        };
        assert!(matcher.matches(&cdc));
    }

    #[tokio::test]
    async fn unmarshal_recovers_data_and_sequence_number() {
        let store = bootstrapped_fake().await;
        let provider = Provider::new(store, "t1".to_string(), std::time::Duration::from_secs(5), CancellationToken::new(), None);

        let cdc = CdcRecord {
            sequence_number: "42".to_string(),
            keys: crate::store::RecordKey { hash_key: "item-1".to_string(), range_key: "1".to_string() },
            new_image: Some(json!({"y": 2})),
            old_image: None,
        };

        let unmarshalled: Unmarshalled<serde_json::Value> = provider.unmarshal(&cdc).unwrap();
        assert_eq!(unmarshalled.data, json!({"y": 2}));
        assert_eq!(unmarshalled.sequence_number, "42");
    }
}
