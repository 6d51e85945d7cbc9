use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::StreamPosition;
use crate::metrics::Metrics;
use crate::provider::ProviderError;
use crate::store::{BackingStore, CdcRecord, Shard, ShardIterator};

use super::shard_multiplexer::ShardMultiplexer;

const IDLE_BACKOFF: Duration = Duration::from_millis(100);

/// Per-subscriber CDC pipeline (component D): one task per shard
/// discovered by the shared multiplexer, each looping
/// `getRecords`/re-enqueue with adaptive idle backoff, all funneling into
/// one ordered-per-shard, unordered-across-shards channel.
pub struct RecordStream {
    receiver: mpsc::Receiver<Result<CdcRecord, ProviderError>>,
    _dispatch_task: tokio::task::JoinHandle<()>,
}

impl RecordStream {
    pub(crate) fn new(
        store: Arc<dyn BackingStore>,
        table_name: String,
        multiplexer: Arc<ShardMultiplexer>,
        position: StreamPosition,
        abort_signal: CancellationToken,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(256);

        let dispatch_task = tokio::spawn(dispatch_shards(store, table_name, multiplexer, position, abort_signal, sender, metrics));

        Self { receiver, _dispatch_task: dispatch_task }
    }

    /// Waits for the next record (or terminal error). Returns `None`
    /// once the pipeline has completed — silently on abort, per
    /// specification §4.D step 4.
    pub async fn recv(&mut self) -> Option<Result<CdcRecord, ProviderError>> {
        self.receiver.recv().await
    }
}

async fn dispatch_shards(
    store: Arc<dyn BackingStore>,
    table_name: String,
    multiplexer: Arc<ShardMultiplexer>,
    position: StreamPosition,
    abort_signal: CancellationToken,
    sender: mpsc::Sender<Result<CdcRecord, ProviderError>>,
    metrics: Option<Arc<Metrics>>,
) {
    let mut shards = std::pin::pin!(multiplexer.subscribe());

    loop {
        let shard = tokio::select! {
            shard = shards.next() => match shard {
                Some(shard) => shard,
                None => return,
            },
            _ = abort_signal.cancelled() => return,
        };

        tokio::spawn(run_shard(
            store.clone(),
            table_name.clone(),
            shard,
            position,
            abort_signal.clone(),
            sender.clone(),
            metrics.clone(),
        ));
    }
}

/// Implements specification §4.D's per-shard loop: obtain an iterator,
/// `getRecords`, re-enqueue immediately if records came back, after
/// `IDLE_BACKOFF` if the shard was empty.
async fn run_shard(
    store: Arc<dyn BackingStore>,
    table_name: String,
    shard: Shard,
    position: StreamPosition,
    abort_signal: CancellationToken,
    sender: mpsc::Sender<Result<CdcRecord, ProviderError>>,
    metrics: Option<Arc<Metrics>>,
) {
    let mut iterator: ShardIterator = match store.get_shard_iterator(&table_name, &shard, position).await {
        Ok(iterator) => iterator,
        Err(error) => {
            tracing::warn!(shard = %shard.shard_id, %error, "failed to obtain shard iterator, skipping shard");
            return;
        }
    };

    loop {
        if abort_signal.is_cancelled() {
            return;
        }

        let result = tokio::select! {
            result = store.get_records(&table_name, &iterator) => result,
            _ = abort_signal.cancelled() => return,
        };

        match result {
            Ok((records, next_iterator)) => {
                let empty = records.is_empty();

                for record in records {
                    if let Some(metrics) = &metrics {
                        metrics.record_cdc_record(&shard.shard_id);
                    }
                    if sender.send(Ok(record)).await.is_err() {
                        return;
                    }
                }

                match next_iterator {
                    Some(next) => iterator = next,
                    None => return,
                }

                if empty {
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_BACKOFF) => {}
                        _ = abort_signal.cancelled() => return,
                    }
                }
            }
            Err(error) => {
                let _ = sender.send(Err(error.into())).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake_store::FakeBackingStore;
    use crate::store::RecordKey;

    fn record(shard_hash_key: &str, sequence_number: &str) -> CdcRecord {
        CdcRecord {
            sequence_number: sequence_number.to_string(),
            keys: RecordKey { hash_key: shard_hash_key.to_string(), range_key: "1".to_string() },
            new_image: Some(serde_json::json!({ "seq": sequence_number })),
            old_image: None,
        }
    }

    #[tokio::test]
    async fn delivers_records_in_sequence_order_per_shard() {
        let store = Arc::new(FakeBackingStore::new("hashKey", "rangeKey", "expires"));
        store.create_table("t", "hashKey", "rangeKey").await.unwrap();
        store.set_shards("t", vec![Shard { shard_id: "shard-0".into() }, Shard { shard_id: "shard-1".into() }]);
        store.push_cdc_record("t", record("item-a", "1"));
        store.push_cdc_record("t", record("item-a", "2"));
        store.push_cdc_record("t", record("item-a", "3"));

        let multiplexer = Arc::new(ShardMultiplexer::spawn(
            store.clone(),
            "t".to_string(),
            Duration::from_millis(10),
            CancellationToken::new(),
            None,
        ));

        let mut stream = RecordStream::new(store, "t".to_string(), multiplexer, StreamPosition::Earliest, CancellationToken::new(), None);

        let mut sequence_numbers = Vec::new();
        for _ in 0..3 {
            match stream.recv().await {
                Some(Ok(record)) => sequence_numbers.push(record.sequence_number),
                other => panic!("expected a record, got {other:?}"),
            }
        }

        assert_eq!(sequence_numbers, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn latest_position_skips_records_already_present() {
        let store = Arc::new(FakeBackingStore::new("hashKey", "rangeKey", "expires"));
        store.create_table("t", "hashKey", "rangeKey").await.unwrap();
        store.set_shards("t", vec![Shard { shard_id: "shard-0".into() }, Shard { shard_id: "shard-1".into() }]);
        store.push_cdc_record("t", record("item-a", "1"));

        let multiplexer = Arc::new(ShardMultiplexer::spawn(
            store.clone(),
            "t".to_string(),
            Duration::from_millis(10),
            CancellationToken::new(),
            None,
        ));

        let mut stream = RecordStream::new(store.clone(), "t".to_string(), multiplexer, StreamPosition::Latest, CancellationToken::new(), None);

        // Give the shard task time to call `get_shard_iterator` against the
        // pre-push state before this next record lands.
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.push_cdc_record("t", record("item-a", "2"));

        let received = stream.recv().await.unwrap().unwrap();
        assert_eq!(received.sequence_number, "2");
    }
}
