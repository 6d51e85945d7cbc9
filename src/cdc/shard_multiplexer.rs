use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::store::{BackingStore, Shard};

// ============================================================================
// Shard Multiplexer (component C)
// ============================================================================
//
// Polls `describe_stream` on an interval, dedupes against shards already
// seen, and broadcasts newly discovered ones. Every subscriber — early or
// late — first receives every shard known so far before joining the live
// broadcast, which is this crate's equivalent of a replaying subject: a
// plain `tokio::sync::broadcast::Receiver` alone only sees shards
// discovered after it subscribes.
//
// ============================================================================

pub struct ShardMultiplexer {
    known: Arc<Mutex<Vec<Shard>>>,
    sender: broadcast::Sender<Shard>,
    poll_task: JoinHandle<()>,
}

impl ShardMultiplexer {
    pub(crate) fn spawn(
        store: Arc<dyn BackingStore>,
        table_name: String,
        poll_interval: Duration,
        abort_signal: CancellationToken,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let (sender, _) = broadcast::channel(256);
        let known: Arc<Mutex<Vec<Shard>>> = Arc::new(Mutex::new(Vec::new()));

        let poll_task = tokio::spawn(poll_loop(
            store,
            table_name,
            poll_interval,
            abort_signal,
            known.clone(),
            sender.clone(),
            metrics,
        ));

        Self { known, sender, poll_task }
    }

    /// Every shard discovered so far, followed by shards discovered from
    /// this point on. Dropping the returned stream unsubscribes cleanly.
    pub fn subscribe(&self) -> impl Stream<Item = Shard> + Send + 'static {
        let replay = self.known.lock().unwrap().clone();
        let live = tokio_stream::wrappers::BroadcastStream::new(self.sender.subscribe()).filter_map(|r| async move { r.ok() });
        stream::iter(replay).chain(live)
    }
}

impl Drop for ShardMultiplexer {
    fn drop(&mut self) {
        self.poll_task.abort();
    }
}

async fn poll_loop(
    store: Arc<dyn BackingStore>,
    table_name: String,
    poll_interval: Duration,
    abort_signal: CancellationToken,
    known: Arc<Mutex<Vec<Shard>>>,
    sender: broadcast::Sender<Shard>,
    metrics: Option<Arc<Metrics>>,
) {
    let mut seen: HashSet<Shard> = HashSet::new();

    loop {
        match store.describe_stream(&table_name).await {
            Ok(shards) => {
                for shard in shards {
                    if seen.insert(shard.clone()) {
                        known.lock().unwrap().push(shard.clone());
                        if let Some(metrics) = &metrics {
                            metrics.record_shard_discovered();
                        }
                        // No subscribers yet is not an error; they'll still
                        // get this shard via the replay buffer.
                        let _ = sender.send(shard);
                    }
                }
            }
            Err(error) => {
                tracing::warn!(table = %table_name, %error, "shard discovery poll failed, will retry");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = abort_signal.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake_store::FakeBackingStore;
    use futures_util::StreamExt as _;

    #[tokio::test]
    async fn late_subscriber_replays_known_shards() {
        let store = Arc::new(FakeBackingStore::new("hashKey", "rangeKey", "expires"));
        store.create_table("t", "hashKey", "rangeKey").await.unwrap();
        store.set_shards(
            "t",
            vec![Shard { shard_id: "shard-0".into() }, Shard { shard_id: "shard-1".into() }],
        );

        let multiplexer = ShardMultiplexer::spawn(store.clone(), "t".to_string(), Duration::from_millis(10), CancellationToken::new(), None);

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = std::pin::pin!(multiplexer.subscribe());
        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(
            HashSet::from([first.shard_id, second.shard_id]),
            HashSet::from(["shard-0".to_string(), "shard-1".to_string()])
        );
    }
}
