use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::SubjectConfig;
use crate::pipeline::publish;
use crate::provider::{Provider, ProviderError};

type ObserverMap<T> = RwLock<HashMap<u64, mpsc::UnboundedSender<Result<T, Arc<ProviderError>>>>>;

/// User-facing facade (component F) binding a `streamName` to a
/// `Provider`: accepts publishes, fans out to local subscribers,
/// optionally replays the table's current contents on subscribe.
pub struct CloudSubject<T> {
    provider: Arc<Provider>,
    config: SubjectConfig,
    observers: Arc<ObserverMap<T>>,
    next_id: AtomicU64,
    disposed: AtomicBool,
}

/// A live subscription. Dropping it unsubscribes; polling it with
/// [`Subscription::recv`] delivers replayed values (if configured)
/// followed by live publishes, in that order.
pub struct Subscription<T> {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Result<T, Arc<ProviderError>>>,
    observers: Arc<ObserverMap<T>>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<Result<T, Arc<ProviderError>>> {
        self.receiver.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.observers.write().unwrap().remove(&self.id);
    }
}

impl<T> CloudSubject<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(provider: Arc<Provider>, config: SubjectConfig) -> Self {
        Self {
            provider,
            config,
            observers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Routes through the store-verify-emit pipeline (specification
    /// §4.E) and fans the result out to every observer currently
    /// attached. Failures reach the caller and every such observer; they
    /// never reach local subscribers as a successful value.
    pub async fn publish(&self, value: T) -> Result<T, ProviderError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ProviderError::Disposed);
        }

        let payload = serde_json::to_value(&value).map_err(|e| ProviderError::Unknown(e.into()))?;

        match publish(&self.provider, self.config.consistency, payload).await {
            Ok(outcome) => {
                let delivered: T = serde_json::from_value(outcome.value).map_err(|e| ProviderError::Unknown(e.into()))?;
                self.broadcast(Ok(delivered.clone()));
                Ok(delivered)
            }
            Err(error) => {
                let shared = Arc::new(error);
                self.broadcast(Err(shared.clone()));
                Err(ProviderError::Unknown(anyhow::anyhow!(shared.to_string())))
            }
        }
    }

    /// Attaches a new observer. If `replayOnSubscribe` is set, every
    /// currently stored value is delivered, oldest first, before this
    /// call returns — so no live publish can reach the subscriber ahead
    /// of replay (specification §4.F, §9 open question resolution).
    pub async fn subscribe(&self) -> Subscription<T> {
        let (sender, receiver) = mpsc::unbounded_channel();

        if self.config.replay_on_subscribe {
            match self.provider.query(false).await {
                Ok(mut rows) => {
                    rows.sort_by_key(|r| r.timestamp);
                    for row in rows {
                        match serde_json::from_value::<T>(row.data) {
                            Ok(value) => {
                                if sender.send(Ok(value)).is_err() {
                                    break;
                                }
                            }
                            Err(error) => {
                                tracing::warn!(%error, "failed to deserialize replayed record, skipping");
                            }
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "replay-on-subscribe query failed, subscriber stays attached");
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().unwrap().insert(id, sender);

        Subscription { id, receiver, observers: self.observers.clone() }
    }

    /// Terminates the subject: further publishes fail with
    /// [`ProviderError::Disposed`]; every attached subscriber's stream
    /// completes.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.observers.write().unwrap().clear();
    }

    fn broadcast(&self, message: Result<T, Arc<ProviderError>>) {
        let observers = self.observers.read().unwrap();
        for sender in observers.values() {
            let _ = sender.send(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Consistency;
    use crate::store::fake_store::FakeBackingStore;
    use serde::Deserialize;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Item {
        n: u32,
    }

    async fn subject(replay_on_subscribe: bool) -> CloudSubject<Item> {
        let store = Arc::new(FakeBackingStore::new("hashKey", "rangeKey", "expires"));
        store.create_table("t", "hashKey", "rangeKey").await.unwrap();
        let provider = Arc::new(Provider::new(store, "t".to_string(), Duration::from_secs(5), CancellationToken::new(), None));
        let config = SubjectConfig::new("t").with_consistency(Consistency::Weak).with_replay_on_subscribe(replay_on_subscribe);
        CloudSubject::new(provider, config)
    }

    #[tokio::test]
    async fn subscriber_receives_a_published_value() {
        let subject = subject(false).await;
        let mut sub = subject.subscribe().await;

        let published = subject.publish(Item { n: 1 }).await.unwrap();
        assert_eq!(published, Item { n: 1 });

        let received = sub.recv().await.unwrap().unwrap();
        assert_eq!(received, Item { n: 1 });
    }

    #[tokio::test]
    async fn late_subscriber_replays_prior_publishes_before_live_values() {
        let subject = subject(true).await;
        subject.publish(Item { n: 1 }).await.unwrap();
        subject.publish(Item { n: 2 }).await.unwrap();

        let mut sub = subject.subscribe().await;
        let first = sub.recv().await.unwrap().unwrap();
        let second = sub.recv().await.unwrap().unwrap();
        assert_eq!(first, Item { n: 1 });
        assert_eq!(second, Item { n: 2 });

        subject.publish(Item { n: 3 }).await.unwrap();
        let third = sub.recv().await.unwrap().unwrap();
        assert_eq!(third, Item { n: 3 });
    }

    #[tokio::test]
    async fn subscriber_without_replay_does_not_see_prior_publishes() {
        let subject = subject(false).await;
        subject.publish(Item { n: 1 }).await.unwrap();

        let mut sub = subject.subscribe().await;
        subject.publish(Item { n: 2 }).await.unwrap();

        let only = sub.recv().await.unwrap().unwrap();
        assert_eq!(only, Item { n: 2 });
    }

    #[tokio::test]
    async fn dispose_fails_further_publishes_and_closes_subscribers() {
        let subject = subject(false).await;
        let mut sub = subject.subscribe().await;

        subject.dispose();

        let result = subject.publish(Item { n: 1 }).await;
        assert!(matches!(result, Err(ProviderError::Disposed)));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_a_subscription_unsubscribes_it() {
        let subject = subject(false).await;
        let sub = subject.subscribe().await;
        drop(sub);

        assert_eq!(subject.observers.read().unwrap().len(), 0);
        subject.publish(Item { n: 1 }).await.unwrap();
    }
}
