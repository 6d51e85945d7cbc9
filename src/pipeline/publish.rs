use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::{sleep, timeout};

use crate::config::Consistency;
use crate::provider::{Provider, ProviderError};
use crate::utils::IsTransient;

use super::deep_equal::deep_equal;

fn consistency_label(consistency: Consistency) -> &'static str {
    match consistency {
        Consistency::None => "none",
        Consistency::Weak => "weak",
        Consistency::Strong => "strong",
    }
}

const STORE_TIMEOUT: Duration = Duration::from_secs(5);
const VERIFY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const VERIFY_DEADLINE: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const OVERALL_DEADLINE: Duration = Duration::from_secs(10);

/// Outcome of a successful `publish` (specification §4.E), carrying the
/// value back to the caller once the configured consistency level has
/// been satisfied.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub value: Value,
    pub verified: bool,
}

/// Writes `value` through `provider` and honors `consistency`
/// (specification §4.E). Failure never delivers to local subscribers —
/// callers surface the error on the publish completion and the
/// subject's error channel themselves.
pub async fn publish(provider: &Provider, consistency: Consistency, value: Value) -> Result<PublishOutcome, ProviderError> {
    let started = Instant::now();

    let result = match consistency {
        Consistency::None => publish_none(provider, value).await,
        Consistency::Weak => publish_weak(provider, value).await,
        Consistency::Strong => Err(ProviderError::NotImplemented("strong consistency publish")),
    };

    if let Some(metrics) = provider.metrics() {
        let label = consistency_label(consistency);
        metrics.record_publish(label, result.is_ok());
        if consistency == Consistency::Weak {
            metrics.record_verify_duration(label, started.elapsed().as_secs_f64());
        }
    }

    result
}

/// `none`: write and return as soon as the store acknowledges; one retry
/// 1 s later on a transient failure, overall 10 s deadline.
async fn publish_none(provider: &Provider, value: Value) -> Result<PublishOutcome, ProviderError> {
    let attempt = async {
        match timeout(STORE_TIMEOUT, provider.store(value.clone())).await {
            Ok(Ok((record, _matcher))) => Ok(PublishOutcome { value: record.data, verified: false }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::Retryable("store timed out".to_string())),
        }
    };

    match timeout(OVERALL_DEADLINE, async {
        match attempt.await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_transient() => {
                sleep(RETRY_DELAY).await;
                match timeout(STORE_TIMEOUT, provider.store(value)).await {
                    Ok(Ok((record, _matcher))) => Ok(PublishOutcome { value: record.data, verified: false }),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ProviderError::Retryable("store timed out".to_string())),
                }
            }
            Err(e) => Err(e),
        }
    })
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ProviderError::VerificationFailed("publish exceeded its 10s deadline".to_string())),
    }
}

/// `weak`: write, then poll `query` with a consistent read every 100 ms
/// until the value is visible and deep-equal to what was sent, up to a
/// 5 s deadline. On any failure, retry the whole store-then-verify
/// sequence once after 1 s. Overall 10 s deadline.
async fn publish_weak(provider: &Provider, value: Value) -> Result<PublishOutcome, ProviderError> {
    match timeout(OVERALL_DEADLINE, async {
        match store_and_verify(provider, value.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(_first_attempt_error) => {
                sleep(RETRY_DELAY).await;
                store_and_verify(provider, value).await
            }
        }
    })
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ProviderError::VerificationFailed("publish exceeded its 10s deadline".to_string())),
    }
}

async fn store_and_verify(provider: &Provider, value: Value) -> Result<PublishOutcome, ProviderError> {
    let (record, _matcher) = timeout(STORE_TIMEOUT, provider.store(value))
        .await
        .map_err(|_| ProviderError::Retryable("store timed out".to_string()))??;

    timeout(VERIFY_DEADLINE, async {
        loop {
            let rows = provider.query(true).await?;

            if let Some(found) = rows.iter().find(|r| r.key() == record.key()) {
                return if deep_equal(&found.data, &record.data) {
                    Ok(())
                } else {
                    Err(ProviderError::VerificationFailed(
                        "read-back value did not match the published value".to_string(),
                    ))
                };
            }

            sleep(VERIFY_POLL_INTERVAL).await;
        }
    })
    .await
    .map_err(|_| ProviderError::VerificationFailed("read-back did not observe the write within 5s".to_string()))??;

    Ok(PublishOutcome { value: record.data, verified: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use crate::store::fake_store::FakeBackingStore;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn provider_over_bootstrapped_table() -> (Provider, Arc<FakeBackingStore>) {
        let store = Arc::new(FakeBackingStore::new("hashKey", "rangeKey", "expires"));
        store.create_table("t1", "hashKey", "rangeKey").await.unwrap();
        let provider = Provider::new(store.clone(), "t1".to_string(), Duration::from_secs(5), CancellationToken::new(), None);
        (provider, store)
    }

    #[tokio::test]
    async fn none_consistency_returns_without_waiting_for_visibility() {
        let (provider, _store) = provider_over_bootstrapped_table().await;

        let outcome = publish(&provider, Consistency::None, json!({"x": 1})).await.unwrap();
        assert_eq!(outcome.value, json!({"x": 1}));
        assert!(!outcome.verified);
    }

    #[tokio::test]
    async fn weak_consistency_verifies_before_returning() {
        let (provider, _store) = provider_over_bootstrapped_table().await;

        let outcome = publish(&provider, Consistency::Weak, json!({"x": 1})).await.unwrap();
        assert_eq!(outcome.value, json!({"x": 1}));
        assert!(outcome.verified);
    }

    #[tokio::test]
    async fn weak_consistency_polls_until_value_becomes_visible() {
        let (provider, store) = provider_over_bootstrapped_table().await;
        store.fail_query_until("t1", 2);

        let outcome = publish(&provider, Consistency::Weak, json!({"x": 1})).await.unwrap();
        assert!(outcome.verified);
    }

    #[tokio::test]
    async fn strong_consistency_fails_fast_without_any_write() {
        let (provider, _store) = provider_over_bootstrapped_table().await;

        let result = publish(&provider, Consistency::Strong, json!({"x": 1})).await;
        assert!(matches!(result, Err(ProviderError::NotImplemented(_))));
        assert!(provider.query(true).await.unwrap().is_empty());
    }
}
