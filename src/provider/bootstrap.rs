use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use std::sync::Arc;

use crate::metrics::Metrics;
use crate::store::{AttributeType, BackingStore, BackingStoreError, TableDescription, TtlDescription};

use super::errors::ProviderError;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Runs the bootstrap protocol (specification §4.B) to completion: the
/// table and its CDC stream exist and validate against the configured
/// schema, or bootstrap fails fatally.
///
/// Re-running against an already-valid table is a no-op: the first
/// `describe_table`/`describe_ttl` pair succeeds and validation passes
/// immediately.
pub(crate) async fn bootstrap(
    store: &dyn BackingStore,
    table_name: &str,
    hash_key: &str,
    range_key: &str,
    ttl_attribute: &str,
    abort_signal: &CancellationToken,
    metrics: Option<&Arc<Metrics>>,
) -> Result<(), ProviderError> {
    loop {
        if abort_signal.is_cancelled() {
            return Err(ProviderError::Aborted);
        }

        let describe = tokio::select! {
            result = describe_both(store, table_name) => result,
            _ = abort_signal.cancelled() => return Err(ProviderError::Aborted),
        };

        match describe {
            Ok((table, ttl)) => {
                if !table.table_active || !ttl.enabled {
                    tracing::warn!(table = %table_name, "table or ttl not yet active, retrying");
                    if let Some(metrics) = metrics {
                        metrics.record_bootstrap_retry(table_name);
                    }
                    sleep_or_abort(RETRY_DELAY, abort_signal).await?;
                    continue;
                }

                validate_schema(&table, &ttl, hash_key, range_key, ttl_attribute)?;

                tracing::info!(table = %table_name, "bootstrap complete");
                return Ok(());
            }
            Err(BootstrapStepError::NeedsCreate) => {
                tracing::info!(table = %table_name, "table or stream missing, creating");
                create_schema(store, table_name, hash_key, range_key, ttl_attribute).await?;
                // restart immediately, per specification step 2
            }
            Err(BootstrapStepError::Retry(msg)) => {
                tracing::warn!(table = %table_name, error = %msg, "transient bootstrap condition, retrying in 1s");
                if let Some(metrics) = metrics {
                    metrics.record_bootstrap_retry(table_name);
                }
                sleep_or_abort(RETRY_DELAY, abort_signal).await?;
            }
            Err(BootstrapStepError::Fatal(msg)) => {
                return Err(ProviderError::Unknown(anyhow::anyhow!(msg)));
            }
        }
    }
}

enum BootstrapStepError {
    NeedsCreate,
    Retry(String),
    Fatal(String),
}

/// `describeTable` and `describeTTL` "in parallel" (specification step 1);
/// an aggregate failure is unwrapped and reclassified as the spec directs.
async fn describe_both(
    store: &dyn BackingStore,
    table_name: &str,
) -> Result<(TableDescription, TtlDescription), BootstrapStepError> {
    let (table_result, ttl_result) = tokio::join!(store.describe_table(table_name), store.describe_ttl(table_name));

    match (table_result, ttl_result) {
        (Ok(table), Ok(ttl)) => Ok((table, ttl)),
        (Err(e), _) | (_, Err(e)) => Err(classify_describe_error(e)),
    }
}

fn classify_describe_error(err: BackingStoreError) -> BootstrapStepError {
    match err {
        BackingStoreError::ResourceNotFound(_) => BootstrapStepError::NeedsCreate,
        BackingStoreError::ResourceInUse(msg) => BootstrapStepError::Retry(msg),
        BackingStoreError::Validation(msg) => BootstrapStepError::Retry(msg),
        BackingStoreError::ConnectionRefused => BootstrapStepError::Retry("connection refused".to_string()),
        BackingStoreError::Other(e) => BootstrapStepError::Fatal(e.to_string()),
    }
}

async fn create_schema(
    store: &dyn BackingStore,
    table_name: &str,
    hash_key: &str,
    range_key: &str,
    ttl_attribute: &str,
) -> Result<(), ProviderError> {
    match store.create_table(table_name, hash_key, range_key).await {
        Ok(()) | Err(BackingStoreError::ResourceInUse(_)) => {}
        Err(e) => return Err(e.into()),
    }

    store.update_ttl(table_name, ttl_attribute).await?;
    Ok(())
}

fn validate_schema(
    table: &TableDescription,
    ttl: &TtlDescription,
    hash_key: &str,
    range_key: &str,
    ttl_attribute: &str,
) -> Result<(), ProviderError> {
    if table.hash_key_name != hash_key || table.hash_key_type != AttributeType::String {
        return Err(ProviderError::SchemaMismatch(format!(
            "hash key {} must be a string attribute named {hash_key}",
            table.hash_key_name
        )));
    }

    if table.range_key_name != range_key || table.range_key_type != AttributeType::String {
        return Err(ProviderError::SchemaMismatch(format!(
            "range key {} must be a string attribute named {range_key}",
            table.range_key_name
        )));
    }

    if !table.stream_enabled {
        return Err(ProviderError::SchemaMismatch(
            "table must have change-data-capture streaming enabled".to_string(),
        ));
    }

    if ttl.attribute_name != ttl_attribute || ttl.attribute_type != AttributeType::Number {
        return Err(ProviderError::SchemaMismatch(format!(
            "ttl attribute {} must be a numeric attribute named {ttl_attribute}",
            ttl.attribute_name
        )));
    }

    Ok(())
}

async fn sleep_or_abort(duration: Duration, abort_signal: &CancellationToken) -> Result<(), ProviderError> {
    tokio::select! {
        _ = sleep(duration) => Ok(()),
        _ = abort_signal.cancelled() => Err(ProviderError::Aborted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake_store::FakeBackingStore;

    #[tokio::test]
    async fn creates_table_on_first_bootstrap() {
        let store = FakeBackingStore::new("hashKey", "rangeKey", "expires");
        assert!(!store.table_exists("t1"));

        bootstrap(&store, "t1", "hashKey", "rangeKey", "expires", &CancellationToken::new(), None)
            .await
            .unwrap();

        assert!(store.table_exists("t1"));
    }

    #[tokio::test]
    async fn rerunning_against_a_valid_table_is_a_no_op() {
        let store = FakeBackingStore::new("hashKey", "rangeKey", "expires");
        let token = CancellationToken::new();

        bootstrap(&store, "t1", "hashKey", "rangeKey", "expires", &token, None).await.unwrap();
        bootstrap(&store, "t1", "hashKey", "rangeKey", "expires", &token, None).await.unwrap();
    }

    #[tokio::test]
    async fn aborts_immediately_when_signal_already_cancelled() {
        let store = FakeBackingStore::new("hashKey", "rangeKey", "expires");
        let token = CancellationToken::new();
        token.cancel();

        let result = bootstrap(&store, "t1", "hashKey", "rangeKey", "expires", &token, None).await;
        assert!(matches!(result, Err(ProviderError::Aborted)));
    }

    #[test]
    fn schema_mismatch_on_wrong_hash_key_name_is_fatal() {
        let table = TableDescription {
            hash_key_name: "wrongKey".to_string(),
            hash_key_type: AttributeType::String,
            range_key_name: "rangeKey".to_string(),
            range_key_type: AttributeType::String,
            stream_enabled: true,
            table_active: true,
        };
        let ttl = TtlDescription {
            attribute_name: "expires".to_string(),
            attribute_type: AttributeType::Number,
            enabled: true,
        };

        let result = validate_schema(&table, &ttl, "hashKey", "rangeKey", "expires");
        assert!(matches!(result, Err(ProviderError::SchemaMismatch(_))));
    }
}
