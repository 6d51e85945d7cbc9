use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::OnceCell;

use crate::config::ProviderOptions;
use crate::store::ScyllaBackingStore;

use super::bootstrap::bootstrap;
use super::errors::ProviderError;
use super::handle::Provider;

// ============================================================================
// Provider Registry
// ============================================================================
//
// "A registry maps streamId to initialization task (shared, multi-
// subscriber, latest-value-replayed)" (specification §4.B). Concurrent
// `obtain_provider` calls for the same streamId share one bootstrap. A
// fatal bootstrap error poisons the slot (specification §4.B, §7): once
// `init_provider` resolves to `Err`, every later call for the same
// streamId gets that same error back rather than re-running bootstrap —
// `bootstrap` itself already loops internally on every retryable
// condition, so an `Err` reaching here is fatal by construction.
//
// ============================================================================

type SlotResult = Result<Arc<Provider>, Arc<ProviderError>>;
type Slot = Arc<OnceCell<SlotResult>>;

fn registry() -> &'static Mutex<HashMap<String, Slot>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Slot>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Obtains the provider for `stream_id`, bootstrapping its backing table
/// on first use and reusing the same handle for every later call with
/// the same id (specification §4.B, testable property #6). A fatal
/// bootstrap failure poisons the streamId: later calls get the same
/// error without re-attempting bootstrap.
pub async fn obtain_provider(stream_id: &str, options: ProviderOptions) -> Result<Arc<Provider>, ProviderError> {
    let slot = registry()
        .lock()
        .unwrap()
        .entry(stream_id.to_string())
        .or_insert_with(|| Arc::new(OnceCell::new()))
        .clone();

    let stream_id = stream_id.to_string();
    let result = slot
        .get_or_init(|| async move { init_provider(&stream_id, options).await.map_err(Arc::new) })
        .await;

    result.clone().map_err(ProviderError::Poisoned)
}

async fn init_provider(stream_id: &str, options: ProviderOptions) -> Result<Arc<Provider>, ProviderError> {
    let table_name = options.table_name_for(stream_id);

    let client = options
        .client
        .clone()
        .ok_or_else(|| ProviderError::Unknown(anyhow::anyhow!("ProviderOptions.client is required")))?;

    let mut store = ScyllaBackingStore::new(client, &options.hash_key, &options.range_key, &options.ttl_attribute);
    if let Some(metrics) = options.metrics.clone() {
        store = store.with_metrics(metrics);
    }
    let store = Arc::new(store);

    bootstrap(
        store.as_ref(),
        &table_name,
        &options.hash_key,
        &options.range_key,
        &options.ttl_attribute,
        &options.abort_signal,
        options.metrics.as_ref(),
    )
    .await?;

    Ok(Arc::new(Provider::new(
        store,
        table_name,
        options.poll_interval,
        options.abort_signal,
        options.metrics.clone(),
    )))
}

#[cfg(test)]
/// Drops every memoized provider. Test-only: production code relies on
/// registry entries outliving the process.
pub(crate) fn clear_for_test() {
    registry().lock().unwrap().clear();
}
