use std::sync::Arc;
use std::time::Duration;

use scylla::client::session::Session;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;

// ============================================================================
// Provider Configuration
// ============================================================================
//
// Options accepted by `obtain_provider`. Mirrors the abstract options bag
// from the specification (`{ client, hashKey, rangeKey, ttlAttribute?,
// pollInterval?, abortSignal, logger }`), adapted to builder-style `with_*`
// methods in the manner of `EventEnvelope::with_user`/`with_causation`.
//
// ============================================================================

pub(crate) const DEFAULT_HASH_KEY: &str = "hashKey";
pub(crate) const DEFAULT_RANGE_KEY: &str = "rangeKey";
pub(crate) const DEFAULT_TTL_ATTRIBUTE: &str = "expires";
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_TTL_SECONDS: i64 = 3600;

/// Options passed to [`crate::provider::obtain_provider`].
#[derive(Clone)]
pub struct ProviderOptions {
    pub(crate) client: Option<Arc<Session>>,
    pub(crate) hash_key: String,
    pub(crate) range_key: String,
    pub(crate) ttl_attribute: String,
    pub(crate) poll_interval: Duration,
    pub(crate) table_name: Option<String>,
    pub(crate) region: Option<String>,
    pub(crate) abort_signal: CancellationToken,
    pub(crate) metrics: Option<Arc<Metrics>>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            client: None,
            hash_key: DEFAULT_HASH_KEY.to_string(),
            range_key: DEFAULT_RANGE_KEY.to_string(),
            ttl_attribute: DEFAULT_TTL_ATTRIBUTE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            table_name: None,
            // Kept as the literal name the external interface specifies for
            // "no client supplied" resolution; here it selects a named
            // cluster alias rather than a literal AWS region.
            region: std::env::var("AWS_REGION").ok(),
            abort_signal: CancellationToken::new(),
            metrics: None,
        }
    }
}

impl ProviderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: Arc<Session>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_hash_key(mut self, hash_key: impl Into<String>) -> Self {
        self.hash_key = hash_key.into();
        self
    }

    pub fn with_range_key(mut self, range_key: impl Into<String>) -> Self {
        self.range_key = range_key.into();
        self
    }

    pub fn with_ttl_attribute(mut self, ttl_attribute: impl Into<String>) -> Self {
        self.ttl_attribute = ttl_attribute.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_abort_signal(mut self, abort_signal: CancellationToken) -> Self {
        self.abort_signal = abort_signal;
        self
    }

    /// Attaches a shared metrics registry so bootstrap, CDC ingestion, and
    /// the publish pipeline report into it. Omit it and every recording
    /// call below becomes a no-op.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub(crate) fn table_name_for(&self, stream_id: &str) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| format!("cloudrx_{stream_id}"))
    }
}

/// Consistency level for [`crate::subject::CloudSubject::publish`].
///
/// `Strong` is reserved and always fails fast with
/// [`crate::provider::ProviderError::NotImplemented`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    None,
    #[default]
    Weak,
    Strong,
}

/// Configuration for [`crate::subject::CloudSubject`].
#[derive(Clone)]
pub struct SubjectConfig {
    pub(crate) table_name: String,
    pub(crate) consistency: Consistency,
    pub(crate) replay_on_subscribe: bool,
}

impl SubjectConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            consistency: Consistency::Weak,
            replay_on_subscribe: false,
        }
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_replay_on_subscribe(mut self, replay_on_subscribe: bool) -> Self {
        self.replay_on_subscribe = replay_on_subscribe;
        self
    }
}

/// Shard iterator starting position. Maps to the reference store's
/// `TRIM_HORIZON`/`LATEST` iterator types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPosition {
    Earliest,
    Latest,
}
