mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers the three core subsystems: provider bootstrap, CDC ingestion,
// and the publish pipeline, plus the circuit breaker guarding the
// backing-store adapter. Scraped via /metrics.
// ============================================================================

/// Central metrics registry for the library.
pub struct Metrics {
    registry: Registry,

    pub publishes_total: IntCounterVec,
    pub verify_duration: HistogramVec,

    pub cdc_records_total: IntCounterVec,
    pub shards_discovered_total: IntCounter,

    pub bootstrap_retries_total: IntCounterVec,

    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let publishes_total = IntCounterVec::new(
            Opts::new("cloudrx_publishes_total", "Total publish attempts by consistency level and outcome"),
            &["consistency", "outcome"],
        )?;
        registry.register(Box::new(publishes_total.clone()))?;

        let verify_duration = HistogramVec::new(
            HistogramOpts::new("cloudrx_verify_duration_seconds", "Time spent in weak-consistency read-back verification")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["consistency"],
        )?;
        registry.register(Box::new(verify_duration.clone()))?;

        let cdc_records_total = IntCounterVec::new(
            Opts::new("cloudrx_cdc_records_total", "Total CDC records emitted per shard"),
            &["shard_id"],
        )?;
        registry.register(Box::new(cdc_records_total.clone()))?;

        let shards_discovered_total = IntCounter::new(
            "cloudrx_shards_discovered_total",
            "Total distinct shards discovered across all streams",
        )?;
        registry.register(Box::new(shards_discovered_total.clone()))?;

        let bootstrap_retries_total = IntCounterVec::new(
            Opts::new("cloudrx_provider_bootstrap_retries_total", "Total bootstrap retry iterations by stream"),
            &["stream_id"],
        )?;
        registry.register(Box::new(bootstrap_retries_total.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "cloudrx_circuit_breaker_state",
            "Backing-store circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("cloudrx_circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        Ok(Self {
            registry,
            publishes_total,
            verify_duration,
            cdc_records_total,
            shards_discovered_total,
            bootstrap_retries_total,
            circuit_breaker_state,
            circuit_breaker_transitions,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_publish(&self, consistency: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.publishes_total.with_label_values(&[consistency, outcome]).inc();
    }

    pub fn record_verify_duration(&self, consistency: &str, duration_secs: f64) {
        self.verify_duration.with_label_values(&[consistency]).observe(duration_secs);
    }

    pub fn record_cdc_record(&self, shard_id: &str) {
        self.cdc_records_total.with_label_values(&[shard_id]).inc();
    }

    pub fn record_shard_discovered(&self) {
        self.shards_discovered_total.inc();
    }

    pub fn record_bootstrap_retry(&self, stream_id: &str) {
        self.bootstrap_retries_total.with_label_values(&[stream_id]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: u8) {
        self.circuit_breaker_state.set(state as i64);
    }

    pub fn record_circuit_breaker_transition(&self, from_state: &str, to_state: &str) {
        self.circuit_breaker_transitions.with_label_values(&[from_state, to_state]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to create metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_publish_outcome() {
        let metrics = Metrics::new().unwrap();
        metrics.record_publish("weak", true);
        metrics.record_publish("weak", false);

        let gathered = metrics.registry.gather();
        let publishes = gathered.iter().find(|m| m.name() == "cloudrx_publishes_total").unwrap();
        assert_eq!(publishes.metric.len(), 2);
    }

    #[test]
    fn records_shard_discovery() {
        let metrics = Metrics::new().unwrap();
        metrics.record_shard_discovered();
        metrics.record_shard_discovered();

        let gathered = metrics.registry.gather();
        let shards = gathered.iter().find(|m| m.name() == "cloudrx_shards_discovered_total").unwrap();
        assert_eq!(shards.metric[0].counter.value, Some(2.0));
    }

    #[test]
    fn records_circuit_breaker_state() {
        let metrics = Metrics::new().unwrap();
        metrics.update_circuit_breaker_state(1);

        let gathered = metrics.registry.gather();
        let state = gathered.iter().find(|m| m.name() == "cloudrx_circuit_breaker_state").unwrap();
        assert_eq!(state.metric[0].gauge.value, Some(1.0));
    }
}
