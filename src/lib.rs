//! A cloud-backed reactive stream primitive: publishes are durably
//! written to a remote, append-only store before local subscribers
//! observe them, and historical values can be replayed to newly
//! attached subscribers. See `provider`, `cdc`, `pipeline`, and
//! `subject` for the three core subsystems this crate implements.

mod actors;
mod cdc;
mod config;
mod metrics;
mod pipeline;
mod provider;
mod store;
mod subject;
mod telemetry;
mod utils;

pub use actors::{CoordinatorActor, RegisterTable};
pub use cdc::RecordStream;
pub use config::{Consistency, ProviderOptions, StreamPosition, SubjectConfig};
pub use metrics::{start_metrics_server, Metrics};
pub use pipeline::{deep_equal, Matcher, PublishOutcome};
pub use provider::{obtain_provider, Provider, ProviderError, Unmarshalled};
pub use store::{
    AttributeType, BackingStore, BackingStoreError, CdcRecord, RecordKey, Shard, ShardIterator,
    StoredRecord, TableDescription, TtlDescription,
};
pub use store::{sweep_expired, ScyllaBackingStore};
pub use subject::{CloudSubject, Subscription};
pub use telemetry::init_tracing;
