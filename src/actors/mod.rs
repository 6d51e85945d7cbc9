// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based supervision for ambient background jobs only — the metrics
// server and the TTL sweep. Components C/D/E/F (the publish/subscribe
// data path) use plain Tokio tasks and channels; see `cdc`, `pipeline`,
// and `subject`.
//
// ============================================================================

mod core;
mod coordinator;

pub use coordinator::{CoordinatorActor, GetHealth, RegisterTable};

pub(crate) use core::{ComponentHealth, HealthStatus};
