use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix::prelude::*;
use scylla::client::session::Session;

use crate::metrics::{start_metrics_server, Metrics};
use crate::store::sweep_expired;

use super::core::{ComponentHealth, HealthStatus};

const TTL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Coordinator Actor - supervises ambient background jobs
// ============================================================================
//
// Components C/D/E/F (shard multiplexer, CDC record stream, publish
// pipeline, cloud subject) run on plain Tokio tasks and channels
// (specification §5) — this actor is not in that data path. It owns the
// jobs that sit around the core: the Prometheus metrics/health HTTP
// server, and a periodic TTL sweep over whichever tables this process
// has bootstrapped.
// ============================================================================

pub struct CoordinatorActor {
    session: Arc<Session>,
    metrics: Arc<Metrics>,
    metrics_port: u16,
    tables: HashMap<String, (String, String, String)>,
    health: ComponentHealth,
}

impl CoordinatorActor {
    pub fn new(session: Arc<Session>, metrics: Arc<Metrics>, metrics_port: u16) -> Self {
        Self {
            session,
            metrics,
            metrics_port,
            tables: HashMap::new(),
            health: ComponentHealth::new("coordinator", HealthStatus::Healthy),
        }
    }
}

impl Actor for CoordinatorActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("coordinator actor started");

        let registry = Arc::new(self.metrics.registry().clone());
        let port = self.metrics_port;
        std::thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().expect("failed to start metrics server runtime");
            rt.block_on(async {
                if let Err(error) = start_metrics_server(registry, port).await {
                    tracing::error!(%error, "metrics server exited");
                }
            });
        });

        _ctx.run_interval(TTL_SWEEP_INTERVAL, |act, _ctx| {
            let session = act.session.clone();
            let tables: Vec<(String, String, String, String)> = act
                .tables
                .iter()
                .map(|(table, (hash_key, range_key, ttl_attribute))| (table.clone(), hash_key.clone(), range_key.clone(), ttl_attribute.clone()))
                .collect();

            actix::spawn(async move {
                for (table, hash_key, range_key, ttl_attribute) in tables {
                    match sweep_expired(&session, &table, &hash_key, &range_key, &ttl_attribute).await {
                        Ok(deleted) if deleted > 0 => {
                            tracing::debug!(table = %table, deleted, "ttl sweep evicted expired records");
                        }
                        Ok(_) => {}
                        Err(error) => {
                            tracing::warn!(table = %table, %error, "ttl sweep failed, will retry next interval");
                        }
                    }
                }
            });
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        tracing::info!("coordinator actor stopping");
        Running::Stop
    }
}

/// Registers `table_name` (and its hash/range/ttl column names) for
/// periodic TTL sweeping. Sent once per stream as its provider completes
/// bootstrap.
#[derive(Message)]
#[rtype(result = "()")]
pub struct RegisterTable(pub String, pub String, pub String, pub String);

impl Handler<RegisterTable> for CoordinatorActor {
    type Result = ();

    fn handle(&mut self, msg: RegisterTable, _ctx: &mut Self::Context) {
        self.tables.insert(msg.0, (msg.1, msg.2, msg.3));
    }
}

/// Current health snapshot of the coordinator itself.
#[derive(Message)]
#[rtype(result = "ComponentHealth")]
pub struct GetHealth;

impl Handler<GetHealth> for CoordinatorActor {
    type Result = MessageResult<GetHealth>;

    fn handle(&mut self, _msg: GetHealth, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.health.clone())
    }
}
