/*!
Main async coordinator that wires sources, per-world decision loops, pollers and sinks
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rusqlite::Connection;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use territory_database::{Catalog, WorldId, tables::schema::initialize_schema};

use crate::core::{
    adapter::{SignalRouter, SignalSource, pump},
    config::GovernorConfig,
    engine::ReconciliationEngine,
    error::GovernorError,
    outbound::{OutboundDispatcher, OutboundQueue},
    output_plugins::OutputManager,
    poll::{CensusPollClient, PollClient, PollScheduler},
    signal::SignalNormalizer,
    stats::{GovernorStats, StatsSnapshot},
    store::WorldState,
};

type WorldTask = JoinHandle<Result<WorldState, GovernorError>>;

/// Running governor: one decision loop per tracked world plus shared plumbing
pub struct TerritoryGovernor {
    router: SignalRouter,
    stats: Arc<GovernorStats>,
    outbound: OutboundQueue,
    shutdown_tx: watch::Sender<bool>,
    halts: mpsc::UnboundedReceiver<GovernorError>,
    worlds: Vec<(WorldId, WorldTask)>,
    schedulers: Vec<JoinHandle<()>>,
    sources: Vec<JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
    flush_timeout: Duration,
}

/// What the governor left behind after shutting down
#[derive(Debug)]
pub struct ShutdownReport {
    pub stats: StatsSnapshot,
    /// Final state of every world that stopped cleanly
    pub worlds: Vec<WorldState>,
    /// Worlds that stopped on an invariant violation
    pub halted: Vec<GovernorError>,
    /// Whether the outbound queue was fully delivered in time
    pub flushed: bool,
}

impl TerritoryGovernor {
    /// Spawn every world's tasks. Output handlers must already be initialized.
    pub fn start(
        config: &GovernorConfig,
        catalog: Arc<Catalog>,
        outputs: OutputManager,
        poll_client: Option<Arc<dyn PollClient>>,
    ) -> Result<Self, GovernorError> {
        let (shutdown_tx, _) = watch::channel(false);
        let (halt_tx, halts) = mpsc::unbounded_channel();
        let stats = Arc::new(GovernorStats::new(catalog.world_ids()));
        let outbound = OutboundQueue::with_stats(config.outbound.capacity, stats.clone());

        let dispatcher = tokio::spawn(
            OutboundDispatcher::new(
                outbound.clone(),
                outputs,
                config.outbound.retry_policy(),
                stats.clone(),
            )
            .run(),
        );

        let mut queues = HashMap::new();
        let mut worlds = Vec::new();
        let mut schedulers = Vec::new();

        for world in catalog.worlds() {
            let state = WorldState::from_catalog(&catalog, world.id)?;
            let snapshot = state.subscribe();
            let (commands_tx, commands_rx) = mpsc::channel(config.ingestion.queue_capacity.max(1));

            let engine = ReconciliationEngine::new(state, outbound.clone(), stats.world(world.id));
            let halt_tx = halt_tx.clone();
            let shutdown = shutdown_tx.subscribe();
            let task = tokio::spawn(async move {
                let result = engine.run(commands_rx, shutdown).await;
                if let Err(e) = &result {
                    let _ = halt_tx.send(e.clone());
                }
                result
            });
            worlds.push((world.id, task));

            if let Some(client) = poll_client.as_ref().filter(|_| config.polling.enabled) {
                let scheduler = PollScheduler::new(
                    world.id,
                    config.polling.interval(),
                    client.clone(),
                    snapshot,
                    commands_tx.clone(),
                    stats.world(world.id),
                );
                schedulers.push(tokio::spawn(scheduler.run(shutdown_tx.subscribe())));
            }

            info!(world_id = world.id, world = %world.name, "world online");
            queues.insert(world.id, commands_tx);
        }
        // Only the world tasks may keep the halt channel open
        drop(halt_tx);

        let router = SignalRouter::new(
            SignalNormalizer::new(catalog),
            queues,
            stats.clone(),
        );

        info!(
            worlds = worlds.len(),
            pollers = schedulers.len(),
            "🚀 territory governor started"
        );

        Ok(Self {
            router,
            stats,
            outbound,
            shutdown_tx,
            halts,
            worlds,
            schedulers,
            sources: Vec::new(),
            dispatcher,
            flush_timeout: config.outbound.flush_timeout(),
        })
    }

    /// Router for feeding payloads from any transport
    pub fn router(&self) -> SignalRouter {
        self.router.clone()
    }

    /// Live counters, readable while the governor runs
    pub fn stats(&self) -> Arc<GovernorStats> {
        self.stats.clone()
    }

    /// Pump a source into the worlds until it ends or the governor shuts down
    pub fn attach_source(&mut self, source: Box<dyn SignalSource>) {
        let task = tokio::spawn(pump(source, self.router(), self.shutdown_tx.subscribe()));
        self.sources.push(task);
    }

    /// Wait for the next world to halt; `None` once no world is left running
    pub async fn next_halt(&mut self) -> Option<GovernorError> {
        self.halts.recv().await
    }

    /// Stop intake, drain every world, then flush the outbound queue within the timeout
    pub async fn shutdown(self) -> ShutdownReport {
        info!("🛑 Initiating graceful shutdown...");
        self.shutdown_tx.send_replace(true);

        for result in join_all(self.sources).await {
            if let Err(e) = result {
                warn!("signal source task failed: {}", e);
            }
        }
        for result in join_all(self.schedulers).await {
            if let Err(e) = result {
                warn!("poll scheduler task failed: {}", e);
            }
        }

        let (ids, tasks): (Vec<_>, Vec<_>) = self.worlds.into_iter().unzip();
        let mut worlds = Vec::new();
        let mut halted = Vec::new();
        for (world_id, result) in ids.into_iter().zip(join_all(tasks).await) {
            match result {
                Ok(Ok(state)) => worlds.push(state),
                Ok(Err(e)) => halted.push(e),
                Err(e) => {
                    error!(world_id, "decision loop task failed: {}", e);
                    halted.push(GovernorError::invariant(world_id, e.to_string()));
                }
            }
        }

        self.outbound.close();
        let pending = self.outbound.len();
        let mut dispatcher = self.dispatcher;
        let flushed = match tokio::time::timeout(self.flush_timeout, &mut dispatcher).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("outbound dispatcher failed: {}", e);
                false
            }
            Err(_) => {
                warn!(
                    pending = self.outbound.len(),
                    "outbound flush timed out, abandoning undelivered events"
                );
                dispatcher.abort();
                false
            }
        };

        let stats = self.stats.snapshot();
        info!(
            pending_at_close = pending,
            dropped = self.outbound.dropped(),
            flushed,
            "✅ Shutdown completed"
        );

        ShutdownReport {
            stats,
            worlds,
            halted,
            flushed,
        }
    }
}

/// Helper function to build a governor from configuration: loads the reference
/// data, initializes the outputs and the Census client, and starts every world
pub async fn create_governor_from_config(
    config: &GovernorConfig,
) -> Result<TerritoryGovernor, Box<dyn std::error::Error>> {
    let catalog = {
        let conn = Connection::open(&config.reference.database_path)?;
        initialize_schema(&conn)?;
        Arc::new(Catalog::load(&conn)?)
    };
    if catalog.worlds().is_empty() {
        warn!(
            "no tracked worlds in {}",
            config.reference.database_path.display()
        );
    }

    let mut outputs = OutputManager::new(&config.outputs).map_err(|e| e.to_string())?;
    outputs.initialize().await.map_err(|e| e.to_string())?;

    let poll_client: Option<Arc<dyn PollClient>> = if config.polling.enabled {
        Some(Arc::new(CensusPollClient::new(&config.polling, catalog.clone())?))
    } else {
        None
    };

    Ok(TerritoryGovernor::start(config, catalog, outputs, poll_client)?)
}
