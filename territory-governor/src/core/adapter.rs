/*!
Event-stream adapters and routing of normalized signals to per-world queues
*/

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use territory_database::WorldId;

use crate::core::{
    engine::WorldCommand,
    error::GovernorError,
    signal::{SignalNormalizer, SourcedPayload},
    stats::GovernorStats,
};

/// Normalizes payloads and hands them to the queue of the world they name
#[derive(Clone)]
pub struct SignalRouter {
    normalizer: SignalNormalizer,
    worlds: Arc<HashMap<WorldId, mpsc::Sender<WorldCommand>>>,
    stats: Arc<GovernorStats>,
}

impl SignalRouter {
    pub fn new(
        normalizer: SignalNormalizer,
        worlds: HashMap<WorldId, mpsc::Sender<WorldCommand>>,
        stats: Arc<GovernorStats>,
    ) -> Self {
        Self {
            normalizer,
            worlds: Arc::new(worlds),
            stats,
        }
    }

    /// Normalize and enqueue one payload, waiting for room in the world's queue
    pub async fn route(&self, sourced: SourcedPayload) -> Result<(), GovernorError> {
        let signal = self
            .normalizer
            .normalize(sourced.source, &sourced.payload, Utc::now())
            .inspect_err(|e| self.reject(e))?;

        let world_id = signal.world_id;
        let queue = self
            .worlds
            .get(&world_id)
            .ok_or(GovernorError::WorldUnavailable(world_id))?;
        queue
            .send(WorldCommand::Signal(signal))
            .await
            .map_err(|_| GovernorError::WorldUnavailable(world_id))
    }

    /// Route one `{"source": .., "payload": {..}}` JSON line
    pub async fn route_line(&self, line: &str) -> Result<(), GovernorError> {
        let sourced: SourcedPayload = serde_json::from_str(line)
            .map_err(|e| GovernorError::malformed(format!("unparseable line: {e}")))
            .inspect_err(|e| self.reject(e))?;
        self.route(sourced).await
    }

    /// Count and log input that never became a signal
    pub fn reject(&self, error: &GovernorError) {
        self.stats.record_malformed();
        warn!("dropping signal: {}", error);
    }
}

/// A transport delivering raw capture payloads
#[async_trait]
pub trait SignalSource: Send {
    fn name(&self) -> &str;

    /// Next payload, or `None` once the source is exhausted
    async fn next_payload(&mut self) -> Option<Result<SourcedPayload, GovernorError>>;
}

/// Newline-delimited JSON signals from a file or stdin
pub struct JsonLinesSource {
    name: String,
    lines: Lines<Box<dyn AsyncBufRead + Unpin + Send>>,
}

impl JsonLinesSource {
    pub fn from_reader(name: impl Into<String>, reader: Box<dyn AsyncBufRead + Unpin + Send>) -> Self {
        Self {
            name: name.into(),
            lines: reader.lines(),
        }
    }

    pub fn stdin() -> Self {
        Self::from_reader("stdin", Box::new(BufReader::new(tokio::io::stdin())))
    }

    pub async fn open(path: &Path) -> Result<Self, GovernorError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| GovernorError::TransportFailure {
                origin: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_reader(
            path.display().to_string(),
            Box::new(BufReader::new(file)),
        ))
    }

    /// `-` selects stdin
    pub async fn from_input(input: &Path) -> Result<Self, GovernorError> {
        if input == Path::new("-") {
            Ok(Self::stdin())
        } else {
            Self::open(input).await
        }
    }
}

#[async_trait]
impl SignalSource for JsonLinesSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_payload(&mut self) -> Option<Result<SourcedPayload, GovernorError>> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    return Some(serde_json::from_str(&line).map_err(|e| {
                        GovernorError::malformed(format!("unparseable line: {e}"))
                    }));
                }
                Ok(None) => return None,
                Err(e) => {
                    return Some(Err(GovernorError::TransportFailure {
                        origin: self.name.clone(),
                        reason: e.to_string(),
                    }));
                }
            }
        }
    }
}

/// Feed a source into the router until it ends, fails or shutdown is requested
pub async fn pump(
    mut source: Box<dyn SignalSource>,
    router: SignalRouter,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = source.name().to_string();
    info!(source = %name, "signal source attached");
    let mut routed = 0u64;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = tokio::select! {
            next = source.next_payload() => next,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        match next {
            None => {
                info!(source = %name, "signal source exhausted");
                break;
            }
            Some(Ok(payload)) => match router.route(payload).await {
                Ok(()) => routed += 1,
                // already counted by the router
                Err(GovernorError::MalformedSignal(_)) => {}
                Err(e) => debug!(source = %name, "signal not routed: {}", e),
            },
            Some(Err(e @ GovernorError::MalformedSignal(_))) => router.reject(&e),
            Some(Err(e)) => {
                warn!(source = %name, "signal source failed: {}", e);
                break;
            }
        }
    }
    info!(source = %name, routed, "signal source detached");
}

#[cfg(test)]
mod tests {
    use territory_database::{
        Catalog, Faction,
        tables::{region::MapRegion, world::World, zone::Zone},
    };

    use super::*;
    use crate::core::signal::SourceKind;

    fn router() -> (SignalRouter, mpsc::Receiver<WorldCommand>, Arc<GovernorStats>) {
        let catalog = Catalog::new(
            vec![World::new(1, "Connery", "ps2"), World::new(17, "Emerald", "ps2")],
            vec![Zone::new(2, "Indar", [10])],
            vec![MapRegion::new(10, 2, Some(100), "Warpgate")],
        )
        .unwrap();
        let stats = Arc::new(GovernorStats::new([1, 17]));
        let (tx, rx) = mpsc::channel(8);
        let router = SignalRouter::new(
            SignalNormalizer::new(Arc::new(catalog)),
            HashMap::from([(1, tx)]),
            stats.clone(),
        );
        (router, rx, stats)
    }

    #[tokio::test]
    async fn routes_to_world_queue() {
        let (router, mut rx, _) = router();
        router
            .route_line(
                r#"{"source":"primary_stream","payload":{"world_id":"1","facility_id":"100",
                    "new_faction_id":"2","timestamp":"1665000000"}}"#,
            )
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            WorldCommand::Signal(signal) => {
                assert_eq!(signal.source, SourceKind::PrimaryStream);
                assert_eq!(signal.region_id, 10);
                assert_eq!(signal.faction, Faction::Nc);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_lines_are_counted() {
        let (router, _rx, stats) = router();
        assert!(router.route_line("not json").await.is_err());
        assert!(router
            .route_line(r#"{"source":"fallback_stream","payload":{"world_id":1,"region_id":10}}"#)
            .await
            .is_err());
        assert_eq!(stats.snapshot().malformed, 2);
    }

    #[tokio::test]
    async fn world_without_queue_is_unavailable() {
        let (router, _rx, _) = router();
        let result = router
            .route_line(r#"{"source":"fallback_stream","payload":{"world_id":17,"region_id":10,"team_id":1}}"#)
            .await;
        assert_eq!(result, Err(GovernorError::WorldUnavailable(17)));
    }

    #[tokio::test]
    async fn pump_reads_until_end_of_input() {
        let (router, mut rx, stats) = router();
        let input = concat!(
            r#"{"source":"primary_stream","payload":{"world_id":1,"region_id":10,"new_faction_id":1,"timestamp":5}}"#,
            "\n\n",
            "garbage\n",
            r#"{"source":"fallback_stream","payload":{"world_id":1,"region_id":10,"faction_id":3}}"#,
            "\n",
        );
        let source = JsonLinesSource::from_reader("test", Box::new(input.as_bytes()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        pump(Box::new(source), router, shutdown_rx).await;

        let mut received = Vec::new();
        while let Ok(command) = rx.try_recv() {
            received.push(command);
        }
        assert_eq!(received.len(), 2);
        assert_eq!(stats.snapshot().malformed, 1);
    }
}
