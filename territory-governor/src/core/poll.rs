/*!
Periodic map snapshots diffed against the store to recover from lost stream events
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_stream::{Stream, StreamExt, wrappers::IntervalStream};
use tracing::{debug, info, warn};

use territory_database::{Catalog, Faction, RegionId, WorldId};

use crate::core::{
    census,
    config::PollingConfig,
    engine::WorldCommand,
    error::GovernorError,
    signal::{CaptureSignal, SourceKind},
    stats::WorldStats,
    store::{OwnershipSnapshot, RegionDigest},
};

/// Full ownership picture of one world as reported by the map endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapDigest {
    pub world_id: WorldId,
    pub regions: HashMap<RegionId, RegionDigest>,
}

/// Source of full per-world map snapshots
#[async_trait]
pub trait PollClient: Send + Sync {
    async fn fetch_map(&self, world_id: WorldId) -> Result<MapDigest, GovernorError>;
}

/// Commands that bring the store in line with a polled digest.
///
/// Availability changes come first so a re-enabled region can take the ownership
/// correction that follows. Regions the store does not know are skipped.
pub fn diff_snapshot(
    world_id: WorldId,
    snapshot: &OwnershipSnapshot,
    digest: &MapDigest,
    observed_at: DateTime<Utc>,
) -> Vec<WorldCommand> {
    let mut remote: Vec<_> = digest.regions.iter().collect();
    remote.sort_by_key(|(region_id, _)| **region_id);

    let mut availability = Vec::new();
    let mut corrections = Vec::new();

    for (&region_id, remote) in remote {
        let Some(local) = snapshot.get(&region_id) else {
            continue;
        };

        if remote.enabled != local.enabled {
            availability.push(WorldCommand::Availability {
                region_id,
                enabled: remote.enabled,
            });
        }
        if remote.enabled && remote.owner != local.owner {
            corrections.push(WorldCommand::Signal(CaptureSignal {
                source: SourceKind::PollDiff,
                world_id,
                region_id,
                zone_id: None,
                faction: remote.owner,
                outfit_id: None,
                capture_time: None,
                received_at: observed_at,
            }));
        }
    }

    availability.extend(corrections);
    availability
}

/// Polls one world on a fixed interval and feeds corrections into its queue
pub struct PollScheduler {
    world_id: WorldId,
    interval: Duration,
    client: Arc<dyn PollClient>,
    snapshot: watch::Receiver<Arc<OwnershipSnapshot>>,
    commands: mpsc::Sender<WorldCommand>,
    stats: Arc<WorldStats>,
}

impl PollScheduler {
    pub fn new(
        world_id: WorldId,
        interval: Duration,
        client: Arc<dyn PollClient>,
        snapshot: watch::Receiver<Arc<OwnershipSnapshot>>,
        commands: mpsc::Sender<WorldCommand>,
        stats: Arc<WorldStats>,
    ) -> Self {
        Self {
            world_id,
            interval,
            client,
            snapshot,
            commands,
            stats,
        }
    }

    /// Fetch one snapshot and diff it against the latest published store state
    pub async fn poll_once(&self) -> Result<Vec<WorldCommand>, GovernorError> {
        let digest = self.client.fetch_map(self.world_id).await?;
        let snapshot = Arc::clone(&self.snapshot.borrow());
        Ok(diff_snapshot(self.world_id, &snapshot, &digest, Utc::now()))
    }

    /// Correction batches, one per successful tick. The first tick fires immediately.
    pub fn corrections(&self) -> impl Stream<Item = Vec<WorldCommand>> + '_ {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        async_stream::stream! {
            while ticks.next().await.is_some() {
                match self.poll_once().await {
                    Ok(commands) => yield commands,
                    Err(e) => {
                        self.stats.record_poll_failure();
                        warn!(world_id = self.world_id, "map poll failed: {}", e);
                    }
                }
            }
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(world_id = self.world_id, interval = ?self.interval, "poll scheduler started");
        let corrections = self.corrections();
        tokio::pin!(corrections);

        'poll: loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                batch = corrections.next() => {
                    let Some(batch) = batch else { break };
                    if !batch.is_empty() {
                        debug!(world_id = self.world_id, corrections = batch.len(), "map differs from store");
                        self.stats.record_poll_corrections(batch.len());
                    }
                    for command in batch {
                        if self.commands.send(command).await.is_err() {
                            warn!(world_id = self.world_id, "world queue closed, stopping poll scheduler");
                            break 'poll;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(world_id = self.world_id, "poll scheduler stopped");
    }
}

#[derive(Debug, Deserialize)]
struct MapResponse {
    map_list: Option<Vec<MapEntry>>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MapEntry {
    #[serde(rename = "Regions")]
    regions: MapRegions,
}

#[derive(Debug, Deserialize)]
struct MapRegions {
    #[serde(rename = "Row", default)]
    rows: Vec<MapRow>,
}

#[derive(Debug, Deserialize)]
struct MapRow {
    #[serde(rename = "RowData")]
    data: MapRowData,
}

#[derive(Debug, Deserialize)]
struct MapRowData {
    #[serde(rename = "RegionId", deserialize_with = "census::number")]
    region_id: u64,
    #[serde(rename = "FactionId", deserialize_with = "census::number")]
    faction_id: u64,
}

/// Build a digest from a Census `map` response body.
///
/// Every listed region is enabled. Rows with an unknown faction are skipped.
pub fn parse_map(world_id: WorldId, body: &str) -> Result<MapDigest, GovernorError> {
    let origin = || format!("census map world {world_id}");
    let response: MapResponse =
        serde_json::from_str(body).map_err(|e| GovernorError::TransportFailure {
            origin: origin(),
            reason: format!("unreadable response: {e}"),
        })?;

    let entries = match (response.map_list, response.error) {
        (Some(entries), _) => entries,
        (None, reason) => {
            return Err(GovernorError::TransportFailure {
                origin: origin(),
                reason: reason.unwrap_or_else(|| "response has no map_list".to_string()),
            });
        }
    };

    let mut regions = HashMap::new();
    for row in entries.iter().flat_map(|entry| &entry.regions.rows) {
        let (Ok(region_id), Ok(faction_id)) = (
            RegionId::try_from(row.data.region_id),
            u32::try_from(row.data.faction_id),
        ) else {
            warn!(world_id, region_id = row.data.region_id, "map row id out of range");
            continue;
        };
        match Faction::try_from(faction_id) {
            Ok(owner) => {
                regions.insert(
                    region_id,
                    RegionDigest {
                        owner,
                        enabled: true,
                    },
                );
            }
            Err(e) => warn!(world_id, region_id, "skipping map row: {}", e),
        }
    }

    Ok(MapDigest { world_id, regions })
}

/// Census REST client for the `map` collection
pub struct CensusPollClient {
    client: reqwest::Client,
    base_url: String,
    service_id: String,
    catalog: Arc<Catalog>,
}

impl CensusPollClient {
    pub fn new(config: &PollingConfig, catalog: Arc<Catalog>) -> Result<Self, GovernorError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GovernorError::TransportFailure {
                origin: "census".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.census_base_url.trim_end_matches('/').to_string(),
            service_id: config.service_id.clone(),
            catalog,
        })
    }

    /// Map endpoint for a world, covering every tracked zone
    pub fn map_url(&self, world_id: WorldId) -> Result<String, GovernorError> {
        let world = self
            .catalog
            .world(world_id)
            .ok_or(GovernorError::WorldUnavailable(world_id))?;
        let zone_ids = self
            .catalog
            .zones()
            .map(|zone| zone.id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        Ok(format!(
            "{}/{}/get/{}/map/?world_id={}&zone_ids={}",
            self.base_url, self.service_id, world.namespace, world_id, zone_ids
        ))
    }
}

#[async_trait]
impl PollClient for CensusPollClient {
    async fn fetch_map(&self, world_id: WorldId) -> Result<MapDigest, GovernorError> {
        let url = self.map_url(world_id)?;
        let failure = |reason: String| GovernorError::TransportFailure {
            origin: format!("census map world {world_id}"),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failure(format!("HTTP {}", response.status())));
        }

        let body = response.text().await.map_err(|e| failure(e.to_string()))?;
        parse_map(world_id, &body)
    }
}
