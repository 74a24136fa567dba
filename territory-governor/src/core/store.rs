/*!
Authoritative in-memory region and zone state for a single world
*/

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use territory_database::{Catalog, Faction, OutfitId, RegionId, WorldId, ZoneId};

use crate::core::error::GovernorError;

/// Current state of one region on one world
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionState {
    pub region_id: RegionId,
    pub zone_id: ZoneId,
    pub enabled: bool,
    pub owner: Faction,
    pub outfit_id: Option<OutfitId>,
    /// Latest exact capture time; never moves backward
    pub last_capture_time: Option<DateTime<Utc>>,
    pub owned_since: Option<DateTime<Utc>>,
}

/// Lock state of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "faction", rename_all = "snake_case")]
pub enum LockState {
    Unlocked,
    Locked(Faction),
}

impl LockState {
    pub fn faction(&self) -> Option<Faction> {
        match self {
            LockState::Unlocked => None,
            LockState::Locked(faction) => Some(*faction),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneState {
    pub zone_id: ZoneId,
    pub anchors: BTreeSet<RegionId>,
    pub lock: LockState,
}

/// Owner and availability of a region, as compared by the poll scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDigest {
    pub owner: Faction,
    pub enabled: bool,
}

/// Read-only view of a world's ownership, published after every mutation
pub type OwnershipSnapshot = HashMap<RegionId, RegionDigest>;

/// New ownership fields for an accepted capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTransition {
    pub owner: Faction,
    pub outfit_id: Option<OutfitId>,
    pub last_capture_time: Option<DateTime<Utc>>,
    pub owned_since: DateTime<Utc>,
}

/// Region and zone state of one world.
///
/// Owned by that world's decision loop, which is the only writer. Other tasks
/// observe it through [`WorldState::subscribe`].
#[derive(Debug)]
pub struct WorldState {
    world_id: WorldId,
    regions: HashMap<RegionId, RegionState>,
    zones: BTreeMap<ZoneId, ZoneState>,
    snapshot_tx: watch::Sender<Arc<OwnershipSnapshot>>,
}

impl WorldState {
    /// Build the state of a world from static data and its last known ownership
    pub fn from_catalog(catalog: &Catalog, world_id: WorldId) -> Result<Self, GovernorError> {
        if catalog.world(world_id).is_none() {
            return Err(GovernorError::invariant(
                world_id,
                "world is not part of the reference data",
            ));
        }

        let regions: HashMap<RegionId, RegionState> = catalog
            .regions()
            .map(|region| {
                let known = catalog.ownership(world_id, region.id);
                let state = RegionState {
                    region_id: region.id,
                    zone_id: region.zone_id,
                    enabled: known.enabled,
                    owner: known.owner,
                    outfit_id: known.outfit_id,
                    last_capture_time: known.last_capture_time,
                    owned_since: known.owned_since,
                };
                (region.id, state)
            })
            .collect();

        let zones = catalog
            .zones()
            .map(|zone| {
                let lock = catalog
                    .lock(zone.id, world_id)
                    .map_or(LockState::Unlocked, LockState::Locked);
                let state = ZoneState {
                    zone_id: zone.id,
                    anchors: zone.anchors.clone(),
                    lock,
                };
                (zone.id, state)
            })
            .collect();

        let snapshot = Arc::new(digest(&regions));
        let (snapshot_tx, _) = watch::channel(snapshot);

        debug!(world_id, regions = regions.len(), "world state loaded");
        Ok(Self {
            world_id,
            regions,
            zones,
            snapshot_tx,
        })
    }

    pub fn world_id(&self) -> WorldId {
        self.world_id
    }

    pub fn region(&self, region_id: RegionId) -> Option<&RegionState> {
        self.regions.get(&region_id)
    }

    pub fn regions(&self) -> impl Iterator<Item = &RegionState> {
        self.regions.values()
    }

    pub fn zone(&self, zone_id: ZoneId) -> Option<&ZoneState> {
        self.zones.get(&zone_id)
    }

    pub fn zones(&self) -> impl Iterator<Item = &ZoneState> {
        self.zones.values()
    }

    /// Apply an accepted capture, returning the state it replaced
    pub fn apply(
        &mut self,
        region_id: RegionId,
        transition: RegionTransition,
    ) -> Result<RegionState, GovernorError> {
        let region = self.region_mut(region_id)?;
        let previous = region.clone();

        region.owner = transition.owner;
        region.outfit_id = transition.outfit_id;
        region.last_capture_time = transition.last_capture_time;
        region.owned_since = Some(transition.owned_since);

        self.publish();
        Ok(previous)
    }

    /// Enable or disable a region; returns whether anything changed
    pub fn set_enabled(&mut self, region_id: RegionId, enabled: bool) -> Result<bool, GovernorError> {
        let region = self.region_mut(region_id)?;
        if region.enabled == enabled {
            return Ok(false);
        }
        region.enabled = enabled;
        self.publish();
        Ok(true)
    }

    /// Record a zone's lock state, returning the previous one
    pub fn set_lock(&mut self, zone_id: ZoneId, lock: LockState) -> Result<LockState, GovernorError> {
        let world_id = self.world_id;
        let zone = self
            .zones
            .get_mut(&zone_id)
            .ok_or_else(|| GovernorError::invariant(world_id, format!("unknown zone {zone_id}")))?;
        Ok(std::mem::replace(&mut zone.lock, lock))
    }

    /// Current owner and availability of every region
    pub fn snapshot(&self) -> OwnershipSnapshot {
        digest(&self.regions)
    }

    /// Watch the ownership snapshot from another task
    pub fn subscribe(&self) -> watch::Receiver<Arc<OwnershipSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    fn region_mut(&mut self, region_id: RegionId) -> Result<&mut RegionState, GovernorError> {
        let world_id = self.world_id;
        self.regions
            .get_mut(&region_id)
            .ok_or_else(|| GovernorError::invariant(world_id, format!("unknown region {region_id}")))
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(Arc::new(self.snapshot()));
    }
}

fn digest(regions: &HashMap<RegionId, RegionState>) -> OwnershipSnapshot {
    regions
        .values()
        .map(|r| {
            let digest = RegionDigest {
                owner: r.owner,
                enabled: r.enabled,
            };
            (r.region_id, digest)
        })
        .collect()
}
