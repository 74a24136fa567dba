/*!
Events produced for the downstream sink
*/

use chrono::{DateTime, Utc};
use serde::Serialize;

use territory_database::{Faction, OutfitId, RegionId, WorldId, ZoneId};

use crate::core::signal::SourceKind;

/// An accepted, canonical ownership transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureEvent {
    pub region_id: RegionId,
    pub world_id: WorldId,
    pub zone_id: ZoneId,
    pub old_faction: Faction,
    pub new_faction: Faction,
    pub outfit_id: Option<OutfitId>,
    /// Exact capture time, or the receipt time when `approximate` is set
    pub capture_time: DateTime<Utc>,
    pub approximate: bool,
    /// Region's exact-time floor after the transition
    pub last_capture_time: Option<DateTime<Utc>>,
    pub source: SourceKind,
    pub accepted_at: DateTime<Utc>,
}

/// A zone changed between locked and unlocked, or was locked by a different faction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneLockEvent {
    pub zone_id: ZoneId,
    pub world_id: WorldId,
    pub locked: bool,
    /// Owning faction while locked
    pub faction: Option<Faction>,
    pub timestamp: DateTime<Utc>,
}

/// A map snapshot enabled or disabled a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityEvent {
    pub region_id: RegionId,
    pub world_id: WorldId,
    pub zone_id: ZoneId,
    pub enabled: bool,
    pub timestamp: DateTime<Utc>,
}

/// Everything the outbound queue carries
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    Capture(CaptureEvent),
    ZoneLock(ZoneLockEvent),
    Availability(AvailabilityEvent),
}

impl OutputEvent {
    pub fn world_id(&self) -> WorldId {
        match self {
            OutputEvent::Capture(event) => event.world_id,
            OutputEvent::ZoneLock(event) => event.world_id,
            OutputEvent::Availability(event) => event.world_id,
        }
    }
}
