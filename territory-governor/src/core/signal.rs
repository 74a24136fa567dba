/*!
Signal normalization: turns raw payloads from any source into canonical capture signals
*/

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use territory_database::{
    Catalog, Faction, OutfitId, RegionId, WorldId, ZoneId, util::dates::from_unix_seconds,
};

use crate::core::{census, error::GovernorError};

/// Where a capture signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Facility control events with an exact timestamp and outfit attribution
    PrimaryStream,
    /// Player capture events; no trustworthy time, faction taken from the capturer
    FallbackStream,
    /// Differences found between a polled map snapshot and the store
    PollDiff,
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceKind::PrimaryStream => "primary_stream",
            SourceKind::FallbackStream => "fallback_stream",
            SourceKind::PollDiff => "poll_diff",
        };
        write!(f, "{name}")
    }
}

/// Capture time attached to a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "precision", content = "at", rename_all = "snake_case")]
pub enum CaptureTime {
    Exact(DateTime<Utc>),
    /// Off by at most one poll interval
    Approximate(DateTime<Utc>),
}

impl CaptureTime {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            CaptureTime::Exact(at) | CaptureTime::Approximate(at) => *at,
        }
    }

    pub fn exact(&self) -> Option<DateTime<Utc>> {
        match self {
            CaptureTime::Exact(at) => Some(*at),
            CaptureTime::Approximate(_) => None,
        }
    }
}

/// Canonical, source-tagged report of an ownership change candidate
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSignal {
    pub source: SourceKind,
    pub world_id: WorldId,
    pub region_id: RegionId,
    /// Zone the source reported the capture in, if it said
    pub zone_id: Option<ZoneId>,
    pub faction: Faction,
    pub outfit_id: Option<OutfitId>,
    pub capture_time: Option<CaptureTime>,
    pub received_at: DateTime<Utc>,
}

/// Raw capture payload as delivered by the event stream or map endpoint.
///
/// Every field is optional on the wire; which ones are required depends on the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawCapturePayload {
    #[serde(default, deserialize_with = "census::optional_number")]
    pub world_id: Option<u64>,
    #[serde(default, deserialize_with = "census::optional_number")]
    pub zone_id: Option<u64>,
    #[serde(default, deserialize_with = "census::optional_number")]
    pub facility_id: Option<u64>,
    #[serde(default, deserialize_with = "census::optional_number")]
    pub region_id: Option<u64>,
    /// Faction named by the event as the new owner
    #[serde(default, deserialize_with = "census::optional_number")]
    pub new_faction_id: Option<u64>,
    /// Faction of the capturing entity itself
    #[serde(default, alias = "team_id", deserialize_with = "census::optional_number")]
    pub faction_id: Option<u64>,
    #[serde(default, deserialize_with = "census::optional_number")]
    pub outfit_id: Option<u64>,
    /// Unix seconds
    #[serde(default, deserialize_with = "census::optional_number")]
    pub timestamp: Option<u64>,
}

/// A raw payload tagged with the source that delivered it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourcedPayload {
    pub source: SourceKind,
    pub payload: RawCapturePayload,
}

/// Validates raw payloads against the reference data and maps them to [`CaptureSignal`]s.
///
/// Pure mapping; it never touches world state.
#[derive(Debug, Clone)]
pub struct SignalNormalizer {
    catalog: Arc<Catalog>,
}

impl SignalNormalizer {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn normalize(
        &self,
        source: SourceKind,
        payload: &RawCapturePayload,
        received_at: DateTime<Utc>,
    ) -> Result<CaptureSignal, GovernorError> {
        let world_id = narrow("world_id", required("world_id", payload.world_id)?)?;
        if self.catalog.world(world_id).is_none() {
            return Err(GovernorError::malformed(format!(
                "world {world_id} is not tracked"
            )));
        }

        let region_id = self.resolve_region(payload)?;
        let zone_id = payload.zone_id.map(|z| narrow("zone_id", z)).transpose()?;

        let faction_id = match source {
            SourceKind::PrimaryStream | SourceKind::PollDiff => {
                required("new_faction_id", payload.new_faction_id)?
            }
            SourceKind::FallbackStream => required("faction_id", payload.faction_id)?,
        };
        let faction = narrow("faction id", faction_id)
            .and_then(|id| Faction::try_from(id).map_err(|why| GovernorError::malformed(why.to_string())))?;

        let outfit_id = match source {
            SourceKind::PrimaryStream => payload.outfit_id.filter(|&outfit| outfit != 0),
            SourceKind::FallbackStream | SourceKind::PollDiff => None,
        };

        let capture_time = match source {
            SourceKind::PrimaryStream => Some(CaptureTime::Exact(timestamp(required(
                "timestamp",
                payload.timestamp,
            )?)?)),
            SourceKind::FallbackStream => None,
            SourceKind::PollDiff => payload
                .timestamp
                .map(timestamp)
                .transpose()?
                .map(CaptureTime::Approximate),
        };

        Ok(CaptureSignal {
            source,
            world_id,
            region_id,
            zone_id,
            faction,
            outfit_id,
            capture_time,
            received_at,
        })
    }

    fn resolve_region(&self, payload: &RawCapturePayload) -> Result<RegionId, GovernorError> {
        let region_id = match (payload.region_id, payload.facility_id) {
            (Some(region_id), _) => narrow("region_id", region_id)?,
            (None, Some(facility_id)) => {
                let facility_id = narrow("facility_id", facility_id)?;
                self.catalog
                    .region_for_facility(facility_id)
                    .ok_or_else(|| {
                        GovernorError::malformed(format!("unknown facility {facility_id}"))
                    })?
            }
            (None, None) => {
                return Err(GovernorError::malformed(
                    "missing region_id and facility_id",
                ));
            }
        };

        if self.catalog.region(region_id).is_none() {
            return Err(GovernorError::malformed(format!(
                "unknown region {region_id}"
            )));
        }
        Ok(region_id)
    }
}

fn required(field: &str, value: Option<u64>) -> Result<u64, GovernorError> {
    value.ok_or_else(|| GovernorError::malformed(format!("missing {field}")))
}

fn narrow(field: &str, value: u64) -> Result<u32, GovernorError> {
    u32::try_from(value)
        .map_err(|_| GovernorError::malformed(format!("{field} {value} is out of range")))
}

fn timestamp(seconds: u64) -> Result<DateTime<Utc>, GovernorError> {
    i64::try_from(seconds)
        .ok()
        .and_then(|seconds| from_unix_seconds(seconds).ok())
        .ok_or_else(|| GovernorError::malformed(format!("invalid timestamp {seconds}")))
}
