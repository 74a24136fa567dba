/*!
Map regions (facilities) and their per-world ownership rows.
*/

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Result};

use crate::{
    FacilityId, OutfitId, RegionId, WorldId, ZoneId,
    error::table::TableError,
    util::{
        dates::{optional_from_unix_seconds, to_unix_seconds},
        faction::Faction,
    },
};

/// Static definition of a capturable map region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRegion {
    pub id: RegionId,
    pub zone_id: ZoneId,
    /// Facility the region is built around; the event stream reports captures by facility
    pub facility_id: Option<FacilityId>,
    pub name: String,
}

impl MapRegion {
    pub fn new(
        id: RegionId,
        zone_id: ZoneId,
        facility_id: Option<FacilityId>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            zone_id,
            facility_id,
            name: name.into(),
        }
    }

    /// Fetch all regions belonging to non-hidden zones
    pub fn tracked(conn: &Connection) -> Result<Vec<MapRegion>> {
        let mut stmt = conn.prepare(
            "SELECT r.id, r.zone_id, r.facility_id, r.name
             FROM map_region r
             JOIN zone z ON z.id = r.zone_id
             WHERE z.hidden = 0
             ORDER BY r.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(MapRegion {
                id: row.get(0)?,
                zone_id: row.get(1)?,
                facility_id: row.get(2)?,
                name: row.get(3)?,
            })
        })?;
        rows.collect()
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO map_region (id, zone_id, facility_id, name) VALUES (?1, ?2, ?3, ?4)",
            (self.id, self.zone_id, self.facility_id, &self.name),
        )?;
        Ok(())
    }
}

/// Last known ownership of a region on one world
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionOwnership {
    pub region_id: RegionId,
    pub world_id: WorldId,
    pub enabled: bool,
    pub owner: Faction,
    pub outfit_id: Option<OutfitId>,
    /// When the current owner took the region, possibly approximate
    pub owned_since: Option<DateTime<Utc>>,
    /// Latest exact capture time seen for the region
    pub last_capture_time: Option<DateTime<Utc>>,
}

impl RegionOwnership {
    /// Ownership of a region nobody has reported on yet
    pub fn neutral(region_id: RegionId, world_id: WorldId) -> Self {
        Self {
            region_id,
            world_id,
            enabled: true,
            owner: Faction::None,
            outfit_id: None,
            owned_since: None,
            last_capture_time: None,
        }
    }

    /// Idempotent upsert keyed by `(region_id, world_id)`
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO region_ownership
                (region_id, world_id, enabled, owner_faction_id, owner_outfit_id, owned_since, last_capture_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (region_id, world_id) DO UPDATE SET
                enabled = excluded.enabled,
                owner_faction_id = excluded.owner_faction_id,
                owner_outfit_id = excluded.owner_outfit_id,
                owned_since = excluded.owned_since,
                last_capture_time = excluded.last_capture_time",
            (
                self.region_id,
                self.world_id,
                self.enabled,
                self.owner.id(),
                self.outfit_id,
                self.owned_since.as_ref().map(to_unix_seconds),
                self.last_capture_time.as_ref().map(to_unix_seconds),
            ),
        )?;
        Ok(())
    }

    /// Record availability alone, leaving the ownership columns untouched
    pub fn upsert_enabled(
        conn: &Connection,
        region_id: RegionId,
        world_id: WorldId,
        enabled: bool,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO region_ownership (region_id, world_id, enabled)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (region_id, world_id) DO UPDATE SET enabled = excluded.enabled",
            (region_id, world_id, enabled),
        )?;
        Ok(())
    }

    /// Load every ownership row recorded for a world
    pub fn load_world(
        conn: &Connection,
        world_id: WorldId,
    ) -> std::result::Result<HashMap<RegionId, RegionOwnership>, TableError> {
        let mut stmt = conn.prepare(
            "SELECT region_id, enabled, owner_faction_id, owner_outfit_id, owned_since, last_capture_time
             FROM region_ownership WHERE world_id = ?1",
        )?;
        let rows = stmt.query_map([world_id], |row| {
            Ok((
                row.get::<_, RegionId>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, Option<OutfitId>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })?;

        let mut ownership = HashMap::new();
        for row in rows {
            let (region_id, enabled, faction_id, outfit_id, owned_since, last_capture) = row?;
            ownership.insert(
                region_id,
                RegionOwnership {
                    region_id,
                    world_id,
                    enabled,
                    owner: Faction::try_from(faction_id)?,
                    outfit_id,
                    owned_since: optional_from_unix_seconds(owned_since)?,
                    last_capture_time: optional_from_unix_seconds(last_capture)?,
                },
            );
        }
        Ok(ownership)
    }
}
