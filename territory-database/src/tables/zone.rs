/*!
Zones (continents), their anchor regions, and the persisted lock state per world.
*/

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Result};

use crate::{
    RegionId, WorldId, ZoneId,
    error::table::TableError,
    util::{dates::to_unix_seconds, faction::Faction},
};

/// Static zone definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    /// Warpgates and other anchor regions whose collective ownership decides the lock
    pub anchors: BTreeSet<RegionId>,
}

impl Zone {
    pub fn new(id: ZoneId, name: impl Into<String>, anchors: impl IntoIterator<Item = RegionId>) -> Self {
        Self {
            id,
            name: name.into(),
            anchors: anchors.into_iter().collect(),
        }
    }

    /// Fetch all static zones that are not hidden, including their anchor sets
    pub fn tracked(conn: &Connection) -> Result<Vec<Zone>> {
        let mut stmt = conn.prepare("SELECT id, name FROM zone WHERE hidden = 0 ORDER BY id")?;
        let mut zones = stmt
            .query_map([], |row| Ok(Zone::new(row.get(0)?, row.get::<_, String>(1)?, Vec::<RegionId>::new())))?
            .collect::<Result<Vec<_>>>()?;

        let mut anchors_stmt = conn.prepare("SELECT zone_id, region_id FROM zone_anchor")?;
        let anchors = anchors_stmt.query_map([], |row| {
            Ok((row.get::<_, ZoneId>(0)?, row.get::<_, RegionId>(1)?))
        })?;

        let mut by_zone: HashMap<ZoneId, BTreeSet<RegionId>> = HashMap::new();
        for anchor in anchors {
            let (zone_id, region_id) = anchor?;
            by_zone.entry(zone_id).or_default().insert(region_id);
        }
        for zone in &mut zones {
            if let Some(set) = by_zone.remove(&zone.id) {
                zone.anchors = set;
            }
        }
        Ok(zones)
    }

    /// Write the zone row only; anchors reference regions, which reference the zone
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO zone (id, name, hidden) VALUES (?1, ?2, 0)",
            (self.id, &self.name),
        )?;
        Ok(())
    }

    /// Write the anchor set. The anchored regions must already exist.
    pub fn insert_anchors(&self, conn: &Connection) -> Result<()> {
        for anchor in &self.anchors {
            conn.execute(
                "INSERT OR IGNORE INTO zone_anchor (zone_id, region_id) VALUES (?1, ?2)",
                (self.id, anchor),
            )?;
        }
        Ok(())
    }
}

/// Persisted lock state of a zone on one world
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneLockRow {
    pub zone_id: ZoneId,
    pub world_id: WorldId,
    /// `None` when the zone is unlocked
    pub locked_by: Option<Faction>,
    pub updated_at: DateTime<Utc>,
}

impl ZoneLockRow {
    /// Idempotent upsert keyed by `(zone_id, world_id)`
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO zone_lock (zone_id, world_id, locked_faction_id, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (zone_id, world_id) DO UPDATE SET
                locked_faction_id = excluded.locked_faction_id,
                updated_at = excluded.updated_at",
            (
                self.zone_id,
                self.world_id,
                self.locked_by.map(Faction::id),
                to_unix_seconds(&self.updated_at),
            ),
        )?;
        Ok(())
    }

    /// Load every zone currently recorded as locked, keyed by `(zone_id, world_id)`
    pub fn load_locked(conn: &Connection) -> std::result::Result<HashMap<(ZoneId, WorldId), Faction>, TableError> {
        let mut stmt = conn.prepare(
            "SELECT zone_id, world_id, locked_faction_id FROM zone_lock
             WHERE locked_faction_id IS NOT NULL AND locked_faction_id != 0",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, ZoneId>(0)?,
                row.get::<_, WorldId>(1)?,
                row.get::<_, u32>(2)?,
            ))
        })?;

        let mut locks = HashMap::new();
        for row in rows {
            let (zone_id, world_id, faction_id) = row?;
            locks.insert((zone_id, world_id), Faction::try_from(faction_id)?);
        }
        Ok(locks)
    }
}
