/*!
Startup view of the reference data: tracked worlds, static zones with their anchor
sets, the regions inside them, and the last known ownership and lock state.
*/

use std::collections::{BTreeMap, HashMap};

use rusqlite::Connection;

use crate::{
    FacilityId, RegionId, WorldId, ZoneId,
    error::table::TableError,
    tables::{
        region::{MapRegion, RegionOwnership},
        world::World,
        zone::{Zone, ZoneLockRow},
    },
    util::faction::Faction,
};

/// Immutable reference data the governor is built from
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    worlds: Vec<World>,
    zones: BTreeMap<ZoneId, Zone>,
    regions: BTreeMap<RegionId, MapRegion>,
    facilities: HashMap<FacilityId, RegionId>,
    ownership: HashMap<WorldId, HashMap<RegionId, RegionOwnership>>,
    locks: HashMap<(ZoneId, WorldId), Faction>,
}

impl Catalog {
    /// Assemble a catalog from static definitions.
    ///
    /// Regions of zones that are not listed are dropped, and every anchor must name
    /// one of the remaining regions.
    pub fn new(
        worlds: Vec<World>,
        zones: Vec<Zone>,
        regions: Vec<MapRegion>,
    ) -> Result<Self, TableError> {
        let zones: BTreeMap<ZoneId, Zone> = zones.into_iter().map(|z| (z.id, z)).collect();
        let regions: BTreeMap<RegionId, MapRegion> = regions
            .into_iter()
            .filter(|r| zones.contains_key(&r.zone_id))
            .map(|r| (r.id, r))
            .collect();

        for zone in zones.values() {
            for anchor in &zone.anchors {
                match regions.get(anchor) {
                    Some(region) if region.zone_id == zone.id => {}
                    _ => return Err(TableError::DanglingRegion(*anchor)),
                }
            }
        }

        let facilities = regions
            .values()
            .filter_map(|r| r.facility_id.map(|f| (f, r.id)))
            .collect();

        Ok(Self {
            worlds,
            zones,
            regions,
            facilities,
            ownership: HashMap::new(),
            locks: HashMap::new(),
        })
    }

    /// Load the full catalog for every tracked world
    pub fn load(conn: &Connection) -> Result<Self, TableError> {
        let worlds = World::tracked(conn)?;
        let mut catalog = Catalog::new(worlds, Zone::tracked(conn)?, MapRegion::tracked(conn)?)?;

        for world_id in catalog.world_ids() {
            let rows = RegionOwnership::load_world(conn, world_id)?;
            for row in rows.into_values() {
                catalog = catalog.with_ownership(row);
            }
        }
        for ((zone_id, world_id), faction) in ZoneLockRow::load_locked(conn)? {
            catalog = catalog.with_lock(zone_id, world_id, faction);
        }
        Ok(catalog)
    }

    /// Seed last known ownership; rows for unknown regions are skipped
    pub fn with_ownership(mut self, row: RegionOwnership) -> Self {
        if self.regions.contains_key(&row.region_id) {
            self.ownership
                .entry(row.world_id)
                .or_default()
                .insert(row.region_id, row);
        }
        self
    }

    /// Seed the recorded lock of a zone on a world
    pub fn with_lock(mut self, zone_id: ZoneId, world_id: WorldId, faction: Faction) -> Self {
        if self.zones.contains_key(&zone_id) && !faction.is_neutral() {
            self.locks.insert((zone_id, world_id), faction);
        }
        self
    }

    pub fn worlds(&self) -> &[World] {
        &self.worlds
    }

    pub fn world_ids(&self) -> Vec<WorldId> {
        self.worlds.iter().map(|w| w.id).collect()
    }

    pub fn world(&self, world_id: WorldId) -> Option<&World> {
        self.worlds.iter().find(|w| w.id == world_id)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn zone(&self, zone_id: ZoneId) -> Option<&Zone> {
        self.zones.get(&zone_id)
    }

    pub fn regions(&self) -> impl Iterator<Item = &MapRegion> {
        self.regions.values()
    }

    pub fn region(&self, region_id: RegionId) -> Option<&MapRegion> {
        self.regions.get(&region_id)
    }

    /// Resolve the map region a facility belongs to
    pub fn region_for_facility(&self, facility_id: FacilityId) -> Option<RegionId> {
        self.facilities.get(&facility_id).copied()
    }

    /// Last known ownership, or the neutral default when nothing was recorded
    pub fn ownership(&self, world_id: WorldId, region_id: RegionId) -> RegionOwnership {
        self.ownership
            .get(&world_id)
            .and_then(|rows| rows.get(&region_id))
            .cloned()
            .unwrap_or_else(|| RegionOwnership::neutral(region_id, world_id))
    }

    pub fn lock(&self, zone_id: ZoneId, world_id: WorldId) -> Option<Faction> {
        self.locks.get(&(zone_id, world_id)).copied()
    }
}
