/*!
Zone lock derivation from anchor region ownership
*/

use chrono::{DateTime, Utc};
use tracing::info;

use territory_database::ZoneId;

use crate::core::{
    error::GovernorError,
    events::ZoneLockEvent,
    store::{LockState, WorldState, ZoneState},
};

/// Recomputes a zone's lock state after one of its regions changed
pub struct ZoneLockEvaluator;

impl ZoneLockEvaluator {
    /// Lock state implied by the current owners of the zone's anchor regions.
    ///
    /// A zone is locked when every anchor is held by the same non-neutral faction.
    /// A zone without anchors never locks.
    pub fn compute(zone: &ZoneState, state: &WorldState) -> Result<LockState, GovernorError> {
        let mut common = None;
        for anchor in &zone.anchors {
            let region = state.region(*anchor).ok_or_else(|| {
                GovernorError::invariant(
                    state.world_id(),
                    format!("anchor region {anchor} of zone {} is missing", zone.zone_id),
                )
            })?;

            if region.owner.is_neutral() {
                return Ok(LockState::Unlocked);
            }
            match common {
                None => common = Some(region.owner),
                Some(owner) if owner == region.owner => {}
                Some(_) => return Ok(LockState::Unlocked),
            }
        }
        Ok(common.map_or(LockState::Unlocked, LockState::Locked))
    }

    /// Re-evaluate a zone and record the result, returning an event only when the
    /// lock state actually changed
    pub fn evaluate(
        state: &mut WorldState,
        zone_id: ZoneId,
        now: DateTime<Utc>,
    ) -> Result<Option<ZoneLockEvent>, GovernorError> {
        let zone = state.zone(zone_id).ok_or_else(|| {
            GovernorError::invariant(state.world_id(), format!("unknown zone {zone_id}"))
        })?;

        let computed = Self::compute(zone, state)?;
        if computed == zone.lock {
            return Ok(None);
        }

        state.set_lock(zone_id, computed)?;
        let event = ZoneLockEvent {
            zone_id,
            world_id: state.world_id(),
            locked: matches!(computed, LockState::Locked(_)),
            faction: computed.faction(),
            timestamp: now,
        };

        match computed {
            LockState::Locked(faction) => {
                info!(world_id = event.world_id, zone_id, %faction, "zone locked")
            }
            LockState::Unlocked => info!(world_id = event.world_id, zone_id, "zone unlocked"),
        }
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use territory_database::{
        Catalog, Faction,
        tables::{region::MapRegion, world::World, zone::Zone},
    };

    use super::*;
    use crate::core::store::RegionTransition;

    fn state(anchors: &[u32]) -> WorldState {
        let catalog = Catalog::new(
            vec![World::new(1, "Connery", "ps2")],
            vec![Zone::new(2, "Indar", anchors.iter().copied())],
            vec![
                MapRegion::new(10, 2, None, "A"),
                MapRegion::new(11, 2, None, "B"),
                MapRegion::new(12, 2, None, "C"),
                MapRegion::new(13, 2, None, "Outpost"),
            ],
        )
        .unwrap();
        WorldState::from_catalog(&catalog, 1).unwrap()
    }

    fn capture(state: &mut WorldState, region: u32, owner: Faction) {
        state
            .apply(
                region,
                RegionTransition {
                    owner,
                    outfit_id: None,
                    last_capture_time: None,
                    owned_since: Utc::now(),
                },
            )
            .unwrap();
    }

    #[test]
    fn locks_once_when_last_anchor_matches() {
        let mut state = state(&[10, 11, 12]);
        let mut events = Vec::new();
        for region in [10, 11, 12] {
            capture(&mut state, region, Faction::Vs);
            events.extend(ZoneLockEvaluator::evaluate(&mut state, 2, Utc::now()).unwrap());
        }

        assert_eq!(events.len(), 1);
        assert!(events[0].locked);
        assert_eq!(events[0].faction, Some(Faction::Vs));

        // Non-anchor changes and re-evaluations while stable do nothing
        capture(&mut state, 13, Faction::Tr);
        assert!(ZoneLockEvaluator::evaluate(&mut state, 2, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn unlocks_once_on_mixed_ownership() {
        let mut state = state(&[10, 11, 12]);
        for region in [10, 11, 12] {
            capture(&mut state, region, Faction::Nc);
        }
        ZoneLockEvaluator::evaluate(&mut state, 2, Utc::now()).unwrap();

        capture(&mut state, 11, Faction::Tr);
        let event = ZoneLockEvaluator::evaluate(&mut state, 2, Utc::now())
            .unwrap()
            .unwrap();
        assert!(!event.locked);
        assert_eq!(event.faction, None);
        assert!(ZoneLockEvaluator::evaluate(&mut state, 2, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn neutral_anchors_never_lock() {
        let state = state(&[10, 11]);
        let zone = state.zone(2).unwrap();
        assert_eq!(ZoneLockEvaluator::compute(zone, &state).unwrap(), LockState::Unlocked);
    }

    #[test]
    fn zone_without_anchors_never_locks() {
        let mut state = state(&[]);
        capture(&mut state, 10, Faction::Vs);
        assert!(ZoneLockEvaluator::evaluate(&mut state, 2, Utc::now()).unwrap().is_none());
    }
}
