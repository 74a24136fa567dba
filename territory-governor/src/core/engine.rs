/*!
Per-world reconciliation engine: decides which capture signals become ownership transitions
*/

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace};

use territory_database::{RegionId, WorldId};

use crate::core::{
    error::GovernorError,
    events::{AvailabilityEvent, CaptureEvent, OutputEvent},
    outbound::OutboundQueue,
    signal::{CaptureSignal, CaptureTime, SourceKind},
    stats::WorldStats,
    store::{RegionState, RegionTransition, WorldState},
    zone_lock::ZoneLockEvaluator,
};

/// Why a signal was dropped without being compared to the current owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Region is currently disabled on the map
    Disabled,
    /// Signal came from a dynamic instance of the region's zone
    ForeignInstance,
}

/// Outcome of reconciling one signal against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ignored(IgnoreReason),
    /// Redundant confirmation of the current owner
    NoOp,
    /// Exact time older than the region's last capture
    Stale,
    Accepted,
}

/// Everything a world's ingestion queue carries
#[derive(Debug, Clone, PartialEq)]
pub enum WorldCommand {
    Signal(CaptureSignal),
    /// Region availability reported by a map snapshot
    Availability { region_id: RegionId, enabled: bool },
}

/// Single-writer decision loop for one world.
///
/// Commands are processed strictly in the order they were enqueued. Accepted
/// transitions and zone lock changes go to the outbound queue, which never blocks.
pub struct ReconciliationEngine {
    state: WorldState,
    outbound: OutboundQueue,
    stats: Arc<WorldStats>,
}

impl ReconciliationEngine {
    pub fn new(state: WorldState, outbound: OutboundQueue, stats: Arc<WorldStats>) -> Self {
        Self {
            state,
            outbound,
            stats,
        }
    }

    pub fn world_id(&self) -> WorldId {
        self.state.world_id()
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    /// Classify a signal without touching the store
    pub fn decide(&self, signal: &CaptureSignal) -> Result<Decision, GovernorError> {
        let region = self.region_for(signal)?;

        if !region.enabled {
            return Ok(Decision::Ignored(IgnoreReason::Disabled));
        }
        if signal.zone_id.is_some_and(|zone| zone != region.zone_id) {
            return Ok(Decision::Ignored(IgnoreReason::ForeignInstance));
        }

        // Approximate times never outrank an exact one, so only exact times are compared
        let exact = signal.capture_time.and_then(|time| time.exact());

        if signal.faction == region.owner {
            let redundant = match (exact, region.last_capture_time) {
                (None, _) => true,
                (Some(at), Some(stored)) => at <= stored,
                (Some(_), None) => false,
            };
            if redundant {
                return Ok(Decision::NoOp);
            }
        }

        match (exact, region.last_capture_time) {
            (Some(at), Some(stored)) if at < stored => Ok(Decision::Stale),
            _ => Ok(Decision::Accepted),
        }
    }

    /// Reconcile a signal, applying and emitting it when accepted
    pub fn apply(&mut self, signal: CaptureSignal) -> Result<Decision, GovernorError> {
        let decision = self.decide(&signal)?;
        self.stats.record(&decision);

        match decision {
            Decision::Accepted => self.accept(signal)?,
            Decision::NoOp => trace!(
                world_id = signal.world_id,
                region_id = signal.region_id,
                source = %signal.source,
                "redundant confirmation"
            ),
            Decision::Stale => debug!(
                world_id = signal.world_id,
                region_id = signal.region_id,
                source = %signal.source,
                "stale signal dropped"
            ),
            Decision::Ignored(reason) => debug!(
                world_id = signal.world_id,
                region_id = signal.region_id,
                source = %signal.source,
                ?reason,
                "signal ignored"
            ),
        }
        Ok(decision)
    }

    /// Enable or disable a region; returns whether anything changed
    pub fn set_availability(
        &mut self,
        region_id: RegionId,
        enabled: bool,
    ) -> Result<bool, GovernorError> {
        let changed = self.state.set_enabled(region_id, enabled)?;
        if changed {
            self.stats.record_availability_change();
            info!(world_id = self.world_id(), region_id, enabled, "region availability changed");

            let zone_id = self.state.region(region_id).map(|r| r.zone_id).unwrap_or_default();
            self.outbound.push(OutputEvent::Availability(AvailabilityEvent {
                region_id,
                world_id: self.world_id(),
                zone_id,
                enabled,
                timestamp: Utc::now(),
            }));
        }
        Ok(changed)
    }

    pub fn handle(&mut self, command: WorldCommand) -> Result<(), GovernorError> {
        match command {
            WorldCommand::Signal(signal) => self.apply(signal).map(|_| ()),
            WorldCommand::Availability { region_id, enabled } => {
                self.set_availability(region_id, enabled).map(|_| ())
            }
        }
    }

    /// Consume the world's queue until shutdown, then drain what was already enqueued.
    ///
    /// Returns the final state, or the invariant violation that halted the world.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<WorldCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<WorldState, GovernorError> {
        let world_id = self.world_id();
        info!(world_id, "decision loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_or_halt(command)?,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        commands.close();
        let mut drained = 0usize;
        while let Ok(command) = commands.try_recv() {
            self.handle_or_halt(command)?;
            drained += 1;
        }

        info!(world_id, drained, "decision loop stopped");
        Ok(self.state)
    }

    fn handle_or_halt(&mut self, command: WorldCommand) -> Result<(), GovernorError> {
        self.handle(command).inspect_err(|e| {
            error!(world_id = self.state.world_id(), "{}; halting world", e);
        })
    }

    fn region_for(&self, signal: &CaptureSignal) -> Result<&RegionState, GovernorError> {
        let world_id = self.world_id();
        if signal.world_id != world_id {
            return Err(GovernorError::invariant(
                world_id,
                format!("signal for world {} reached this world", signal.world_id),
            ));
        }
        self.state.region(signal.region_id).ok_or_else(|| {
            GovernorError::invariant(
                world_id,
                format!("validated region {} is missing from the store", signal.region_id),
            )
        })
    }

    fn accept(&mut self, signal: CaptureSignal) -> Result<(), GovernorError> {
        let stored = self.region_for(&signal)?.last_capture_time;
        let (capture_time, approximate) = event_time(&signal);

        let transition = RegionTransition {
            owner: signal.faction,
            outfit_id: match signal.source {
                SourceKind::PrimaryStream => signal.outfit_id,
                SourceKind::FallbackStream | SourceKind::PollDiff => None,
            },
            last_capture_time: next_capture_floor(stored, signal.capture_time),
            owned_since: capture_time,
        };
        let last_capture_time = transition.last_capture_time;
        let outfit_id = transition.outfit_id;

        let previous = self.state.apply(signal.region_id, transition)?;
        let now = Utc::now();
        let event = CaptureEvent {
            region_id: signal.region_id,
            world_id: signal.world_id,
            zone_id: previous.zone_id,
            old_faction: previous.owner,
            new_faction: signal.faction,
            outfit_id,
            capture_time,
            approximate,
            last_capture_time,
            source: signal.source,
            accepted_at: now,
        };

        info!(
            world_id = event.world_id,
            region_id = event.region_id,
            source = %event.source,
            old = %event.old_faction,
            new = %event.new_faction,
            approximate,
            "capture accepted"
        );
        self.outbound.push(OutputEvent::Capture(event));

        if let Some(lock_event) = ZoneLockEvaluator::evaluate(&mut self.state, previous.zone_id, now)? {
            self.stats.record_lock_event();
            self.outbound.push(OutputEvent::ZoneLock(lock_event));
        }
        Ok(())
    }
}

/// Time reported downstream for an accepted signal, and whether it is approximate
fn event_time(signal: &CaptureSignal) -> (DateTime<Utc>, bool) {
    match signal.capture_time {
        Some(CaptureTime::Exact(at)) => (at, false),
        Some(CaptureTime::Approximate(at)) => (at, true),
        None => (signal.received_at, true),
    }
}

/// New `last_capture_time`. Only exact times move it, and never backward.
fn next_capture_floor(
    stored: Option<DateTime<Utc>>,
    time: Option<CaptureTime>,
) -> Option<DateTime<Utc>> {
    match (stored, time.and_then(|time| time.exact())) {
        (stored, None) => stored,
        (None, Some(at)) => Some(at),
        (Some(stored), Some(at)) => Some(stored.max(at)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use territory_database::{
        Catalog, Faction,
        tables::{
            region::{MapRegion, RegionOwnership},
            world::World,
            zone::Zone,
        },
    };

    use super::*;

    fn catalog() -> Catalog {
        let mut disabled = RegionOwnership::neutral(14, 1);
        disabled.enabled = false;

        Catalog::new(
            vec![World::new(1, "Connery", "ps2")],
            vec![Zone::new(2, "Indar", [10, 11, 12])],
            vec![
                MapRegion::new(10, 2, None, "North Warpgate"),
                MapRegion::new(11, 2, None, "East Warpgate"),
                MapRegion::new(12, 2, None, "South Warpgate"),
                MapRegion::new(13, 2, None, "Crown"),
                MapRegion::new(14, 2, None, "Closed Outpost"),
            ],
        )
        .unwrap()
        .with_ownership(disabled)
    }

    fn engine() -> (ReconciliationEngine, OutboundQueue) {
        let state = WorldState::from_catalog(&catalog(), 1).unwrap();
        let outbound = OutboundQueue::new(64);
        let engine =
            ReconciliationEngine::new(state, outbound.clone(), Arc::new(WorldStats::default()));
        (engine, outbound)
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn signal(
        source: SourceKind,
        region_id: RegionId,
        faction: Faction,
        capture_time: Option<CaptureTime>,
    ) -> CaptureSignal {
        CaptureSignal {
            source,
            world_id: 1,
            region_id,
            zone_id: Some(2),
            faction,
            outfit_id: None,
            capture_time,
            received_at: Utc::now(),
        }
    }

    fn primary(region_id: RegionId, faction: Faction, seconds: i64) -> CaptureSignal {
        signal(
            SourceKind::PrimaryStream,
            region_id,
            faction,
            Some(CaptureTime::Exact(at(seconds))),
        )
    }

    fn drain(outbound: &OutboundQueue) -> Vec<OutputEvent> {
        std::iter::from_fn(|| outbound.try_pop()).collect()
    }

    fn captures(outbound: &OutboundQueue) -> Vec<CaptureEvent> {
        drain(outbound)
            .into_iter()
            .filter_map(|event| match event {
                OutputEvent::Capture(capture) => Some(capture),
                OutputEvent::ZoneLock(_) | OutputEvent::Availability(_) => None,
            })
            .collect()
    }

    #[test]
    fn same_exact_signal_twice_emits_once() {
        let (mut engine, outbound) = engine();
        let s = primary(13, Faction::Vs, 1_000);

        assert_eq!(engine.apply(s.clone()).unwrap(), Decision::Accepted);
        assert_eq!(engine.apply(s).unwrap(), Decision::NoOp);
        assert_eq!(captures(&outbound).len(), 1);
    }

    #[test]
    fn last_capture_time_never_moves_backward() {
        let (mut engine, outbound) = engine();

        engine.apply(primary(13, Faction::Vs, 2_000)).unwrap();
        assert_eq!(engine.apply(primary(13, Faction::Tr, 1_000)).unwrap(), Decision::Stale);
        assert_eq!(engine.apply(primary(13, Faction::Nc, 3_000)).unwrap(), Decision::Accepted);

        let floors: Vec<_> = captures(&outbound)
            .into_iter()
            .filter_map(|event| event.last_capture_time)
            .collect();
        assert_eq!(floors, vec![at(2_000), at(3_000)]);
        assert_eq!(engine.state().region(13).unwrap().owner, Faction::Nc);
    }

    #[test]
    fn approximate_time_cannot_lower_floor() {
        let (mut engine, outbound) = engine();
        engine.apply(primary(13, Faction::Vs, 1_000)).unwrap();

        let poll = signal(
            SourceKind::PollDiff,
            13,
            Faction::Tr,
            Some(CaptureTime::Approximate(at(900))),
        );
        assert_eq!(engine.apply(poll).unwrap(), Decision::Accepted);

        let events = captures(&outbound);
        assert!(events[1].approximate);
        assert_eq!(events[1].capture_time, at(900));
        assert_eq!(engine.state().region(13).unwrap().last_capture_time, Some(at(1_000)));
    }

    #[test]
    fn approximate_time_does_not_raise_floor() {
        let (mut engine, outbound) = engine();
        engine.apply(primary(13, Faction::Vs, 1_000)).unwrap();

        let poll = signal(
            SourceKind::PollDiff,
            13,
            Faction::Tr,
            Some(CaptureTime::Approximate(at(1_060))),
        );
        assert_eq!(engine.apply(poll).unwrap(), Decision::Accepted);
        assert_eq!(engine.state().region(13).unwrap().last_capture_time, Some(at(1_000)));

        // The real capture landed inside the poll window and still counts
        assert_eq!(engine.apply(primary(13, Faction::Nc, 1_030)).unwrap(), Decision::Accepted);
        let region = engine.state().region(13).unwrap();
        assert_eq!(region.owner, Faction::Nc);
        assert_eq!(region.last_capture_time, Some(at(1_030)));

        let events = captures(&outbound);
        assert_eq!(events[1].last_capture_time, Some(at(1_000)));
        assert_eq!(events[2].old_faction, Faction::Tr);
    }

    #[test]
    fn approximate_time_leaves_unset_floor_unset() {
        let (mut engine, _outbound) = engine();
        let poll = signal(
            SourceKind::PollDiff,
            13,
            Faction::Tr,
            Some(CaptureTime::Approximate(at(500))),
        );
        engine.apply(poll).unwrap();
        assert_eq!(engine.state().region(13).unwrap().last_capture_time, None);
        assert_eq!(engine.apply(primary(13, Faction::Vs, 400)).unwrap(), Decision::Accepted);
    }

    #[test]
    fn poll_confirming_primary_is_suppressed() {
        let (mut engine, outbound) = engine();
        engine.apply(primary(13, Faction::Tr, 1_000)).unwrap();

        let confirm = signal(SourceKind::PollDiff, 13, Faction::Tr, None);
        let confirm_approx = signal(
            SourceKind::PollDiff,
            13,
            Faction::Tr,
            Some(CaptureTime::Approximate(at(1_030))),
        );
        assert_eq!(engine.apply(confirm).unwrap(), Decision::NoOp);
        assert_eq!(engine.apply(confirm_approx).unwrap(), Decision::NoOp);
        assert_eq!(captures(&outbound).len(), 1);
    }

    #[test]
    fn outfit_is_cleared_by_non_primary_sources() {
        let (mut engine, outbound) = engine();
        let mut with_outfit = primary(13, Faction::Vs, 1_000);
        with_outfit.outfit_id = Some(37_509_488_620_604_883);
        engine.apply(with_outfit).unwrap();
        assert_eq!(
            engine.state().region(13).unwrap().outfit_id,
            Some(37_509_488_620_604_883)
        );

        let mut fallback = signal(SourceKind::FallbackStream, 13, Faction::Nc, None);
        fallback.outfit_id = Some(5);
        engine.apply(fallback).unwrap();
        assert_eq!(engine.state().region(13).unwrap().outfit_id, None);

        engine.apply(primary(13, Faction::Vs, 2_000)).unwrap();
        engine
            .apply(signal(SourceKind::PollDiff, 13, Faction::Tr, None))
            .unwrap();
        assert_eq!(engine.state().region(13).unwrap().outfit_id, None);

        let events = captures(&outbound);
        assert_eq!(events.len(), 4);
        assert_eq!(events[3].outfit_id, None);
    }

    #[test]
    fn timeless_fallback_overrides_then_poll_restores() {
        let (mut engine, outbound) = engine();
        engine.apply(primary(13, Faction::Vs, 2_000)).unwrap();

        // A different faction without a time is accepted in arrival order
        let fallback = signal(SourceKind::FallbackStream, 13, Faction::Tr, None);
        assert_eq!(engine.apply(fallback).unwrap(), Decision::Accepted);
        let region = engine.state().region(13).unwrap();
        assert_eq!(region.owner, Faction::Tr);
        assert_eq!(region.last_capture_time, Some(at(2_000)));

        let poll = signal(SourceKind::PollDiff, 13, Faction::Vs, None);
        assert_eq!(engine.apply(poll).unwrap(), Decision::Accepted);
        assert_eq!(engine.state().region(13).unwrap().owner, Faction::Vs);

        let events = captures(&outbound);
        assert_eq!(events.len(), 3);
        assert!(events[1].approximate);
        assert_eq!(events[2].old_faction, Faction::Tr);
        assert_eq!(events[2].last_capture_time, Some(at(2_000)));
    }

    #[test]
    fn same_owner_with_newer_exact_time_advances_floor() {
        let (mut engine, outbound) = engine();
        engine.apply(primary(13, Faction::Vs, 1_000)).unwrap();
        assert_eq!(engine.apply(primary(13, Faction::Vs, 1_500)).unwrap(), Decision::Accepted);

        let events = captures(&outbound);
        assert_eq!(events[1].old_faction, events[1].new_faction);
        assert_eq!(events[1].last_capture_time, Some(at(1_500)));
    }

    #[test]
    fn disabled_and_instanced_signals_are_ignored() {
        let (mut engine, outbound) = engine();

        let disabled = primary(14, Faction::Vs, 1_000);
        assert_eq!(
            engine.apply(disabled).unwrap(),
            Decision::Ignored(IgnoreReason::Disabled)
        );

        let mut instanced = primary(13, Faction::Vs, 1_000);
        instanced.zone_id = Some((7 << 16) | 2);
        assert_eq!(
            engine.apply(instanced).unwrap(),
            Decision::Ignored(IgnoreReason::ForeignInstance)
        );
        assert!(outbound.is_empty());
    }

    #[test]
    fn availability_commands_toggle_regions() {
        let (mut engine, outbound) = engine();
        engine
            .handle(WorldCommand::Availability {
                region_id: 14,
                enabled: true,
            })
            .unwrap();
        assert_eq!(engine.apply(primary(14, Faction::Nc, 10)).unwrap(), Decision::Accepted);
        assert!(!engine.set_availability(14, true).unwrap());

        let availability: Vec<_> = drain(&outbound)
            .into_iter()
            .filter_map(|event| match event {
                OutputEvent::Availability(event) => Some(event),
                _ => None,
            })
            .collect();
        assert_eq!(availability.len(), 1);
        assert_eq!(availability[0].region_id, 14);
        assert_eq!(availability[0].zone_id, 2);
        assert!(availability[0].enabled);
    }

    #[test]
    fn missing_region_halts_the_world() {
        let (mut engine, _outbound) = engine();
        let err = engine.apply(primary(99, Faction::Vs, 10)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn anchors_lock_zone_exactly_once() {
        let (mut engine, outbound) = engine();
        for (i, region) in [10, 11, 12].into_iter().enumerate() {
            engine.apply(primary(region, Faction::Nc, 100 + i as i64)).unwrap();
        }
        engine.apply(primary(13, Faction::Nc, 200)).unwrap();

        let locks: Vec<_> = drain(&outbound)
            .into_iter()
            .filter_map(|event| match event {
                OutputEvent::ZoneLock(lock) => Some(lock),
                _ => None,
            })
            .collect();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].faction, Some(Faction::Nc));

        engine.apply(primary(11, Faction::Vs, 300)).unwrap();
        let unlocks = drain(&outbound)
            .into_iter()
            .filter(|event| matches!(event, OutputEvent::ZoneLock(lock) if !lock.locked))
            .count();
        assert_eq!(unlocks, 1);
    }

    #[tokio::test]
    async fn run_drains_queue_on_shutdown() {
        let (engine, outbound) = engine();
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(WorldCommand::Signal(primary(13, Faction::Vs, 10)))
            .await
            .unwrap();
        tx.send(WorldCommand::Signal(primary(13, Faction::Tr, 20)))
            .await
            .unwrap();
        shutdown_tx.send(true).unwrap();

        let state = engine.run(rx, shutdown_rx).await.unwrap();
        assert_eq!(state.region(13).unwrap().owner, Faction::Tr);
        assert_eq!(captures(&outbound).len(), 2);
        assert!(tx.send(WorldCommand::Signal(primary(13, Faction::Vs, 30))).await.is_err());
    }

    #[tokio::test]
    async fn run_stops_on_invariant_violation() {
        let (engine, _outbound) = engine();
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut foreign = primary(13, Faction::Vs, 10);
        foreign.world_id = 17;
        tx.send(WorldCommand::Signal(foreign)).await.unwrap();

        let result = tokio::time::timeout(
            Duration::seconds(5).to_std().unwrap(),
            engine.run(rx, shutdown_rx),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(GovernorError::InvariantViolation { world_id: 1, .. })));
    }
}
