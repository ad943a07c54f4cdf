//! GeofenceEngine - owned state of the intrusion detector
//!
//! The engine holds everything the poll cycle and the configuration calls
//! share: the zone registry, the baselines and the presence tracker. It does
//! no I/O; the server feeds it containment results and persists the
//! transitions it returns.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │           GeofenceEngine                                     │
//! │  ├─ GeofenceRegistry   (zone -> alert class, display names)  │
//! │  ├─ BaselineStore      (zone -> vessels exempt from alerts)  │
//! │  └─ PresenceTracker    (zone -> vessels last seen inside)    │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲ set_watched_zones / install_baseline
//!          │
//!          ▼ diff(sightings) -> [Transition] -> commit(transition)
//! ```
//!
//! Per `(zone, vessel)` the state machine is:
//!
//! ```text
//!            sighted, not exempt
//!  Outside ───────────────────────► Inside
//!     ▲                                │
//!     └────────────────────────────────┘
//!            not sighted, not exempt
//! ```
//!
//! Baseline-exempt pairs start `Inside` and never transition.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::alert::{AlertKind, NewAlert};
use crate::geofence::{
    AlertClass, BaselineStore, GeofenceRegistry, PresenceTracker, Sighting, VesselId, WatchDelta,
    ZoneId, ZoneSpec,
};

/// A vessel crossing a zone boundary, detected by [`GeofenceEngine::diff`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub kind: AlertKind,
    pub vessel_id: VesselId,
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub alert_class: AlertClass,
}

impl Transition {
    pub fn to_alert(&self, at_millis: i64) -> NewAlert {
        NewAlert {
            vessel_id: self.vessel_id.clone(),
            zone_id: self.zone_id.clone(),
            zone_name: self.zone_name.clone(),
            alert_class: self.alert_class.clone(),
            kind: self.kind,
            at_millis,
            comment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineCount {
    pub zone_id: ZoneId,
    pub count: usize,
}

/// Point-in-time view of the engine state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub watched_zones: Vec<ZoneId>,
    pub total_presence_entries: usize,
    pub baseline_counts: Vec<BaselineCount>,
    pub zone_names: BTreeMap<ZoneId, String>,
}

#[derive(Debug, Default)]
pub struct GeofenceEngine {
    registry: GeofenceRegistry,
    baselines: BaselineStore,
    presence: PresenceTracker,
}

impl GeofenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the watch set.
    ///
    /// Removed zones lose their baseline and every presence entry. Added
    /// zones start with an empty baseline; the caller is expected to capture
    /// the real one with [`install_baseline`](Self::install_baseline) before
    /// the next diff.
    pub fn set_watched_zones(&mut self, specs: &[ZoneSpec]) -> WatchDelta {
        let delta = self.registry.replace(specs);

        for zone_id in &delta.removed {
            self.baselines.remove_zone(zone_id);
            self.presence.clear_zone(zone_id);
        }
        for zone_id in &delta.added {
            self.baselines.install(zone_id, std::iter::empty());
        }

        delta
    }

    /// Record the vessels already inside a watched zone.
    ///
    /// They become exempt and are seeded into the presence tracker as inside.
    /// Returns the baseline size, or `None` if the zone is not watched.
    pub fn install_baseline<I>(&mut self, zone_id: &ZoneId, vessels: I) -> Option<usize>
    where
        I: IntoIterator<Item = VesselId>,
    {
        if !self.registry.contains(zone_id) {
            return None;
        }
        let vessels: Vec<VesselId> = vessels.into_iter().collect();
        for vessel in &vessels {
            self.presence.mark_inside(zone_id, vessel.clone());
        }
        Some(self.baselines.install(zone_id, vessels))
    }

    pub fn set_zone_name(&mut self, zone_id: &ZoneId, name: impl Into<String>) -> bool {
        self.registry.set_name(zone_id, name)
    }

    /// Compare one containment result against the presence tracker.
    ///
    /// Sightings for zones that are not watched are ignored. Entries come
    /// first, then exits, each in zone then vessel order. Nothing is
    /// mutated; apply the result with [`commit`](Self::commit).
    pub fn diff(&self, sightings: &HashSet<Sighting>) -> Vec<Transition> {
        let observed: BTreeSet<(&ZoneId, &VesselId)> = sightings
            .iter()
            .filter(|s| self.registry.contains(&s.zone_id))
            .map(|s| (&s.zone_id, &s.vessel_id))
            .collect();

        let mut transitions = Vec::new();

        for &(zone_id, vessel_id) in &observed {
            if self.baselines.is_exempt(zone_id, vessel_id)
                || self.presence.is_inside(zone_id, vessel_id)
            {
                continue;
            }
            transitions.push(self.transition(AlertKind::Entered, zone_id, vessel_id));
        }

        for (zone_id, vessel_id) in self.presence.entries() {
            if observed.contains(&(zone_id, vessel_id))
                || self.baselines.is_exempt(zone_id, vessel_id)
            {
                continue;
            }
            transitions.push(self.transition(AlertKind::Exited, zone_id, vessel_id));
        }

        transitions
    }

    /// Apply one transition to the presence tracker.
    ///
    /// Returns false if the transition no longer applies, e.g. its zone was
    /// unwatched after the diff was taken.
    pub fn commit(&mut self, transition: &Transition) -> bool {
        if !self.registry.contains(&transition.zone_id) {
            return false;
        }
        match transition.kind {
            AlertKind::Entered => self
                .presence
                .mark_inside(&transition.zone_id, transition.vessel_id.clone()),
            AlertKind::Exited => self
                .presence
                .mark_outside(&transition.zone_id, &transition.vessel_id),
        }
    }

    /// Diff and commit in one step
    pub fn observe(&mut self, sightings: &HashSet<Sighting>) -> Vec<Transition> {
        let transitions = self.diff(sightings);
        for transition in &transitions {
            self.commit(transition);
        }
        transitions
    }

    fn transition(&self, kind: AlertKind, zone_id: &ZoneId, vessel_id: &VesselId) -> Transition {
        Transition {
            kind,
            vessel_id: vessel_id.clone(),
            zone_id: zone_id.clone(),
            zone_name: self.registry.name(zone_id),
            alert_class: self
                .registry
                .alert_class(zone_id)
                .cloned()
                .unwrap_or_default(),
        }
    }

    pub fn watched_zones(&self) -> Vec<ZoneId> {
        self.registry.zone_ids().cloned().collect()
    }

    pub fn is_watching(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn registry(&self) -> &GeofenceRegistry {
        &self.registry
    }

    pub fn baselines(&self) -> &BaselineStore {
        &self.baselines
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            watched_zones: self.watched_zones(),
            total_presence_entries: self.presence.len(),
            baseline_counts: self
                .baselines
                .counts()
                .into_iter()
                .map(|(zone_id, count)| BaselineCount { zone_id, count })
                .collect(),
            zone_names: self.registry.names(),
        }
    }
}
