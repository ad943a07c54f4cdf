//! Per-zone vessel sets: who is inside, and who was inside from the start.

use std::collections::{BTreeMap, BTreeSet};

use super::zone::{VesselId, ZoneId};

/// Set of vessels per zone, keyed first by zone then by vessel
#[derive(Debug, Default, Clone)]
struct ZoneVessels {
    zones: BTreeMap<ZoneId, BTreeSet<VesselId>>,
}

impl ZoneVessels {
    fn contains(&self, zone_id: &ZoneId, vessel_id: &VesselId) -> bool {
        self.zones
            .get(zone_id)
            .map(|vessels| vessels.contains(vessel_id))
            .unwrap_or(false)
    }

    fn insert(&mut self, zone_id: &ZoneId, vessel_id: VesselId) -> bool {
        self.zones.entry(zone_id.clone()).or_default().insert(vessel_id)
    }

    fn remove(&mut self, zone_id: &ZoneId, vessel_id: &VesselId) -> bool {
        let Some(vessels) = self.zones.get_mut(zone_id) else {
            return false;
        };
        let removed = vessels.remove(vessel_id);
        if vessels.is_empty() {
            self.zones.remove(zone_id);
        }
        removed
    }

    fn remove_zone(&mut self, zone_id: &ZoneId) -> usize {
        self.zones.remove(zone_id).map(|v| v.len()).unwrap_or(0)
    }

    fn count(&self, zone_id: &ZoneId) -> usize {
        self.zones.get(zone_id).map(|v| v.len()).unwrap_or(0)
    }

    fn total(&self) -> usize {
        self.zones.values().map(|v| v.len()).sum()
    }

    fn iter(&self) -> impl Iterator<Item = (&ZoneId, &VesselId)> {
        self.zones
            .iter()
            .flat_map(|(zone, vessels)| vessels.iter().map(move |vessel| (zone, vessel)))
    }
}

/// Tracks which vessels are currently considered inside each zone.
///
/// A missing entry means "outside".
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    inside: ZoneVessels,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_inside(&self, zone_id: &ZoneId, vessel_id: &VesselId) -> bool {
        self.inside.contains(zone_id, vessel_id)
    }

    /// Record the vessel as inside. Returns false if it already was.
    pub fn mark_inside(&mut self, zone_id: &ZoneId, vessel_id: VesselId) -> bool {
        self.inside.insert(zone_id, vessel_id)
    }

    /// Forget the vessel for this zone. Returns false if it was not inside.
    pub fn mark_outside(&mut self, zone_id: &ZoneId, vessel_id: &VesselId) -> bool {
        self.inside.remove(zone_id, vessel_id)
    }

    /// Drop every entry of a zone, returning how many were dropped
    pub fn clear_zone(&mut self, zone_id: &ZoneId) -> usize {
        self.inside.remove_zone(zone_id)
    }

    pub fn count(&self, zone_id: &ZoneId) -> usize {
        self.inside.count(zone_id)
    }

    pub fn len(&self) -> usize {
        self.inside.total()
    }

    pub fn is_empty(&self) -> bool {
        self.inside.zones.is_empty()
    }

    /// All `(zone, vessel)` entries in zone, then vessel order
    pub fn entries(&self) -> impl Iterator<Item = (&ZoneId, &VesselId)> {
        self.inside.iter()
    }
}

/// Vessels that were already inside a zone when watching started.
///
/// These are exempt from entry and exit alerts for as long as the zone stays
/// watched.
#[derive(Debug, Default, Clone)]
pub struct BaselineStore {
    exempt: ZoneVessels,
    /// Zones with a captured baseline, including empty ones
    captured: BTreeSet<ZoneId>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the baseline of a zone, replacing any previous one
    pub fn install<I>(&mut self, zone_id: &ZoneId, vessels: I) -> usize
    where
        I: IntoIterator<Item = VesselId>,
    {
        self.exempt.remove_zone(zone_id);
        self.captured.insert(zone_id.clone());
        for vessel in vessels {
            self.exempt.insert(zone_id, vessel);
        }
        self.exempt.count(zone_id)
    }

    pub fn is_exempt(&self, zone_id: &ZoneId, vessel_id: &VesselId) -> bool {
        self.exempt.contains(zone_id, vessel_id)
    }

    pub fn remove_zone(&mut self, zone_id: &ZoneId) -> bool {
        self.exempt.remove_zone(zone_id);
        self.captured.remove(zone_id)
    }

    pub fn has_baseline(&self, zone_id: &ZoneId) -> bool {
        self.captured.contains(zone_id)
    }

    pub fn count(&self, zone_id: &ZoneId) -> usize {
        self.exempt.count(zone_id)
    }

    /// Baseline sizes for every captured zone, including empty baselines
    pub fn counts(&self) -> Vec<(ZoneId, usize)> {
        self.captured
            .iter()
            .map(|zone| (zone.clone(), self.exempt.count(zone)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn z(id: &str) -> ZoneId {
        ZoneId::from(id)
    }

    fn v(id: &str) -> VesselId {
        VesselId::from(id)
    }

    #[test]
    fn test_presence_mark_and_clear() {
        let mut presence = PresenceTracker::new();

        assert!(presence.mark_inside(&z("Z1"), v("V1")));
        assert!(!presence.mark_inside(&z("Z1"), v("V1")));
        assert!(presence.mark_inside(&z("Z1"), v("V2")));
        assert!(presence.mark_inside(&z("Z2"), v("V1")));
        assert_eq!(presence.len(), 3);

        assert!(presence.mark_outside(&z("Z1"), &v("V2")));
        assert!(!presence.mark_outside(&z("Z1"), &v("V2")));
        assert_eq!(presence.count(&z("Z1")), 1);

        assert_eq!(presence.clear_zone(&z("Z1")), 1);
        assert!(!presence.is_inside(&z("Z1"), &v("V1")));
        assert!(presence.is_inside(&z("Z2"), &v("V1")));
    }

    #[test]
    fn test_composite_keys_do_not_collide() {
        // "A_B" + "C" and "A" + "B_C" would collide as concatenated strings
        let mut presence = PresenceTracker::new();
        presence.mark_inside(&z("A_B"), v("C"));

        assert!(!presence.is_inside(&z("A"), &v("B_C")));
        assert!(presence.is_inside(&z("A_B"), &v("C")));
    }

    #[test]
    fn test_empty_zone_set_is_pruned() {
        let mut presence = PresenceTracker::new();
        presence.mark_inside(&z("Z1"), v("V1"));
        presence.mark_outside(&z("Z1"), &v("V1"));
        assert!(presence.is_empty());
    }

    #[test]
    fn test_baseline_install_and_remove() {
        let mut baselines = BaselineStore::new();

        assert_eq!(baselines.install(&z("Z1"), vec![v("V1"), v("V2")]), 2);
        assert_eq!(baselines.install(&z("Z2"), Vec::new()), 0);
        assert!(baselines.is_exempt(&z("Z1"), &v("V1")));
        assert!(!baselines.is_exempt(&z("Z2"), &v("V1")));
        assert_eq!(
            baselines.counts(),
            vec![(z("Z1"), 2), (z("Z2"), 0)]
        );

        assert!(baselines.remove_zone(&z("Z1")));
        assert!(!baselines.has_baseline(&z("Z1")));
        assert!(!baselines.is_exempt(&z("Z1"), &v("V1")));
    }

    #[test]
    fn test_baseline_reinstall_replaces() {
        let mut baselines = BaselineStore::new();
        baselines.install(&z("Z1"), vec![v("V1")]);
        baselines.install(&z("Z1"), vec![v("V2")]);

        assert!(!baselines.is_exempt(&z("Z1"), &v("V1")));
        assert!(baselines.is_exempt(&z("Z1"), &v("V2")));
    }
}
