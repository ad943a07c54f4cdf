//! Containment oracle and geometry source abstractions.
//!
//! The engine never tests point-in-polygon containment itself. It asks a
//! [`ContainmentOracle`] which vessels are inside which zones, and a
//! [`GeometrySource`] for the zones' display names.
//!
//! Two implementations exist:
//! - [`crate::postgis::PostgisOracle`] queries the spatial database.
//! - [`StaticOracle`] answers from an in-memory set and is used for tests and
//!   for running the server without a database.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use geoguard_core::{Sighting, ZoneId};

use crate::error::StoreError;

#[async_trait]
pub trait ContainmentOracle: Send + Sync {
    /// All `(vessel, zone)` pairs where the vessel's latest position within
    /// `window` lies inside one of `zones`
    async fn vessels_inside(
        &self,
        zones: &[ZoneId],
        window: Duration,
    ) -> Result<HashSet<Sighting>, StoreError>;
}

#[async_trait]
pub trait GeometrySource: Send + Sync {
    /// Display names of the given zones. Unknown zones are left out.
    async fn zone_names(&self, zones: &[ZoneId]) -> Result<HashMap<ZoneId, String>, StoreError>;
}

/// In-memory oracle answering from a scripted set of sightings
#[derive(Debug, Default)]
pub struct StaticOracle {
    inside: RwLock<HashSet<Sighting>>,
    names: RwLock<HashMap<ZoneId, String>>,
    failing: AtomicBool,
    delay: RwLock<Option<Duration>>,
    queries: AtomicUsize,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of vessels reported inside
    pub fn set_inside<I>(&self, sightings: I)
    where
        I: IntoIterator<Item = Sighting>,
    {
        let mut inside = self.inside.write().unwrap_or_else(PoisonError::into_inner);
        *inside = sightings.into_iter().collect();
    }

    pub fn set_name(&self, zone_id: impl Into<ZoneId>, name: impl Into<String>) {
        self.names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(zone_id.into(), name.into());
    }

    /// Make every query fail until switched off again
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every containment answer, to simulate a stuck query
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of containment queries answered or failed so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainmentOracle for StaticOracle {
    async fn vessels_inside(
        &self,
        zones: &[ZoneId],
        _window: Duration,
    ) -> Result<HashSet<Sighting>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("static oracle set to fail".into()));
        }

        let wanted: HashSet<&ZoneId> = zones.iter().collect();
        let inside = self.inside.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inside
            .iter()
            .filter(|s| wanted.contains(&s.zone_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GeometrySource for StaticOracle {
    async fn zone_names(&self, zones: &[ZoneId]) -> Result<HashMap<ZoneId, String>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("static oracle set to fail".into()));
        }
        let names = self.names.read().unwrap_or_else(PoisonError::into_inner);
        Ok(zones
            .iter()
            .filter_map(|id| names.get(id).map(|name| (id.clone(), name.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_oracle_filters_zones() {
        let oracle = StaticOracle::new();
        oracle.set_inside([Sighting::new("V1", "Z1"), Sighting::new("V2", "Z2")]);

        let result = oracle
            .vessels_inside(&[ZoneId::from("Z1")], Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.contains(&Sighting::new("V1", "Z1")));
        assert_eq!(oracle.query_count(), 1);
    }

    #[tokio::test]
    async fn test_static_oracle_failure() {
        let oracle = StaticOracle::new();
        oracle.set_failing(true);

        let result = oracle
            .vessels_inside(&[ZoneId::from("Z1")], Duration::from_secs(300))
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_zone_names() {
        let oracle = StaticOracle::new();
        oracle.set_name("Z1", "Fairway");

        let names = oracle
            .zone_names(&[ZoneId::from("Z1"), ZoneId::from("Z2")])
            .await
            .unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names.get(&ZoneId::from("Z1")).map(String::as_str), Some("Fairway"));
    }
}
