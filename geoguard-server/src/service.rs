//! GeofenceService - the running intrusion detector.
//!
//! Owns the [`GeofenceEngine`] behind one async mutex, together with the poll
//! scheduler, so that configuration changes and poll cycles never interleave:
//!
//! ```text
//!  PUT /zones ──► set_watched_zones ─┐          ┌─► ContainmentOracle
//!                                    ▼          │
//!                      Mutex<State{engine, scheduler, last_cycle}>
//!                                    ▲          │
//!  Scheduler tick ──► cycle_gate ────┘          ├─► AlertStore.append
//!                                               └─► Broadcaster
//! ```
//!
//! A poll cycle holds the state lock from the oracle query until the last
//! transition is committed. Readers never take that lock: every change to
//! the state is republished as a [`watch`] snapshot, which `status` and
//! `zones` read. Transitions are applied one at a time: the alert
//! is stored first, then presence is updated, then the message is pushed. A
//! store failure ends the cycle, and the transitions not yet applied are
//! detected again on the next tick.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_util::sync::CancellationToken;

use geoguard_core::{
    parse_zone_config, AlertClass, AlertEvent, AlertId, AlertKind, AlertLog, EngineStatus,
    GeofenceEngine, GeofenceError, IntrusionMessage, NewAlert, Sighting, VesselId, ZoneId,
    ZoneSpec,
};

use crate::broadcast::{Broadcaster, Subscription};
use crate::config::GeofenceSettings;
use crate::error::StoreError;
use crate::oracle::{ContainmentOracle, GeometrySource};
use crate::scheduler::Scheduler;
use crate::storage::AlertStore;
use crate::util::now_millis;

/// Result of a configuration call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneUpdate {
    pub added: Vec<ZoneId>,
    pub removed: Vec<ZoneId>,
    pub zones: BTreeMap<ZoneId, AlertClass>,
}

/// Current watch set with display names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneList {
    pub zones: BTreeMap<ZoneId, AlertClass>,
    pub zone_names: BTreeMap<ZoneId, String>,
}

/// What the last poll cycle did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub at_millis: i64,
    pub entries: usize,
    pub exits: usize,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No zone is watched
    Idle,
    /// Another cycle was still running
    Busy,
    /// The scheduler was stopped before the cycle got the engine
    Cancelled,
    Ran(CycleSummary),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub engine: EngineStatus,
    pub scheduler_running: bool,
    pub subscribers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleSummary>,
}

/// Alert raised by an operator rather than by a poll cycle
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAlert {
    pub zone_id: ZoneId,
    pub kind: AlertKind,
    /// Defaults to the zone's class when it is watched
    #[serde(default)]
    pub alert_class: Option<AlertClass>,
    #[serde(default)]
    pub comment: Option<String>,
}

struct State {
    engine: GeofenceEngine,
    scheduler: Scheduler,
    last_cycle: Option<CycleSummary>,
}

impl State {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            engine: self.engine.status(),
            zones: self.engine.registry().snapshot(),
            scheduler_running: self.scheduler.is_running(),
            last_cycle: self.last_cycle.clone(),
        }
    }
}

/// Copy of [`State`] for readers
#[derive(Debug, Clone)]
struct Snapshot {
    engine: EngineStatus,
    zones: BTreeMap<ZoneId, AlertClass>,
    scheduler_running: bool,
    last_cycle: Option<CycleSummary>,
}

struct Inner {
    state: Mutex<State>,
    snapshot: watch::Sender<Snapshot>,
    cycle_gate: Mutex<()>,
    oracle: Arc<dyn ContainmentOracle>,
    geometry: Arc<dyn GeometrySource>,
    alerts: Arc<dyn AlertStore>,
    broadcaster: Broadcaster,
    settings: GeofenceSettings,
}

#[derive(Clone)]
pub struct GeofenceService {
    inner: Arc<Inner>,
}

impl GeofenceService {
    pub fn new(
        oracle: Arc<dyn ContainmentOracle>,
        geometry: Arc<dyn GeometrySource>,
        alerts: Arc<dyn AlertStore>,
        settings: GeofenceSettings,
    ) -> Self {
        let state = State {
            engine: GeofenceEngine::new(),
            scheduler: Scheduler::new(settings.poll_interval),
            last_cycle: None,
        };
        let (snapshot, _) = watch::channel(state.snapshot());
        GeofenceService {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                snapshot,
                cycle_gate: Mutex::new(()),
                oracle,
                geometry,
                alerts,
                broadcaster: Broadcaster::new(settings.subscriber_queue),
                settings,
            }),
        }
    }

    /// Parse a `{zoneIds, alertClasses}` body and apply it
    pub async fn configure(&self, body: &Value) -> Result<ZoneUpdate, GeofenceError> {
        let specs = parse_zone_config(body, &self.inner.settings.default_alert_class)?;
        Ok(self.set_watched_zones(&specs).await)
    }

    /// Replace the watch set.
    ///
    /// New zones get their display name and their baseline before the lock
    /// is released, so no cycle can see them without a baseline. The
    /// scheduler runs exactly while at least one zone is watched.
    pub async fn set_watched_zones(&self, specs: &[ZoneSpec]) -> ZoneUpdate {
        let mut state = self.inner.state.lock().await;
        let delta = state.engine.set_watched_zones(specs);

        if !delta.removed.is_empty() {
            info!("Stopped watching zones {:?}", delta.removed);
        }
        if !delta.added.is_empty() {
            info!("Started watching zones {:?}", delta.added);
            self.resolve_names(&mut state.engine, &delta.added).await;
            self.capture_baselines(&mut state.engine, &delta.added).await;
        }

        if state.engine.is_watching() {
            if !state.scheduler.is_running() {
                self.start_scheduler(&mut state.scheduler);
            }
        } else if state.scheduler.stop().is_some() {
            // The cancelled task may be waiting for this lock; it gives up
            // on its own once it gets it
            debug!("No zones left to watch");
        }

        self.publish(&state);
        ZoneUpdate {
            added: delta.added,
            removed: delta.removed,
            zones: state.engine.registry().snapshot(),
        }
    }

    fn publish(&self, state: &State) {
        self.inner.snapshot.send_replace(state.snapshot());
    }

    async fn zone_names(&self, zones: &[ZoneId]) -> Result<HashMap<ZoneId, String>, StoreError> {
        let timeout = self.inner.settings.oracle_timeout;
        match tokio::time::timeout(timeout, self.inner.geometry.zone_names(zones)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    async fn resolve_names(&self, engine: &mut GeofenceEngine, zones: &[ZoneId]) {
        match self.zone_names(zones).await {
            Ok(names) => {
                for (zone_id, name) in names {
                    engine.set_zone_name(&zone_id, name);
                }
            }
            Err(e) => warn!("Cannot look up zone names, using zone ids: {}", e),
        }
    }

    /// One containment query for all new zones, split per zone
    async fn capture_baselines(&self, engine: &mut GeofenceEngine, zones: &[ZoneId]) {
        let sightings = match self.query_oracle(zones).await {
            Ok(sightings) => sightings,
            Err(e) => {
                warn!(
                    "Cannot capture baseline of zones {:?}, watching them with an empty baseline: {}",
                    zones, e
                );
                return;
            }
        };

        let mut inside: BTreeMap<ZoneId, Vec<VesselId>> =
            zones.iter().map(|z| (z.clone(), Vec::new())).collect();
        for sighting in sightings {
            if let Some(vessels) = inside.get_mut(&sighting.zone_id) {
                vessels.push(sighting.vessel_id);
            }
        }
        for (zone_id, vessels) in inside {
            if let Some(count) = engine.install_baseline(&zone_id, vessels) {
                info!("Zone {} baseline: {} vessel(s) already inside", zone_id, count);
            }
        }
    }

    fn start_scheduler(&self, scheduler: &mut Scheduler) {
        // Weak, so a forgotten scheduler cannot keep the service alive
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        scheduler.start(move |token: CancellationToken| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    GeofenceService { inner }.cycle(Some(&token)).await;
                }
            }
        });
    }

    async fn query_oracle(&self, zones: &[ZoneId]) -> Result<HashSet<Sighting>, StoreError> {
        let settings = &self.inner.settings;
        let query = self
            .inner
            .oracle
            .vessels_inside(zones, settings.freshness_window);
        match tokio::time::timeout(settings.oracle_timeout, query).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(settings.oracle_timeout)),
        }
    }

    async fn store_alert(&self, alert: NewAlert) -> Result<AlertEvent, StoreError> {
        let timeout = self.inner.settings.store_timeout;
        match tokio::time::timeout(timeout, self.inner.alerts.append(alert, now_millis())).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    /// Run one poll cycle now, outside the schedule
    pub async fn poll_once(&self) -> CycleOutcome {
        self.cycle(None).await
    }

    async fn cycle(&self, token: Option<&CancellationToken>) -> CycleOutcome {
        let Ok(_gate) = self.inner.cycle_gate.try_lock() else {
            debug!("Previous poll cycle still running, tick skipped");
            return CycleOutcome::Busy;
        };

        let mut state = self.inner.state.lock().await;
        if token.is_some_and(|t| t.is_cancelled()) {
            return CycleOutcome::Cancelled;
        }

        let outcome = self.poll(&mut state).await;
        self.publish(&state);
        outcome
    }

    async fn poll(&self, state: &mut State) -> CycleOutcome {
        let zones = state.engine.watched_zones();
        if zones.is_empty() {
            return CycleOutcome::Idle;
        }

        let result = self.query_oracle(&zones).await;
        // Stamped when the observation arrived, not when it was asked for
        let at_millis = now_millis();
        let mut summary = CycleSummary {
            at_millis,
            entries: 0,
            exits: 0,
            ok: true,
        };

        let sightings = match result {
            Ok(sightings) => sightings,
            Err(e) => {
                warn!("Poll cycle aborted, containment query failed: {}", e);
                summary.ok = false;
                state.last_cycle = Some(summary.clone());
                return CycleOutcome::Ran(summary);
            }
        };
        debug!(
            "Poll cycle: {} sighting(s) in {} zone(s)",
            sightings.len(),
            zones.len()
        );

        let transitions = state.engine.diff(&sightings);
        for transition in &transitions {
            let event = match self.store_alert(transition.to_alert(at_millis)).await {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        "Cannot store alert for vessel {} in zone {}, retrying next cycle: {}",
                        transition.vessel_id, transition.zone_id, e
                    );
                    summary.ok = false;
                    break;
                }
            };

            state.engine.commit(transition);
            match transition.kind {
                AlertKind::Entered => summary.entries += 1,
                AlertKind::Exited => summary.exits += 1,
            }
            info!("{}", event.description);
            self.push(&event);
        }

        state.last_cycle = Some(summary.clone());
        CycleOutcome::Ran(summary)
    }

    fn push(&self, event: &AlertEvent) {
        let report = self
            .inner
            .broadcaster
            .broadcast(&IntrusionMessage::from_alert(event));
        if report.skipped > 0 {
            debug!("{} subscriber(s) missed alert {}", report.skipped, event.alert_id);
        }
    }

    /// Store and push an operator's alert for `vessel_id`.
    ///
    /// Presence is left alone, so poll cycles keep reporting what the oracle
    /// sees. Zone name and class come from the watch set when the zone is
    /// watched.
    pub async fn record_alert(
        &self,
        vessel_id: &VesselId,
        manual: ManualAlert,
    ) -> Result<AlertEvent, StoreError> {
        let (name, watched_class) = {
            let snapshot = self.inner.snapshot.borrow();
            (
                snapshot.engine.zone_names.get(&manual.zone_id).cloned(),
                snapshot.zones.get(&manual.zone_id).cloned(),
            )
        };
        let zone_name = match name {
            Some(name) => name,
            None => match self.zone_names(std::slice::from_ref(&manual.zone_id)).await {
                Ok(mut names) => names
                    .remove(&manual.zone_id)
                    .unwrap_or_else(|| manual.zone_id.to_string()),
                Err(e) => {
                    debug!("No name for zone {}: {}", manual.zone_id, e);
                    manual.zone_id.to_string()
                }
            },
        };
        let alert_class = manual
            .alert_class
            .or(watched_class)
            .unwrap_or_else(|| AlertClass::new(self.inner.settings.default_alert_class.as_str()));

        let event = self
            .store_alert(NewAlert {
                vessel_id: vessel_id.clone(),
                zone_id: manual.zone_id,
                zone_name,
                alert_class,
                kind: manual.kind,
                at_millis: now_millis(),
                comment: manual.comment,
            })
            .await?;
        info!("{} (raised by operator)", event.description);
        self.push(&event);
        Ok(event)
    }

    pub async fn acknowledge(
        &self,
        vessel_id: &VesselId,
        alert_id: AlertId,
    ) -> Result<AlertEvent, StoreError> {
        let timeout = self.inner.settings.store_timeout;
        let ack = self.inner.alerts.acknowledge(vessel_id, alert_id, now_millis());
        let event = match tokio::time::timeout(timeout, ack).await {
            Ok(result) => result?,
            Err(_) => return Err(StoreError::Timeout(timeout)),
        };
        info!("Alert {} of vessel {} acknowledged", alert_id, vessel_id);
        Ok(event)
    }

    pub async fn alert_log(&self, vessel_id: &VesselId) -> Result<AlertLog, StoreError> {
        self.inner
            .alerts
            .get(vessel_id)
            .await?
            .ok_or_else(|| GeofenceError::VesselNotFound(vessel_id.clone()).into())
    }

    pub async fn alert_logs(&self) -> Result<Vec<AlertLog>, StoreError> {
        self.inner.alerts.list().await
    }

    pub fn zones(&self) -> ZoneList {
        let snapshot = self.inner.snapshot.borrow();
        ZoneList {
            zones: snapshot.zones.clone(),
            zone_names: snapshot.engine.zone_names.clone(),
        }
    }

    /// Last published state; does not wait for a running cycle
    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.inner.snapshot.borrow();
        ServiceStatus {
            engine: snapshot.engine.clone(),
            scheduler_running: snapshot.scheduler_running,
            subscribers: self.inner.broadcaster.subscriber_count(),
            last_cycle: snapshot.last_cycle.clone(),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.inner.broadcaster.subscribe()
    }

    /// Stop polling and wait for an in-flight cycle to finish
    pub async fn shutdown(&self) {
        let handle = {
            let mut state = self.inner.state.lock().await;
            let handle = state.scheduler.stop();
            self.publish(&state);
            handle
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Poll task ended abnormally: {}", e);
            }
        }
    }

    /// Subsystem entry point: keeps the service up until shutdown is requested
    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), StoreError> {
        info!(
            "Geofence service ready: poll every {:?}, freshness window {:?}",
            self.inner.settings.poll_interval, self.inner.settings.freshness_window
        );
        subsys.on_shutdown_requested().await;
        info!("Geofence service shutting down");
        self.shutdown().await;
        Ok(())
    }
}
