//! # Geoguard Core
//!
//! Platform-independent geofence intrusion detection for vessel tracking.
//!
//! This crate contains the pure state machine with **zero I/O dependencies**:
//! no async runtime, no database driver, no clock. The caller supplies
//! containment results and timestamps; the crate decides which vessels
//! crossed which zone boundary and keeps the per-vessel alert logs
//! consistent.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  geoguard-core (pure, synchronous)                          │
//! │  ├── geofence/  (zone ids, registry, baselines, presence)   │
//! │  ├── engine/    (GeofenceEngine: diff + commit + status)    │
//! │  ├── alert      (AlertLog aggregation, acknowledgement)     │
//! │  └── message    (push message schema)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                 ▲
//!    ┌────────────┴──────────────────────────────┐
//!    │  geoguard-server                          │
//!    │  (oracle, alert store, scheduler, web)    │
//!    └───────────────────────────────────────────┘
//! ```
//!
//! ## Example: one poll cycle
//!
//! ```rust
//! use geoguard_core::{AlertKind, GeofenceEngine, Sighting, ZoneSpec};
//! use std::collections::HashSet;
//!
//! let mut engine = GeofenceEngine::new();
//! engine.set_watched_zones(&[ZoneSpec::new("Z1", "Warning")]);
//! engine.install_baseline(&"Z1".into(), Vec::new());
//!
//! let inside: HashSet<Sighting> = [Sighting::new("V1", "Z1")].into_iter().collect();
//! let transitions = engine.observe(&inside);
//! assert_eq!(transitions.len(), 1);
//! assert_eq!(transitions[0].kind, AlertKind::Entered);
//!
//! // Still inside: nothing new
//! assert!(engine.observe(&inside).is_empty());
//! ```

pub mod alert;
pub mod engine;
pub mod error;
pub mod geofence;
pub mod message;

// Re-export commonly used types
pub use alert::{AlertEvent, AlertId, AlertKind, AlertLog, NewAlert};
pub use engine::{BaselineCount, EngineStatus, GeofenceEngine, Transition};
pub use error::GeofenceError;
pub use geofence::{
    parse_zone_config, AlertClass, Sighting, VesselId, WatchDelta, ZoneId, ZoneSpec,
    DEFAULT_ALERT_CLASS,
};
pub use message::IntrusionMessage;
