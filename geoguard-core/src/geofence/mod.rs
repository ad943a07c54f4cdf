//! Geofence watch state: zones, baselines and vessel presence.

pub mod presence;
pub mod zone;

pub use presence::{BaselineStore, PresenceTracker};
pub use zone::{
    parse_zone_config, AlertClass, GeofenceRegistry, Sighting, VesselId, WatchDelta, ZoneId,
    ZoneSpec, DEFAULT_ALERT_CLASS,
};
