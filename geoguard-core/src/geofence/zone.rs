//! Watched zone definitions and the zone registry.
//!
//! Defines the identifier types shared by the whole engine, the zone
//! configuration parser and the [`GeofenceRegistry`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::GeofenceError;

/// Alert classification used when the operator supplies none
pub const DEFAULT_ALERT_CLASS: &str = "Warning";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                $name(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                $name(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a drawn zone polygon in the geometry store
    ZoneId
);
string_id!(
    /// Identifier of a tracked vessel (usually its MMSI)
    VesselId
);

/// Operator-chosen alert label, e.g. "Warning" or "Danger".
///
/// Opaque to the engine, copied into every alert raised for the zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertClass(String);

impl AlertClass {
    pub fn new(label: impl Into<String>) -> Self {
        AlertClass(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AlertClass {
    fn default() -> Self {
        AlertClass(DEFAULT_ALERT_CLASS.to_owned())
    }
}

impl fmt::Display for AlertClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of a watch-set configuration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSpec {
    pub id: ZoneId,
    pub alert_class: AlertClass,
}

impl ZoneSpec {
    pub fn new(id: impl Into<ZoneId>, alert_class: impl Into<String>) -> Self {
        ZoneSpec {
            id: id.into(),
            alert_class: AlertClass::new(alert_class),
        }
    }
}

/// A vessel reported inside a zone by the containment oracle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sighting {
    pub vessel_id: VesselId,
    pub zone_id: ZoneId,
}

impl Sighting {
    pub fn new(vessel_id: impl Into<VesselId>, zone_id: impl Into<ZoneId>) -> Self {
        Sighting {
            vessel_id: vessel_id.into(),
            zone_id: zone_id.into(),
        }
    }
}

/// Parse the configuration payload `{zoneIds: [..], alertClasses: [..]}`.
///
/// The two arrays are matched by position. A zone without a usable label
/// gets `default_class`. Zone ids may be strings or numbers, since the
/// geometry store hands out numeric polygon ids.
pub fn parse_zone_config(body: &Value, default_class: &str) -> Result<Vec<ZoneSpec>, GeofenceError> {
    let object = body
        .as_object()
        .ok_or_else(|| GeofenceError::InvalidInput("expected a JSON object".to_owned()))?;

    let zone_ids = match object.get("zoneIds") {
        Some(Value::Array(ids)) => ids,
        Some(_) => {
            return Err(GeofenceError::InvalidInput(
                "zoneIds must be an array".to_owned(),
            ))
        }
        None => return Err(GeofenceError::InvalidInput("zoneIds is missing".to_owned())),
    };

    let classes: &[Value] = match object.get("alertClasses") {
        Some(Value::Array(classes)) => classes,
        Some(Value::Null) | None => &[],
        Some(_) => {
            return Err(GeofenceError::InvalidInput(
                "alertClasses must be an array".to_owned(),
            ))
        }
    };

    zone_ids
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let id = match raw {
                Value::String(s) if !s.trim().is_empty() => s.trim().to_owned(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(GeofenceError::InvalidInput(format!(
                        "zoneIds[{}] is not a zone id: {}",
                        i, other
                    )))
                }
            };
            let alert_class = match classes.get(i) {
                Some(Value::String(label)) if !label.trim().is_empty() => label.trim(),
                _ => default_class,
            };
            Ok(ZoneSpec::new(id, alert_class))
        })
        .collect()
}

/// Zones added and removed by one watch-set update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchDelta {
    pub added: Vec<ZoneId>,
    pub removed: Vec<ZoneId>,
}

/// In-memory registry of watched zones
#[derive(Debug, Default)]
pub struct GeofenceRegistry {
    /// Watched zones and their alert classification
    zones: BTreeMap<ZoneId, AlertClass>,
    /// Display names resolved from the geometry store
    names: HashMap<ZoneId, String>,
}

impl GeofenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the watch set with `specs`.
    ///
    /// Every listed zone gets its alert class upserted, the last occurrence
    /// winning when an id is listed twice. Removed zones lose their cached
    /// display name as well.
    pub fn replace(&mut self, specs: &[ZoneSpec]) -> WatchDelta {
        let mut wanted: BTreeMap<ZoneId, AlertClass> = BTreeMap::new();
        for spec in specs {
            wanted.insert(spec.id.clone(), spec.alert_class.clone());
        }

        let removed: Vec<ZoneId> = self
            .zones
            .keys()
            .filter(|id| !wanted.contains_key(*id))
            .cloned()
            .collect();
        let added: Vec<ZoneId> = wanted
            .keys()
            .filter(|id| !self.zones.contains_key(*id))
            .cloned()
            .collect();

        for id in &removed {
            self.zones.remove(id);
            self.names.remove(id);
        }
        for (id, class) in wanted {
            self.zones.insert(id, class);
        }

        WatchDelta { added, removed }
    }

    pub fn contains(&self, zone_id: &ZoneId) -> bool {
        self.zones.contains_key(zone_id)
    }

    pub fn alert_class(&self, zone_id: &ZoneId) -> Option<&AlertClass> {
        self.zones.get(zone_id)
    }

    /// Cache the display name of a watched zone. Unknown zones are ignored.
    pub fn set_name(&mut self, zone_id: &ZoneId, name: impl Into<String>) -> bool {
        if self.zones.contains_key(zone_id) {
            self.names.insert(zone_id.clone(), name.into());
            true
        } else {
            false
        }
    }

    /// Display name of a zone, falling back to its id
    pub fn name(&self, zone_id: &ZoneId) -> String {
        self.names
            .get(zone_id)
            .cloned()
            .unwrap_or_else(|| zone_id.to_string())
    }

    /// Display names of all watched zones
    pub fn names(&self) -> BTreeMap<ZoneId, String> {
        self.zones
            .keys()
            .map(|id| (id.clone(), self.name(id)))
            .collect()
    }

    pub fn zone_ids(&self) -> impl Iterator<Item = &ZoneId> {
        self.zones.keys()
    }

    pub fn snapshot(&self) -> BTreeMap<ZoneId, AlertClass> {
        self.zones.clone()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_parallel_arrays() {
        let body = json!({
            "zoneIds": ["Z1", 42, "Z3"],
            "alertClasses": ["Danger", "", null]
        });
        let specs = parse_zone_config(&body, DEFAULT_ALERT_CLASS).unwrap();

        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0], ZoneSpec::new("Z1", "Danger"));
        assert_eq!(specs[1], ZoneSpec::new("42", "Warning"));
        assert_eq!(specs[2], ZoneSpec::new("Z3", "Warning"));
    }

    #[test]
    fn test_parse_missing_classes() {
        let body = json!({ "zoneIds": ["Z1"] });
        let specs = parse_zone_config(&body, "Caution").unwrap();
        assert_eq!(specs, vec![ZoneSpec::new("Z1", "Caution")]);
    }

    #[test]
    fn test_parse_rejects_non_array() {
        let err = parse_zone_config(&json!({ "zoneIds": "Z1" }), DEFAULT_ALERT_CLASS).unwrap_err();
        assert!(matches!(err, GeofenceError::InvalidInput(_)));

        let err = parse_zone_config(&json!(["Z1"]), DEFAULT_ALERT_CLASS).unwrap_err();
        assert!(matches!(err, GeofenceError::InvalidInput(_)));

        let err = parse_zone_config(&json!({ "zoneIds": [{}] }), DEFAULT_ALERT_CLASS).unwrap_err();
        assert!(matches!(err, GeofenceError::InvalidInput(_)));
    }

    #[test]
    fn test_replace_reports_delta() {
        let mut registry = GeofenceRegistry::new();

        let delta = registry.replace(&[ZoneSpec::new("Z1", "Warning"), ZoneSpec::new("Z2", "Danger")]);
        assert_eq!(delta.added, vec![ZoneId::from("Z1"), ZoneId::from("Z2")]);
        assert!(delta.removed.is_empty());

        let delta = registry.replace(&[ZoneSpec::new("Z2", "Warning"), ZoneSpec::new("Z3", "Danger")]);
        assert_eq!(delta.added, vec![ZoneId::from("Z3")]);
        assert_eq!(delta.removed, vec![ZoneId::from("Z1")]);
        assert_eq!(
            registry.alert_class(&ZoneId::from("Z2")),
            Some(&AlertClass::new("Warning"))
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_zone_last_class_wins() {
        let mut registry = GeofenceRegistry::new();
        let delta = registry.replace(&[ZoneSpec::new("Z1", "Warning"), ZoneSpec::new("Z1", "Danger")]);

        assert_eq!(delta.added, vec![ZoneId::from("Z1")]);
        assert_eq!(
            registry.alert_class(&ZoneId::from("Z1")),
            Some(&AlertClass::new("Danger"))
        );
    }

    #[test]
    fn test_names_follow_zone_lifetime() {
        let mut registry = GeofenceRegistry::new();
        registry.replace(&[ZoneSpec::new("Z1", "Warning")]);

        assert_eq!(registry.name(&ZoneId::from("Z1")), "Z1");
        assert!(registry.set_name(&ZoneId::from("Z1"), "Harbour entrance"));
        assert!(!registry.set_name(&ZoneId::from("Z9"), "Unwatched"));
        assert_eq!(registry.name(&ZoneId::from("Z1")), "Harbour entrance");

        registry.replace(&[]);
        assert!(registry.names().is_empty());
        assert!(registry.is_empty());
    }
}
