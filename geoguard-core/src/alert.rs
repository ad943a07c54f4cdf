//! Per-vessel alert logs.
//!
//! Every zone transition becomes an [`AlertEvent`] appended to the log of the
//! vessel involved. Logs only grow; the one mutation allowed on a written
//! event is acknowledgement.

use serde::{Deserialize, Serialize};

use crate::error::GeofenceError;
use crate::geofence::{AlertClass, VesselId, ZoneId};

/// Identifier of an alert, unique within one vessel's log
pub type AlertId = u64;

/// Direction of a zone transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Entered,
    Exited,
}

impl AlertKind {
    /// Event name used in push messages
    pub fn event_name(&self) -> &'static str {
        match self {
            AlertKind::Entered => "entry",
            AlertKind::Exited => "exit",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            AlertKind::Entered => "entered",
            AlertKind::Exited => "exited",
        }
    }
}

/// Alert content before it has been given an id and a place in a log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    pub vessel_id: VesselId,
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub alert_class: AlertClass,
    pub kind: AlertKind,
    pub at_millis: i64,
    /// Free text from the operator, for alerts raised by hand
    pub comment: Option<String>,
}

impl NewAlert {
    pub fn description(&self) -> String {
        format!(
            "Vessel {} {} zone {} ({})",
            self.vessel_id,
            self.kind.verb(),
            self.zone_name,
            self.alert_class
        )
    }
}

/// A recorded alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub alert_id: AlertId,
    pub vessel_id: VesselId,
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub alert_class: AlertClass,
    pub kind: AlertKind,
    pub at_millis: i64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_at_millis: Option<i64>,
}

/// Append-only alert history of one vessel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertLog {
    pub vessel_id: VesselId,
    pub alerts: Vec<AlertEvent>,
    #[serde(rename = "createdAt")]
    pub created_at_millis: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at_millis: i64,
    next_alert_id: AlertId,
}

impl AlertLog {
    pub fn new(vessel_id: VesselId, now_millis: i64) -> Self {
        AlertLog {
            vessel_id,
            alerts: Vec::new(),
            created_at_millis: now_millis,
            updated_at_millis: now_millis,
            next_alert_id: 1,
        }
    }

    /// Append an alert, returning the stored event.
    ///
    /// Timestamps never go backwards within a log: an alert older than the
    /// latest entry is stamped with the latest entry's time.
    pub fn append(&mut self, alert: NewAlert) -> &AlertEvent {
        let description = alert.description();
        let at_millis = match self.alerts.last() {
            Some(last) if last.at_millis > alert.at_millis => last.at_millis,
            _ => alert.at_millis,
        };

        let alert_id = self.next_alert_id;
        self.next_alert_id += 1;
        self.updated_at_millis = self.updated_at_millis.max(at_millis);

        self.alerts.push(AlertEvent {
            alert_id,
            vessel_id: self.vessel_id.clone(),
            zone_id: alert.zone_id,
            zone_name: alert.zone_name,
            alert_class: alert.alert_class,
            kind: alert.kind,
            at_millis,
            description,
            comment: alert.comment,
            acknowledged: false,
            ack_at_millis: None,
        });
        &self.alerts[self.alerts.len() - 1]
    }

    /// Mark one alert as acknowledged.
    ///
    /// Acknowledging twice moves the acknowledgement time forward.
    pub fn acknowledge(
        &mut self,
        alert_id: AlertId,
        now_millis: i64,
    ) -> Result<&AlertEvent, GeofenceError> {
        let vessel_id = self.vessel_id.clone();
        let event = self
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id)
            .ok_or(GeofenceError::AlertNotFound {
                vessel_id,
                alert_id,
            })?;
        event.acknowledged = true;
        event.ack_at_millis = Some(now_millis);
        Ok(event)
    }

    pub fn get(&self, alert_id: AlertId) -> Option<&AlertEvent> {
        self.alerts.iter().find(|a| a.alert_id == alert_id)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn unacknowledged(&self) -> usize {
        self.alerts.iter().filter(|a| !a.acknowledged).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(kind: AlertKind, at_millis: i64) -> NewAlert {
        NewAlert {
            vessel_id: VesselId::from("V1"),
            zone_id: ZoneId::from("Z1"),
            zone_name: "North anchorage".to_owned(),
            alert_class: AlertClass::new("Danger"),
            kind,
            at_millis,
            comment: None,
        }
    }

    #[test]
    fn test_append_assigns_ids_and_updates() {
        let mut log = AlertLog::new(VesselId::from("V1"), 1_000);

        let first = log.append(alert(AlertKind::Entered, 2_000)).alert_id;
        let second = log.append(alert(AlertKind::Exited, 3_000)).alert_id;

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.created_at_millis, 1_000);
        assert_eq!(log.updated_at_millis, 3_000);
        assert_eq!(
            log.get(1).unwrap().description,
            "Vessel V1 entered zone North anchorage (Danger)"
        );
    }

    #[test]
    fn test_append_keeps_time_monotonic() {
        let mut log = AlertLog::new(VesselId::from("V1"), 0);
        log.append(alert(AlertKind::Entered, 5_000));
        let late = log.append(alert(AlertKind::Exited, 4_000)).at_millis;

        assert_eq!(late, 5_000);
        assert!(log.alerts.windows(2).all(|w| w[0].at_millis <= w[1].at_millis));
    }

    #[test]
    fn test_acknowledge() {
        let mut log = AlertLog::new(VesselId::from("V1"), 0);
        let id = log.append(alert(AlertKind::Entered, 10)).alert_id;
        assert_eq!(log.unacknowledged(), 1);

        let event = log.acknowledge(id, 99).unwrap();
        assert!(event.acknowledged);
        assert_eq!(event.ack_at_millis, Some(99));
        assert_eq!(log.unacknowledged(), 0);
    }

    #[test]
    fn test_acknowledge_unknown_alert() {
        let mut log = AlertLog::new(VesselId::from("V1"), 0);
        log.append(alert(AlertKind::Entered, 10));

        let err = log.acknowledge(7, 99).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(log.unacknowledged(), 1);
    }

    #[test]
    fn test_comment_is_kept() {
        let mut log = AlertLog::new(VesselId::from("V1"), 0);
        let mut manual = alert(AlertKind::Entered, 10);
        manual.comment = Some("Pilot boat, expected".to_owned());
        let event = log.append(manual).clone();

        assert_eq!(event.comment.as_deref(), Some("Pilot boat, expected"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["comment"], "Pilot boat, expected");
    }

    #[test]
    fn test_persisted_shape() {
        let mut log = AlertLog::new(VesselId::from("V1"), 1);
        log.append(alert(AlertKind::Entered, 2));

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["vesselId"], "V1");
        assert_eq!(json["createdAt"], 1);
        assert_eq!(json["updatedAt"], 2);
        assert_eq!(json["alerts"][0]["kind"], "entered");
        assert_eq!(json["alerts"][0]["alertClass"], "Danger");
        assert!(json["alerts"][0].get("comment").is_none());

        let back: AlertLog = serde_json::from_value(json).unwrap();
        assert_eq!(back, log);
    }
}
