//! Push message sent to live subscribers for every stored alert

use serde::{Deserialize, Serialize};

use crate::alert::{AlertEvent, AlertId, AlertKind};
use crate::geofence::{VesselId, ZoneId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Intrusion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionEvent {
    Entry,
    Exit,
}

impl From<AlertKind> for TransitionEvent {
    fn from(kind: AlertKind) -> Self {
        match kind {
            AlertKind::Entered => TransitionEvent::Entry,
            AlertKind::Exited => TransitionEvent::Exit,
        }
    }
}

/// `{type: "intrusion", event: "entry"|"exit", ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrusionMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub event: TransitionEvent,
    pub vessel_id: VesselId,
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub timestamp: i64,
    pub alert_type: String,
    pub description: String,
    pub alert_id: AlertId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl IntrusionMessage {
    /// Message for a stored alert
    pub fn from_alert(alert: &AlertEvent) -> Self {
        IntrusionMessage {
            message_type: MessageType::Intrusion,
            event: alert.kind.into(),
            vessel_id: alert.vessel_id.clone(),
            zone_id: alert.zone_id.clone(),
            zone_name: alert.zone_name.clone(),
            timestamp: alert.at_millis,
            alert_type: alert.alert_class.to_string(),
            description: alert.description.clone(),
            alert_id: alert.alert_id,
            comment: alert.comment.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertLog, NewAlert};
    use crate::geofence::AlertClass;

    #[test]
    fn test_message_schema() {
        let mut log = AlertLog::new(VesselId::from("V1"), 0);
        let alert = log
            .append(NewAlert {
                vessel_id: VesselId::from("V1"),
                zone_id: ZoneId::from("Z1"),
                zone_name: "Harbour".to_owned(),
                alert_class: AlertClass::new("Warning"),
                kind: AlertKind::Entered,
                at_millis: 1_700_000_000_000,
                comment: None,
            })
            .clone();

        let json = serde_json::to_value(IntrusionMessage::from_alert(&alert)).unwrap();
        assert_eq!(json["type"], "intrusion");
        assert_eq!(json["event"], "entry");
        assert_eq!(json["vesselId"], "V1");
        assert_eq!(json["zoneId"], "Z1");
        assert_eq!(json["zoneName"], "Harbour");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert_eq!(json["alertType"], "Warning");
        assert_eq!(json["alertId"], 1);
        assert!(json.get("comment").is_none());
    }

    #[test]
    fn test_exit_carries_comment() {
        let mut log = AlertLog::new(VesselId::from("V1"), 0);
        log.append(NewAlert {
            vessel_id: VesselId::from("V1"),
            zone_id: ZoneId::from("Z1"),
            zone_name: "Z1".to_owned(),
            alert_class: AlertClass::default(),
            kind: AlertKind::Entered,
            at_millis: 5,
            comment: None,
        });
        let alert = log
            .append(NewAlert {
                vessel_id: VesselId::from("V1"),
                zone_id: ZoneId::from("Z1"),
                zone_name: "Z1".to_owned(),
                alert_class: AlertClass::default(),
                kind: AlertKind::Exited,
                at_millis: 6,
                comment: Some("left by tug".to_owned()),
            })
            .clone();
        let json = serde_json::to_value(IntrusionMessage::from_alert(&alert)).unwrap();

        assert_eq!(json["event"], "exit");
        assert_eq!(json["alertId"], 2);
        assert_eq!(json["comment"], "left by tug");
    }
}
