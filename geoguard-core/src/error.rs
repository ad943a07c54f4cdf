//! Error types for geofence configuration and alert handling

use thiserror::Error;

use crate::alert::AlertId;
use crate::geofence::VesselId;

/// Errors produced by the pure geofence state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeofenceError {
    /// Configuration payload could not be interpreted
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No alert log exists for the vessel
    #[error("No alert log for vessel '{0}'")]
    VesselNotFound(VesselId),

    /// The vessel has an alert log, but not this alert
    #[error("No alert {alert_id} in log of vessel '{vessel_id}'")]
    AlertNotFound { vessel_id: VesselId, alert_id: AlertId },
}

impl GeofenceError {
    /// True for both "unknown vessel" and "unknown alert"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GeofenceError::VesselNotFound(_) | GeofenceError::AlertNotFound { .. }
        )
    }
}
