//! Alert log storage.
//!
//! One document per vessel holds that vessel's complete alert history:
//! `{vesselId, alerts: [...], createdAt, updatedAt}`.
//!
//! Storage path: `~/.local/share/geoguard/alerts/{vessel}.json`

use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::Mutex;

use geoguard_core::{AlertEvent, AlertId, AlertLog, GeofenceError, NewAlert, VesselId};

use crate::error::StoreError;

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Append an alert to the vessel's log, creating the log on first use.
    /// Returns the stored event, including its alert id.
    async fn append(&self, alert: NewAlert, now_millis: i64) -> Result<AlertEvent, StoreError>;

    /// Mark one alert acknowledged
    async fn acknowledge(
        &self,
        vessel_id: &VesselId,
        alert_id: AlertId,
        now_millis: i64,
    ) -> Result<AlertEvent, StoreError>;

    async fn get(&self, vessel_id: &VesselId) -> Result<Option<AlertLog>, StoreError>;

    /// All logs, most recently updated first
    async fn list(&self) -> Result<Vec<AlertLog>, StoreError>;
}

fn newest_first(logs: &mut [AlertLog]) {
    logs.sort_by(|a, b| {
        b.updated_at_millis
            .cmp(&a.updated_at_millis)
            .then_with(|| a.vessel_id.cmp(&b.vessel_id))
    });
}

/// Alert logs kept in memory only
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    logs: Mutex<HashMap<VesselId, AlertLog>>,
    fail_writes: AtomicBool,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make appends fail until switched off again
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn append(&self, alert: NewAlert, now_millis: i64) -> Result<AlertEvent, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("alert store set to fail".into()));
        }
        let mut logs = self.logs.lock().await;
        let log = logs
            .entry(alert.vessel_id.clone())
            .or_insert_with(|| AlertLog::new(alert.vessel_id.clone(), now_millis));
        Ok(log.append(alert).clone())
    }

    async fn acknowledge(
        &self,
        vessel_id: &VesselId,
        alert_id: AlertId,
        now_millis: i64,
    ) -> Result<AlertEvent, StoreError> {
        let mut logs = self.logs.lock().await;
        let log = logs
            .get_mut(vessel_id)
            .ok_or_else(|| GeofenceError::VesselNotFound(vessel_id.clone()))?;
        Ok(log.acknowledge(alert_id, now_millis)?.clone())
    }

    async fn get(&self, vessel_id: &VesselId) -> Result<Option<AlertLog>, StoreError> {
        Ok(self.logs.lock().await.get(vessel_id).cloned())
    }

    async fn list(&self) -> Result<Vec<AlertLog>, StoreError> {
        let mut logs: Vec<AlertLog> = self.logs.lock().await.values().cloned().collect();
        newest_first(&mut logs);
        Ok(logs)
    }
}

/// Alert logs stored as JSON files, one per vessel
pub struct FileAlertStore {
    base_dir: PathBuf,
    /// In-memory cache of loaded logs
    cache: Mutex<HashMap<VesselId, AlertLog>>,
}

impl FileAlertStore {
    /// Create the store, making sure the directory exists
    pub async fn new(base_dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&base_dir).await?;
        debug!("Alert log directory: {}", base_dir.display());
        Ok(Self {
            base_dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// File for a vessel; anything but ASCII letters, digits, `-` and `_`
    /// is hex-escaped so ids cannot walk out of the directory
    fn file_path(&self, vessel_id: &VesselId) -> PathBuf {
        let mut name = String::new();
        for b in vessel_id.as_str().bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                name.push(b as char);
            } else {
                name.push_str(&format!("%{:02X}", b));
            }
        }
        self.base_dir.join(format!("{}.json", name))
    }

    async fn load(&self, vessel_id: &VesselId) -> Result<Option<AlertLog>, StoreError> {
        let path = self.file_path(vessel_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temporary file so a crash never leaves half a log
    async fn save(&self, log: &AlertLog) -> Result<(), StoreError> {
        let path = self.file_path(&log.vessel_id);
        let tmp = path.with_extension("json.tmp");
        let mut bytes = serde_json::to_vec_pretty(log)?;
        bytes.push(b'\n');
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Stored alert log of {} -> {}", log.vessel_id, path.display());
        Ok(())
    }

    async fn cached<'a>(
        &self,
        cache: &'a mut HashMap<VesselId, AlertLog>,
        vessel_id: &VesselId,
    ) -> Result<Option<&'a mut AlertLog>, StoreError> {
        if !cache.contains_key(vessel_id) {
            match self.load(vessel_id).await? {
                Some(log) => {
                    cache.insert(vessel_id.clone(), log);
                }
                None => return Ok(None),
            }
        }
        Ok(cache.get_mut(vessel_id))
    }
}

#[async_trait]
impl AlertStore for FileAlertStore {
    async fn append(&self, alert: NewAlert, now_millis: i64) -> Result<AlertEvent, StoreError> {
        let mut cache = self.cache.lock().await;
        let vessel_id = alert.vessel_id.clone();

        let mut log = match self.cached(&mut cache, &vessel_id).await? {
            Some(log) => log.clone(),
            None => {
                info!("Creating alert log for vessel {}", vessel_id);
                AlertLog::new(vessel_id.clone(), now_millis)
            }
        };
        let event = log.append(alert).clone();

        // Only update the cache once the file is written
        self.save(&log).await?;
        cache.insert(vessel_id, log);
        Ok(event)
    }

    async fn acknowledge(
        &self,
        vessel_id: &VesselId,
        alert_id: AlertId,
        now_millis: i64,
    ) -> Result<AlertEvent, StoreError> {
        let mut cache = self.cache.lock().await;
        let mut log = self
            .cached(&mut cache, vessel_id)
            .await?
            .ok_or_else(|| GeofenceError::VesselNotFound(vessel_id.clone()))?
            .clone();

        let event = log.acknowledge(alert_id, now_millis)?.clone();
        self.save(&log).await?;
        cache.insert(vessel_id.clone(), log);
        Ok(event)
    }

    async fn get(&self, vessel_id: &VesselId) -> Result<Option<AlertLog>, StoreError> {
        let mut cache = self.cache.lock().await;
        Ok(self.cached(&mut cache, vessel_id).await?.map(|log| log.clone()))
    }

    async fn list(&self) -> Result<Vec<AlertLog>, StoreError> {
        let cache = self.cache.lock().await;
        let mut logs: HashMap<VesselId, AlertLog> = cache.clone();

        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<AlertLog>(&bytes) {
                    Ok(log) => {
                        logs.entry(log.vessel_id.clone()).or_insert(log);
                    }
                    Err(e) => warn!("Failed to parse alert log {}: {}", path.display(), e),
                },
                Err(e) => warn!("Failed to open alert log {}: {}", path.display(), e),
            }
        }

        let mut logs: Vec<AlertLog> = logs.into_values().collect();
        newest_first(&mut logs);
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoguard_core::{AlertClass, AlertKind, ZoneId};
    use tempfile::TempDir;

    fn alert(vessel: &str, kind: AlertKind, at_millis: i64) -> NewAlert {
        NewAlert {
            vessel_id: VesselId::from(vessel),
            zone_id: ZoneId::from("Z1"),
            zone_name: "Anchorage".to_owned(),
            alert_class: AlertClass::new("Warning"),
            kind,
            at_millis,
            comment: None,
        }
    }

    async fn create_test_store() -> (FileAlertStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileAlertStore::new(temp_dir.path().to_path_buf()).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_append_and_reload() {
        let (store, temp) = create_test_store().await;

        let first = store.append(alert("V1", AlertKind::Entered, 10), 10).await.unwrap();
        let second = store.append(alert("V1", AlertKind::Exited, 20), 20).await.unwrap();
        assert_eq!(first.alert_id, 1);
        assert_eq!(second.alert_id, 2);

        // A fresh store over the same directory sees the same log
        let reopened = FileAlertStore::new(temp.path().to_path_buf()).await.unwrap();
        let log = reopened.get(&VesselId::from("V1")).await.unwrap().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.created_at_millis, 10);
        assert_eq!(log.updated_at_millis, 20);

        // ids continue after a reload
        let third = reopened.append(alert("V1", AlertKind::Entered, 30), 30).await.unwrap();
        assert_eq!(third.alert_id, 3);
    }

    #[tokio::test]
    async fn test_acknowledge_persists() {
        let (store, temp) = create_test_store().await;
        let event = store.append(alert("V1", AlertKind::Entered, 10), 10).await.unwrap();

        let acked = store
            .acknowledge(&VesselId::from("V1"), event.alert_id, 50)
            .await
            .unwrap();
        assert!(acked.acknowledged);

        let reopened = FileAlertStore::new(temp.path().to_path_buf()).await.unwrap();
        let log = reopened.get(&VesselId::from("V1")).await.unwrap().unwrap();
        assert_eq!(log.get(event.alert_id).unwrap().ack_at_millis, Some(50));
    }

    #[tokio::test]
    async fn test_acknowledge_not_found() {
        let (store, _temp) = create_test_store().await;

        let err = store
            .acknowledge(&VesselId::from("V404"), 1, 50)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        store.append(alert("V1", AlertKind::Entered, 10), 10).await.unwrap();
        let err = store.acknowledge(&VesselId::from("V1"), 99, 50).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_vessel_id_with_slashes() {
        let (store, temp) = create_test_store().await;
        store
            .append(alert("../escape/V1", AlertKind::Entered, 10), 10)
            .await
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(temp.path()).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
        assert!(store.get(&VesselId::from("../escape/V1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let (store, _temp) = create_test_store().await;
        store.append(alert("V1", AlertKind::Entered, 10), 10).await.unwrap();
        store.append(alert("V2", AlertKind::Entered, 30), 30).await.unwrap();
        store.append(alert("V3", AlertKind::Entered, 20), 20).await.unwrap();

        let logs = store.list().await.unwrap();
        let order: Vec<&str> = logs.iter().map(|l| l.vessel_id.as_str()).collect();
        assert_eq!(order, vec!["V2", "V3", "V1"]);
    }

    #[tokio::test]
    async fn test_memory_store_failure_switch() {
        let store = MemoryAlertStore::new();
        store.set_fail_writes(true);
        assert!(store.append(alert("V1", AlertKind::Entered, 1), 1).await.is_err());
        assert!(store.list().await.unwrap().is_empty());

        store.set_fail_writes(false);
        let event = store.append(alert("V1", AlertKind::Entered, 1), 1).await.unwrap();
        assert_eq!(event.alert_id, 1);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
