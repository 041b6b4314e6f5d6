use super::journal::{Journal, StoreWrite};
use super::{AlertStore, TelemetryStore};
use crate::error::StoreError;
use crate::models::{Alert, Device, DeviceStatus, TelemetryMetrics, TelemetryRecord};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Default)]
struct StoreState {
    devices: HashMap<String, Device>,
    /// Sorted by timestamp per device.
    telemetry: HashMap<String, Vec<TelemetryRecord>>,
    /// Insertion order.
    alerts: Vec<Alert>,
}

impl StoreState {
    /// Referential checks for a whole batch, before anything is applied.
    fn check(&self, batch: &[StoreWrite]) -> Result<(), StoreError> {
        let mut upserted: HashSet<&str> = HashSet::new();
        for write in batch {
            let device_id = match write {
                StoreWrite::UpsertDevice(d) => {
                    upserted.insert(d.device_id.as_str());
                    continue;
                }
                StoreWrite::AppendTelemetry(r) => &r.device_id,
                StoreWrite::AppendAlert(a) => &a.device_id,
            };
            if !self.devices.contains_key(device_id) && !upserted.contains(device_id.as_str()) {
                return Err(StoreError::UnknownDevice(device_id.clone()));
            }
        }
        Ok(())
    }

    fn apply(&mut self, write: StoreWrite) {
        match write {
            StoreWrite::UpsertDevice(device) => {
                self.devices.insert(device.device_id.clone(), device);
            }
            StoreWrite::AppendTelemetry(record) => {
                let rows = self.telemetry.entry(record.device_id.clone()).or_default();
                let at = rows.partition_point(|r| r.timestamp <= record.timestamp);
                rows.insert(at, record);
            }
            StoreWrite::AppendAlert(alert) => self.alerts.push(alert),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: StoreState,
    journal: Option<Journal>,
}

/// In-process implementation of both stores. With a journal every committed
/// batch is written to disk before it becomes visible; without one the data
/// lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the journal at `path` and replays it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let (journal, batches) = Journal::open(path).await?;
        let mut state = StoreState::default();
        for batch in batches {
            for write in batch {
                state.apply(write);
            }
        }
        info!(
            path = %journal.path().display(),
            devices = state.devices.len(),
            alerts = state.alerts.len(),
            "store restored from journal"
        );
        Ok(Self {
            inner: RwLock::new(Inner { state, journal: Some(journal) }),
        })
    }

    /// All-or-nothing: validated, journaled, then applied.
    async fn commit(&self, batch: Vec<StoreWrite>) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        inner.state.check(&batch)?;
        if let Some(journal) = inner.journal.as_mut() {
            journal.append(&batch).await?;
        }
        for write in batch {
            inner.state.apply(write);
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn get_device(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.inner.read().await.state.devices.get(device_id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let inner = self.inner.read().await;
        let mut devices: Vec<Device> = inner.state.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(devices)
    }

    async fn upsert_device(
        &self,
        device_id: &str,
        last_seen: OffsetDateTime,
        status: DeviceStatus,
    ) -> Result<(), StoreError> {
        self.commit(vec![StoreWrite::UpsertDevice(Device {
            device_id: device_id.to_string(),
            last_seen,
            status,
        })])
        .await
    }

    async fn append_telemetry(
        &self,
        device_id: &str,
        timestamp: OffsetDateTime,
        metrics: TelemetryMetrics,
    ) -> Result<(), StoreError> {
        self.commit(vec![StoreWrite::AppendTelemetry(TelemetryRecord {
            device_id: device_id.to_string(),
            timestamp,
            metrics,
        })])
        .await
    }

    async fn commit_submission(&self, record: &TelemetryRecord) -> Result<(), StoreError> {
        self.commit(vec![
            StoreWrite::UpsertDevice(Device {
                device_id: record.device_id.clone(),
                last_seen: record.timestamp,
                status: DeviceStatus::Online,
            }),
            StoreWrite::AppendTelemetry(record.clone()),
        ])
        .await
    }

    async fn query_devices_stale_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<Device>, StoreError> {
        let inner = self.inner.read().await;
        let mut stale: Vec<Device> = inner
            .state
            .devices
            .values()
            .filter(|d| d.last_seen < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(stale)
    }

    async fn telemetry_range(
        &self,
        device_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<TelemetryRecord>, StoreError> {
        let inner = self.inner.read().await;
        let Some(rows) = inner.state.telemetry.get(device_id) else {
            return Ok(Vec::new());
        };
        let from = rows.partition_point(|r| r.timestamp < start);
        let to = rows.partition_point(|r| r.timestamp <= end);
        Ok(rows[from..to.max(from)].to_vec())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn latest_alert_per_device(
        &self,
        device_ids: &[String],
    ) -> Result<HashMap<String, Alert>, StoreError> {
        let wanted: HashSet<&str> = device_ids.iter().map(String::as_str).collect();
        let inner = self.inner.read().await;
        let mut latest: HashMap<String, Alert> = HashMap::new();
        for alert in inner.state.alerts.iter().filter(|a| wanted.contains(a.device_id.as_str())) {
            match latest.get(&alert.device_id) {
                // Later insertion wins a tie on detection time.
                Some(current) if current.detected_at > alert.detected_at => {}
                _ => {
                    latest.insert(alert.device_id.clone(), alert.clone());
                }
            }
        }
        Ok(latest)
    }

    async fn append_alert(
        &self,
        device_id: &str,
        detected_at: OffsetDateTime,
        last_seen: OffsetDateTime,
    ) -> Result<Alert, StoreError> {
        let alert = Alert::new(device_id, detected_at, last_seen);
        self.commit(vec![StoreWrite::AppendAlert(alert.clone())]).await?;
        Ok(alert)
    }

    async fn append_alerts(&self, alerts: &[Alert]) -> Result<(), StoreError> {
        if alerts.is_empty() {
            return Ok(());
        }
        self.commit(alerts.iter().cloned().map(StoreWrite::AppendAlert).collect())
            .await
    }

    async fn list_alerts(&self, device_id: Option<&str>) -> Result<Vec<Alert>, StoreError> {
        let inner = self.inner.read().await;
        let mut alerts: Vec<Alert> = inner
            .state
            .alerts
            .iter()
            .rev()
            .filter(|a| device_id.map_or(true, |id| a.device_id == id))
            .cloned()
            .collect();
        // Stable sort keeps newer insertions first on equal detection times.
        alerts.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(alerts)
    }
}
