//! Store wrapper whose reads and writes can be switched to fail.

use super::{AlertStore, MemoryStore, TelemetryStore};
use crate::error::StoreError;
use crate::models::{Alert, Device, DeviceStatus, TelemetryMetrics, TelemetryRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::OffsetDateTime;

#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub alert_reads: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read_gate(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }

    fn write_gate(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for FlakyStore {
    async fn get_device(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        self.read_gate()?;
        self.inner.get_device(device_id).await
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        self.read_gate()?;
        self.inner.list_devices().await
    }

    async fn upsert_device(
        &self,
        device_id: &str,
        last_seen: OffsetDateTime,
        status: DeviceStatus,
    ) -> Result<(), StoreError> {
        self.write_gate()?;
        self.inner.upsert_device(device_id, last_seen, status).await
    }

    async fn append_telemetry(
        &self,
        device_id: &str,
        timestamp: OffsetDateTime,
        metrics: TelemetryMetrics,
    ) -> Result<(), StoreError> {
        self.write_gate()?;
        self.inner.append_telemetry(device_id, timestamp, metrics).await
    }

    async fn commit_submission(&self, record: &TelemetryRecord) -> Result<(), StoreError> {
        self.write_gate()?;
        self.inner.commit_submission(record).await
    }

    async fn query_devices_stale_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<Device>, StoreError> {
        self.read_gate()?;
        self.inner.query_devices_stale_before(cutoff).await
    }

    async fn telemetry_range(
        &self,
        device_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<TelemetryRecord>, StoreError> {
        self.read_gate()?;
        self.inner.telemetry_range(device_id, start, end).await
    }
}

#[async_trait]
impl AlertStore for FlakyStore {
    async fn latest_alert_per_device(
        &self,
        device_ids: &[String],
    ) -> Result<HashMap<String, Alert>, StoreError> {
        self.alert_reads.fetch_add(1, Ordering::SeqCst);
        self.read_gate()?;
        self.inner.latest_alert_per_device(device_ids).await
    }

    async fn append_alert(
        &self,
        device_id: &str,
        detected_at: OffsetDateTime,
        last_seen: OffsetDateTime,
    ) -> Result<Alert, StoreError> {
        self.write_gate()?;
        self.inner.append_alert(device_id, detected_at, last_seen).await
    }

    async fn append_alerts(&self, alerts: &[Alert]) -> Result<(), StoreError> {
        self.write_gate()?;
        self.inner.append_alerts(alerts).await
    }

    async fn list_alerts(&self, device_id: Option<&str>) -> Result<Vec<Alert>, StoreError> {
        self.read_gate()?;
        self.inner.list_alerts(device_id).await
    }
}
