/**
 * STORES - Interfaces de persistance consommées par le coeur
 *
 * ROLE :
 * The gate and the monitor only talk to these two traits. Every decision
 * re-reads current state through them; nothing is cached across calls.
 *
 * - TelemetryStore = device registry + telemetry rows
 * - AlertStore     = append-only ledger of offline episodes
 *
 * Multi-row writes (`commit_submission`, `append_alerts`) are all-or-nothing.
 * `MemoryStore` implements both traits with an optional JSON-lines journal.
 */

mod journal;
mod memory;

#[cfg(test)]
pub(crate) mod testing;

pub use journal::{Journal, StoreWrite};
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::models::{Alert, Device, DeviceStatus, TelemetryMetrics, TelemetryRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn get_device(&self, device_id: &str) -> Result<Option<Device>, StoreError>;

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError>;

    async fn upsert_device(
        &self,
        device_id: &str,
        last_seen: OffsetDateTime,
        status: DeviceStatus,
    ) -> Result<(), StoreError>;

    /// Fails with `UnknownDevice` if the device was never upserted.
    async fn append_telemetry(
        &self,
        device_id: &str,
        timestamp: OffsetDateTime,
        metrics: TelemetryMetrics,
    ) -> Result<(), StoreError>;

    /// Upserts the device as online at `record.timestamp` and appends the row,
    /// as one unit: either both are durable or neither is.
    async fn commit_submission(&self, record: &TelemetryRecord) -> Result<(), StoreError>;

    /// Devices whose `last_seen` is strictly before `cutoff`.
    async fn query_devices_stale_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<Device>, StoreError>;

    /// Rows with `start <= timestamp <= end`, oldest first.
    async fn telemetry_range(
        &self,
        device_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<TelemetryRecord>, StoreError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Most recent alert (by detection time) for each of `device_ids` that has one.
    async fn latest_alert_per_device(
        &self,
        device_ids: &[String],
    ) -> Result<HashMap<String, Alert>, StoreError>;

    async fn append_alert(
        &self,
        device_id: &str,
        detected_at: OffsetDateTime,
        last_seen: OffsetDateTime,
    ) -> Result<Alert, StoreError>;

    /// Appends every alert or none of them.
    async fn append_alerts(&self, alerts: &[Alert]) -> Result<(), StoreError>;

    /// Newest first; all devices when `device_id` is `None`.
    async fn list_alerts(&self, device_id: Option<&str>) -> Result<Vec<Alert>, StoreError>;
}
