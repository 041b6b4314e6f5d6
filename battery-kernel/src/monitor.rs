/**
 * LIVENESS MONITOR - Détection des devices silencieux
 *
 * ROLE :
 * Periodically finds devices whose last telemetry is older than the
 * staleness threshold and records one alert per offline episode.
 *
 * HOW IT WORKS (one tick) :
 * 1. cutoff = now - staleness_threshold
 * 2. candidates = devices with last_seen < cutoff (none: no-op)
 * 3. latest alert per candidate from the ledger
 * 4. skip candidates whose latest alert saw the same last_seen (within tolerance)
 * 5. warn + build one alert per remaining candidate
 * 6. commit the tick's alerts as one unit
 *
 * LOOP :
 * Ticks never overlap: the wait starts only after the tick returned. A failed
 * tick is logged and retried on the next cycle. Only the shutdown signal
 * ends the loop, and never in the middle of a tick.
 */

use crate::error::KernelError;
use crate::models::{rfc3339, Alert, Device};
use crate::store::{AlertStore, TelemetryStore};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub staleness_threshold: time::Duration,
    pub check_interval: std::time::Duration,
    pub dedup_tolerance: time::Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            staleness_threshold: time::Duration::minutes(10),
            check_interval: std::time::Duration::from_secs(5 * 60),
            dedup_tolerance: time::Duration::seconds(60),
        }
    }
}

/// Whether `prior` already covers the offline episode checkpointed at
/// `last_seen`. A heuristic: two distinct episodes whose checkpoints fall
/// within `tolerance` of each other are treated as one.
pub fn is_same_episode(prior: &Alert, last_seen: OffsetDateTime, tolerance: time::Duration) -> bool {
    (last_seen - prior.last_seen).abs() <= tolerance
}

pub struct LivenessMonitor {
    devices: Arc<dyn TelemetryStore>,
    alerts: Arc<dyn AlertStore>,
    settings: MonitorSettings,
}

impl LivenessMonitor {
    pub fn new(
        devices: Arc<dyn TelemetryStore>,
        alerts: Arc<dyn AlertStore>,
        settings: MonitorSettings,
    ) -> Self {
        Self { devices, alerts, settings }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Runs one scan at wall-clock `now` and returns the number of alerts raised.
    pub async fn run_liveness_tick(&self, now: OffsetDateTime) -> Result<usize, KernelError> {
        let Some(cutoff) = now.checked_sub(self.settings.staleness_threshold) else {
            // Threshold reaches past the earliest representable instant.
            debug!(now = %rfc3339(now), "no device can be stale yet");
            return Ok(0);
        };

        let candidates = self
            .devices
            .query_devices_stale_before(cutoff)
            .await
            .map_err(|e| {
                error!(operation = "query_devices_stale_before", error = %e, "liveness tick aborted");
                KernelError::store("query_devices_stale_before")(e)
            })?;
        if candidates.is_empty() {
            debug!(cutoff = %rfc3339(cutoff), "no stale devices");
            return Ok(0);
        }

        let ids: Vec<String> = candidates.iter().map(|d| d.device_id.clone()).collect();
        let latest = self.alerts.latest_alert_per_device(&ids).await.map_err(|e| {
            error!(
                operation = "latest_alert_per_device",
                devices = ids.len(),
                error = %e,
                "liveness tick aborted"
            );
            KernelError::store("latest_alert_per_device")(e)
        })?;

        let new_alerts: Vec<Alert> = candidates
            .iter()
            .filter(|device| self.needs_alert(device, latest.get(&device.device_id)))
            .map(|device| {
                warn!(
                    device_id = %device.device_id,
                    last_seen = %rfc3339(device.last_seen),
                    "device offline"
                );
                Alert::new(&device.device_id, now, device.last_seen)
            })
            .collect();

        if new_alerts.is_empty() {
            debug!(stale = candidates.len(), "all stale devices already alerted");
            return Ok(0);
        }

        if let Err(e) = self.alerts.append_alerts(&new_alerts).await {
            let device_ids: Vec<&str> = new_alerts.iter().map(|a| a.device_id.as_str()).collect();
            error!(
                operation = "append_alerts",
                device_ids = ?device_ids,
                error = %e,
                "failed to record offline alerts, will retry next tick"
            );
            return Err(KernelError::store("append_alerts")(e));
        }

        info!(alerts_raised = new_alerts.len(), stale = candidates.len(), "liveness tick complete");
        Ok(new_alerts.len())
    }

    fn needs_alert(&self, device: &Device, prior: Option<&Alert>) -> bool {
        match prior {
            Some(alert) if is_same_episode(alert, device.last_seen, self.settings.dedup_tolerance) => {
                debug!(device_id = %device.device_id, alert_id = %alert.id, "offline episode already alerted");
                false
            }
            _ => true,
        }
    }

    /// Background loop: tick, then sleep `check_interval`, until shutdown.
    pub fn spawn(monitor: Arc<LivenessMonitor>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let settings = monitor.settings;
        info!(
            check_interval_secs = settings.check_interval.as_secs(),
            staleness_threshold_secs = settings.staleness_threshold.whole_seconds(),
            dedup_tolerance_secs = settings.dedup_tolerance.whole_seconds(),
            "starting liveness monitor"
        );

        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = monitor.run_liveness_tick(OffsetDateTime::now_utc()).await {
                    debug!(error = %e, "liveness tick failed, retrying after the interval");
                }

                tokio::select! {
                    _ = tokio::time::sleep(settings.check_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            info!("liveness monitor stopped");
        })
    }
}
