//! Ingestion gate: limiter decision first, then one store transaction.
//!
//! A rejected submission never touches the store, so it can never advance a
//! device's `last_seen`.

use crate::error::KernelError;
use crate::limiter::{Admission, SlidingWindowLimiter};
use crate::models::TelemetrySubmission;
use crate::store::TelemetryStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

#[derive(Clone)]
pub struct IngestionGate {
    limiter: Arc<SlidingWindowLimiter>,
    store: Arc<dyn TelemetryStore>,
}

impl IngestionGate {
    pub fn new(limiter: Arc<SlidingWindowLimiter>, store: Arc<dyn TelemetryStore>) -> Self {
        Self { limiter, store }
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    pub fn admit_telemetry(&self, device_id: &str, now: Instant) -> Admission {
        self.limiter.admit(device_id, now)
    }

    /// Validates, admits and commits one submission. `Ok(RateLimited)` is a
    /// normal outcome; store failures are returned and affect this request only.
    pub async fn submit(
        &self,
        submission: TelemetrySubmission,
        now: Instant,
    ) -> Result<Admission, KernelError> {
        submission.validate().map_err(KernelError::Validation)?;

        if self.admit_telemetry(&submission.device_id, now) == Admission::RateLimited {
            debug!(device_id = %submission.device_id, "telemetry rate limited");
            return Ok(Admission::RateLimited);
        }

        let record = submission.into_record();
        if let Err(e) = self.store.commit_submission(&record).await {
            error!(
                device_id = %record.device_id,
                operation = "commit_submission",
                error = %e,
                "telemetry submission failed"
            );
            return Err(KernelError::store("commit_submission")(e));
        }
        debug!(device_id = %record.device_id, "telemetry stored");
        Ok(Admission::Admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceStatus, TelemetryMetrics};
    use crate::store::testing::FlakyStore;
    use crate::store::MemoryStore;
    use battery_devkit::ts;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn submission(device_id: &str, at: OffsetDateTime) -> TelemetrySubmission {
        TelemetrySubmission {
            device_id: device_id.to_string(),
            timestamp: at,
            metrics: TelemetryMetrics { soc_percent: 75.0, voltage_v: 410.0, current_a: 5.0, temp_c: 30.0 },
        }
    }

    fn gate_with(store: Arc<dyn TelemetryStore>, max: usize) -> IngestionGate {
        let limiter = SlidingWindowLimiter::new(max, Duration::from_secs(1), Duration::from_secs(60));
        IngestionGate::new(Arc::new(limiter), store)
    }

    #[test]
    fn test_gate_exposes_its_limiter() {
        let gate = gate_with(Arc::new(MemoryStore::in_memory()), 3);
        assert_eq!(gate.limiter().max_requests(), 3);
        assert_eq!(gate.limiter().window(), Duration::from_secs(1));

        let now = Instant::now();
        for _ in 0..3 {
            assert!(gate.admit_telemetry("d1", now).is_admitted());
        }
        assert_eq!(gate.admit_telemetry("d1", now), Admission::RateLimited);
        assert_eq!(gate.limiter().tracked_devices(), 1);
    }

    #[tokio::test]
    async fn test_admitted_submission_upserts_device_and_row() {
        let store = Arc::new(MemoryStore::in_memory());
        let gate = gate_with(store.clone(), 10);
        let at = ts("2025-01-15T10:00:00Z");

        let outcome = gate.submit(submission("d1", at), Instant::now()).await.unwrap();
        assert_eq!(outcome, Admission::Admitted);

        let device = store.get_device("d1").await.unwrap().unwrap();
        assert_eq!(device.last_seen, at);
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(store.telemetry_range("d1", at, at).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_submission_never_advances_last_seen() {
        let store = Arc::new(MemoryStore::in_memory());
        let gate = gate_with(store.clone(), 1);
        let now = Instant::now();

        gate.submit(submission("d1", ts("2025-01-15T10:00:00Z")), now).await.unwrap();
        let outcome = gate
            .submit(submission("d1", ts("2025-01-15T10:00:01Z")), now + Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(outcome, Admission::RateLimited);

        let device = store.get_device("d1").await.unwrap().unwrap();
        assert_eq!(device.last_seen, ts("2025-01-15T10:00:00Z"));
    }

    #[tokio::test]
    async fn test_invalid_payload_does_not_consume_a_slot() {
        let store = Arc::new(MemoryStore::in_memory());
        let gate = gate_with(store.clone(), 1);
        let now = Instant::now();

        let mut bad = submission("d1", ts("2025-01-15T10:00:00Z"));
        bad.metrics.temp_c = 99.0;
        assert!(matches!(gate.submit(bad, now).await, Err(KernelError::Validation(_))));

        let outcome = gate.submit(submission("d1", ts("2025-01-15T10:00:00Z")), now).await.unwrap();
        assert_eq!(outcome, Admission::Admitted);
    }

    #[tokio::test]
    async fn test_store_failure_is_request_scoped() {
        let store = Arc::new(FlakyStore::new());
        let gate = gate_with(store.clone(), 10);
        let now = Instant::now();

        store.set_fail_writes(true);
        let err = gate.submit(submission("d1", ts("2025-01-15T10:00:00Z")), now).await.unwrap_err();
        assert!(matches!(err, KernelError::Store { operation: "commit_submission", .. }));
        assert!(store.inner.get_device("d1").await.unwrap().is_none());

        store.set_fail_writes(false);
        let outcome = gate.submit(submission("d2", ts("2025-01-15T10:00:00Z")), now).await.unwrap();
        assert_eq!(outcome, Admission::Admitted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_respect_quota() {
        let store = Arc::new(MemoryStore::in_memory());
        let gate = gate_with(store.clone(), 5);
        let now = Instant::now();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    let at = ts("2025-01-15T10:00:00Z") + time::Duration::milliseconds(i);
                    gate.submit(submission("d1", at), now).await.unwrap()
                })
            })
            .collect();

        let mut admitted = 0;
        for t in tasks {
            if t.await.unwrap().is_admitted() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
        let rows = store
            .telemetry_range("d1", ts("2025-01-15T00:00:00Z"), ts("2025-01-16T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 5);
    }
}
