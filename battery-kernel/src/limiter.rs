/**
 * SLIDING-WINDOW LIMITER - Admission control par device
 *
 * ROLE :
 * Decides, per device identifier, whether a telemetry submission is admitted
 * or rate limited: at most `max_requests` admissions within any trailing
 * `window`.
 *
 * HOW IT WORKS :
 * - One timestamp list per device, in process memory only (reset on restart)
 * - Each check prunes entries older than the window, compares, then appends
 * - A single mutex guards the map; the critical section does no I/O
 * - Idle devices are evicted by `sweep` so the map does not grow forever
 *
 * CLOCK :
 * Only `std::time::Instant` (monotonic) is used here. Wall-clock time never
 * enters window arithmetic.
 */

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    RateLimited,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        self == Admission::Admitted
    }
}

#[derive(Debug)]
struct DeviceWindow {
    /// Admission instants still inside the window; never longer than `max_requests`.
    hits: VecDeque<Instant>,
    /// Last time this device was checked, admitted or not.
    last_check: Instant,
}

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    idle_retention: Duration,
    windows: Mutex<HashMap<String, DeviceWindow>>,
}

impl SlidingWindowLimiter {
    /// `max_requests` and `window` are validated by the config layer; a zero
    /// value here is a programming error.
    pub fn new(max_requests: usize, window: Duration, idle_retention: Duration) -> Self {
        assert!(max_requests > 0, "max_requests must be positive");
        assert!(!window.is_zero(), "window must be positive");
        Self {
            max_requests,
            window,
            idle_retention,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Prune, compare, append. Checks for the same device are linearized by
    /// the map lock, so two callers can never both take the last slot.
    pub fn admit(&self, device_id: &str, now: Instant) -> Admission {
        let mut windows = self.windows.lock();
        let entry = windows
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceWindow {
                hits: VecDeque::with_capacity(self.max_requests.min(64)),
                last_check: now,
            });

        // Concurrent callers may hand in instants slightly out of order, so
        // retain rather than pop from the front.
        let window = self.window;
        entry.hits.retain(|t| now.saturating_duration_since(*t) < window);
        entry.last_check = entry.last_check.max(now);

        if entry.hits.len() >= self.max_requests {
            return Admission::RateLimited;
        }
        entry.hits.push_back(now);
        Admission::Admitted
    }

    /// Evicts devices with no admission left in their window and no check
    /// for at least `idle_retention`. Returns the number of evicted keys.
    pub fn sweep(&self, now: Instant) -> usize {
        let window = self.window;
        let retention = self.idle_retention;
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, entry| {
            entry.hits.retain(|t| now.saturating_duration_since(*t) < window);
            !(entry.hits.is_empty() && now.saturating_duration_since(entry.last_check) >= retention)
        });
        before - windows.len()
    }

    /// Number of device keys currently held in memory.
    pub fn tracked_devices(&self) -> usize {
        self.windows.lock().len()
    }

    /// Periodic `sweep` until the shutdown flag flips.
    pub fn spawn_sweeper(
        limiter: Arc<SlidingWindowLimiter>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        info!(every_secs = every.as_secs(), "starting rate-limiter sweeper");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(every) => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
                let evicted = limiter.sweep(Instant::now());
                if evicted > 0 {
                    debug!(evicted, remaining = limiter.tracked_devices(), "evicted idle limiter keys");
                }
            }
            info!("rate-limiter sweeper stopped");
        })
    }
}
