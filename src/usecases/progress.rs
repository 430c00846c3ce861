//! Progress reporter: byte counters and instantaneous speed per job.
//!
//! Snapshots are read-only and safe from any task; counters are atomics so
//! readers never contend the queue lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding window over which speed is computed.
const SPEED_WINDOW: Duration = Duration::from_secs(10);

/// Ring of `(timestamp, cumulative bytes)` samples; the instantaneous speed
/// is the slope of the newest window.
pub struct ProgressReporter {
    downloaded_bytes: AtomicU64,
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            downloaded_bytes: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(64)),
        }
    }

    /// Seed the cumulative counter from persisted state on rehydration.
    pub fn seed(&self, bytes: u64) {
        self.downloaded_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Record `n` freshly downloaded bytes (one progress tick).
    pub fn add_bytes(&self, n: u64) {
        let total = self.downloaded_bytes.fetch_add(n, Ordering::Relaxed) + n;
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap();
        samples.push_back((now, total));
        while let Some(&(t, _)) = samples.front() {
            if now.duration_since(t) > SPEED_WINDOW {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes.load(Ordering::Relaxed)
    }

    /// Bytes per second over the newest window; 0 when idle.
    pub fn speed(&self) -> f64 {
        let samples = self.samples.lock().unwrap();
        let (Some(&(t0, b0)), Some(&(t1, b1))) = (samples.front(), samples.back()) else {
            return 0.0;
        };
        // Stale window means the transfer stalled.
        if t1.elapsed() > SPEED_WINDOW {
            return 0.0;
        }
        let dt = t1.duration_since(t0).as_secs_f64();
        if dt <= 0.0 {
            return 0.0;
        }
        (b1.saturating_sub(b0)) as f64 / dt
    }
}
