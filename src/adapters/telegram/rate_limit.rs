//! Request rate gate: token bucket plus minimum inter-request spacing.
//!
//! Every outbound call to the messaging service passes through one gate per
//! session. On FloodWait the gate is held for the demanded duration plus
//! jitter, so no worker retries into the cooldown.

use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct GateState {
    tokens: f64,
    last_refill: Instant,
    not_before: Instant,
}

pub struct RateGate {
    state: Mutex<GateState>,
    capacity: f64,
    refill_per_sec: f64,
    min_interval: Duration,
}

impl RateGate {
    pub fn new(capacity: u32, refill_per_sec: f64, min_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(GateState {
                tokens: capacity as f64,
                last_refill: now,
                not_before: now,
            }),
            capacity: capacity as f64,
            refill_per_sec,
            min_interval,
        }
    }

    /// Sensible defaults for an interactive user session: short bursts
    /// allowed, sustained rate well under the service's tolerance.
    pub fn for_user_session() -> Self {
        Self::new(10, 4.0, Duration::from_millis(50))
    }

    /// Wait until a request may be sent, consuming one token.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut s = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(s.last_refill).as_secs_f64();
                s.tokens = (s.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                s.last_refill = now;
                if now < s.not_before {
                    s.not_before - now
                } else if s.tokens >= 1.0 {
                    s.tokens -= 1.0;
                    s.not_before = now + self.min_interval;
                    return;
                } else {
                    Duration::from_secs_f64((1.0 - s.tokens) / self.refill_per_sec)
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Hold the gate shut for `seconds` plus jitter (FloodWait). Callers
    /// retry the same request afterwards without consuming an attempt.
    pub async fn hold(&self, seconds: u64) {
        let jitter = rand::thread_rng().gen_range(1..=5);
        let until = Instant::now() + Duration::from_secs(seconds + jitter);
        let mut s = self.state.lock().await;
        if until > s.not_before {
            s.not_before = until;
            debug!(seconds, jitter, "rate gate held for flood wait");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enforces_min_interval() {
        let gate = RateGate::new(100, 1000.0, Duration::from_millis(30));
        let start = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        gate.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn hold_delays_next_acquire() {
        tokio::time::pause();
        let gate = RateGate::new(10, 10.0, Duration::from_millis(1));
        gate.acquire().await;
        gate.hold(30).await;
        let start = Instant::now();
        gate.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(30), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(40));
    }
}
