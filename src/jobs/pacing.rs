//! Rate gate and failure-spike backpressure.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Number of completions the failure window looks at.
pub const FAILURE_WINDOW: usize = 10;
/// Failure ratio above which dispatch pauses.
pub const FAILURE_RATIO: f64 = 0.7;
pub const FAILURE_PAUSE: Duration = Duration::from_secs(1);

struct GateState {
    window_start: Instant,
    used: u32,
    next_at: Instant,
}

/// Admits up to `burst` operations per rolling second, then spaces the rest
/// `1000 / qps` ms apart. A `qps` of zero admits everything immediately.
pub struct QpsGate {
    qps: u32,
    burst: u32,
    state: Mutex<GateState>,
}

impl QpsGate {
    pub fn new(qps: u32, burst: u32) -> Self {
        let now = Instant::now();
        Self {
            qps,
            burst,
            state: Mutex::new(GateState {
                window_start: now,
                used: 0,
                next_at: now,
            }),
        }
    }

    pub const fn is_enabled(&self) -> bool {
        self.qps > 0
    }

    /// Wait until the caller may start one operation.
    pub async fn acquire(&self) {
        if let Some(wait) = self.reserve(Instant::now()) {
            tokio::time::sleep(wait).await;
        }
    }

    /// Book a slot at `now` and return how long the caller must wait for it.
    fn reserve(&self, now: Instant) -> Option<Duration> {
        if self.qps == 0 {
            return None;
        }
        let mut state = self.state.lock();
        if now.duration_since(state.window_start) >= WINDOW {
            state.window_start = now;
            state.used = 0;
        }
        if state.used < self.burst {
            state.used += 1;
            return None;
        }

        let interval = WINDOW / self.qps;
        let wait = state.next_at.saturating_duration_since(now);
        let base = if wait.is_zero() { now } else { state.next_at };
        state.next_at = base + interval;
        (!wait.is_zero()).then_some(wait)
    }
}

/// Sliding record of the last completions and whether each failed.
#[derive(Debug, Default)]
pub struct FailureWindow {
    recent: Mutex<VecDeque<bool>>,
}

impl FailureWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completion; returns `true` when the window is full and more
    /// than 70 % of it failed.
    pub fn record(&self, failed: bool) -> bool {
        let mut recent = self.recent.lock();
        recent.push_back(failed);
        while recent.len() > FAILURE_WINDOW {
            recent.pop_front();
        }
        if recent.len() < FAILURE_WINDOW {
            return false;
        }
        let failures = recent.iter().filter(|failed| **failed).count();
        failures as f64 / recent.len() as f64 > FAILURE_RATIO
    }

    /// Record and sleep for [`FAILURE_PAUSE`] on a spike.
    pub async fn record_and_pause(&self, failed: bool) {
        if self.record(failed) {
            tracing::debug!(pause_ms = FAILURE_PAUSE.as_millis() as u64, "failure spike, pausing");
            tokio::time::sleep(FAILURE_PAUSE).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn should_not_wait_when_disabled() {
        let gate = QpsGate::new(0, 0);
        assert!(!gate.is_enabled());
        let start = Instant::now();
        for _ in 0..100 {
            gate.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn should_spend_burst_then_pace() {
        let gate = QpsGate::new(10, 3);
        let now = Instant::now();
        assert_eq!(gate.reserve(now), None);
        assert_eq!(gate.reserve(now), None);
        assert_eq!(gate.reserve(now), None);
        // first paced slot is free, the next ones queue 100 ms apart
        assert_eq!(gate.reserve(now), None);
        assert_eq!(gate.reserve(now), Some(Duration::from_millis(100)));
        assert_eq!(gate.reserve(now), Some(Duration::from_millis(200)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_refill_burst_after_window() {
        let gate = QpsGate::new(5, 2);
        let now = Instant::now();
        assert_eq!(gate.reserve(now), None);
        assert_eq!(gate.reserve(now), None);
        assert_eq!(gate.reserve(now), None);
        assert!(gate.reserve(now).is_some());

        let later = now + Duration::from_secs(2);
        assert_eq!(gate.reserve(later), None);
        assert_eq!(gate.reserve(later), None);
    }

    #[tokio::test(start_paused = true)]
    async fn should_pace_acquires_over_time() {
        let gate = QpsGate::new(4, 0);
        let start = Instant::now();
        for _ in 0..5 {
            gate.acquire().await;
        }
        // 250 ms spacing after the first slot
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[test]
    fn should_trigger_only_on_full_window() {
        let window = FailureWindow::new();
        for _ in 0..9 {
            assert!(!window.record(true));
        }
        assert!(window.record(true));
    }

    #[test]
    fn should_require_more_than_seventy_percent() {
        let window = FailureWindow::new();
        for _ in 0..3 {
            window.record(false);
        }
        for _ in 0..6 {
            window.record(true);
        }
        // 7 of 10
        assert!(!window.record(true));
        // oldest success drops out: 8 of 10
        assert!(window.record(true));
    }

    #[tokio::test(start_paused = true)]
    async fn should_pause_on_spike() {
        let window = FailureWindow::new();
        for _ in 0..9 {
            window.record(true);
        }
        let start = Instant::now();
        window.record_and_pause(true).await;
        assert_eq!(start.elapsed(), FAILURE_PAUSE);
    }
}
