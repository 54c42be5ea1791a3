//! Fixed-window request counters keyed by caller identifier.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone)]
pub struct RateLimitRecord {
    pub identifier: String,
    pub window_start: Instant,
    pub count: u32,
}

/// Result of counting one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub count: u32,
    pub remaining: u32,
    pub reset_in_ms: u64,
}

impl RateDecision {
    /// Whole seconds until the window resets, rounded up.
    pub fn reset_secs(&self) -> u64 {
        self.reset_in_ms.div_ceil(1000)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> u32 {
        self.config.limit
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.config.window_ms)
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, RateLimitRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn check(&self, identifier: &str) -> RateDecision {
        self.check_at(identifier, Instant::now())
    }

    /// Count one request for `identifier` at `now`.
    ///
    /// Rejected requests are still counted; a rejection never restarts the
    /// window.
    pub fn check_at(&self, identifier: &str, now: Instant) -> RateDecision {
        let window = self.window();
        let mut records = self.records();

        let record = records
            .entry(identifier.to_string())
            .or_insert_with(|| RateLimitRecord {
                identifier: identifier.to_string(),
                window_start: now,
                count: 0,
            });
        if now.saturating_duration_since(record.window_start) >= window {
            *record = RateLimitRecord {
                identifier: identifier.to_string(),
                window_start: now,
                count: 0,
            };
        }

        record.count = record.count.saturating_add(1);
        let elapsed = now.saturating_duration_since(record.window_start);
        let decision = RateDecision {
            allowed: record.count <= self.config.limit,
            limit: self.config.limit,
            count: record.count,
            remaining: self.config.limit.saturating_sub(record.count),
            reset_in_ms: window.saturating_sub(elapsed).as_millis() as u64,
        };
        if !decision.allowed {
            debug!(limiter = %self.name, identifier, count = record.count, "rate limit exceeded");
        }
        decision
    }

    /// Drop records whose window ended more than one full window ago.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let stale_after = self.window() * 2;
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, r| now.saturating_duration_since(r.window_start) <= stale_after);
        before - records.len()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodic sweep on the current Tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!(limiter = %limiter.name, removed, "swept stale rate-limit records");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new("test", RateLimitConfig { limit, window_ms })
    }

    #[test]
    fn request_over_limit_is_rejected_within_window() {
        let rl = limiter(100, 60_000);
        let t0 = Instant::now();
        for i in 1..=100 {
            let d = rl.check_at("10.0.0.1", t0);
            assert!(d.allowed, "request {i} should be allowed");
        }
        let d = rl.check_at("10.0.0.1", t0 + Duration::from_secs(15));
        assert!(!d.allowed);
        assert_eq!(d.count, 101);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.reset_in_ms, 45_000);
        assert_eq!(d.reset_secs(), 45);
    }

    #[test]
    fn expired_window_starts_fresh() {
        let rl = limiter(100, 60_000);
        let t0 = Instant::now();
        for _ in 0..101 {
            rl.check_at("k", t0);
        }
        let d = rl.check_at("k", t0 + Duration::from_millis(60_000));
        assert!(d.allowed);
        assert_eq!(d.count, 1);
        assert_eq!(d.remaining, 99);
        assert_eq!(d.reset_in_ms, 60_000);
    }

    #[test]
    fn rejections_keep_counting_without_resetting_window() {
        let rl = limiter(2, 1_000);
        let t0 = Instant::now();
        let counts: Vec<u32> = (0..5)
            .map(|i| rl.check_at("k", t0 + Duration::from_millis(i * 100)).count)
            .collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
        let d = rl.check_at("k", t0 + Duration::from_millis(900));
        assert_eq!(d.reset_in_ms, 100);
    }

    #[test]
    fn identifiers_are_independent() {
        let rl = limiter(1, 1_000);
        let t0 = Instant::now();
        assert!(rl.check_at("a", t0).allowed);
        assert!(!rl.check_at("a", t0).allowed);
        assert!(rl.check_at("b", t0).allowed);
        assert_eq!(rl.len(), 2);
    }

    #[test]
    fn sweep_removes_only_doubly_stale_records() {
        let rl = limiter(10, 1_000);
        let t0 = Instant::now();
        rl.check_at("old", t0);
        rl.check_at("recent", t0 + Duration::from_millis(1_500));
        let removed = rl.sweep_at(t0 + Duration::from_millis(2_500));
        assert_eq!(removed, 1);
        assert_eq!(rl.len(), 1);
    }

    #[test]
    fn concurrent_checks_never_lose_counts() {
        let rl = Arc::new(limiter(10_000, 60_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        rl.check("shared");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(rl.check("shared").count, 2_001);
    }
}
