//! Circuit breakers guarding calls into downstream collaborators.
//!
//! ```text
//!            failures >= threshold
//!   CLOSED ─────────────────────────▶ OPEN
//!     ▲                                │  reset_timeout elapsed
//!     │ probe ok                       ▼  (checked on next call)
//!     └─────────────────────────── HALF_OPEN ──probe failed──▶ OPEN
//! ```
//!
//! Breakers are created lazily in a [`BreakerRegistry`] under a composite
//! name such as `orchestrator:judgment`. The registry is the only shared
//! mutable table for breaker state; its lock is never held across an await.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{BreakerConfig, BreakersConfig, FailureCounting};
use crate::error::{GateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Stable composite breaker key: `scope:capability`.
pub fn breaker_name(scope: &str, capability: &str) -> String {
    format!("{scope}:{capability}")
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    recent_failures: VecDeque<Instant>,
    probe_in_flight: bool,
    total_calls: u64,
    total_failures: u64,
    short_circuits: u64,
    last_failure: Option<String>,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealth {
    pub name: String,
    pub state: BreakerState,
    pub healthy: bool,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    /// Time until the next half-open probe is admitted; only while open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_for_ms: Option<u64>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub short_circuits: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            recent_failures: VecDeque::new(),
            probe_in_flight: false,
            total_calls: 0,
            total_failures: 0,
            short_circuits: 0,
            last_failure: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.config.reset_timeout_ms)
    }

    fn retry_in(&self, now: Instant) -> Duration {
        match self.opened_at {
            Some(opened) => self
                .reset_timeout()
                .saturating_sub(now.saturating_duration_since(opened)),
            None => Duration::ZERO,
        }
    }

    /// Admission check for one call. `Err` carries the retry hint in ms.
    ///
    /// An open breaker whose reset timeout has elapsed moves to half-open
    /// here and admits the caller as the single probe.
    pub fn try_acquire(&mut self, now: Instant) -> std::result::Result<(), u64> {
        match self.state {
            BreakerState::Closed => {
                self.total_calls += 1;
                Ok(())
            }
            BreakerState::Open => {
                let retry_in = self.retry_in(now);
                if retry_in.is_zero() {
                    info!(breaker = %self.name, "circuit breaker OPEN -> HALF_OPEN");
                    self.state = BreakerState::HalfOpen;
                    self.probe_in_flight = true;
                    self.total_calls += 1;
                    Ok(())
                } else {
                    self.short_circuits += 1;
                    Err(retry_in.as_millis() as u64)
                }
            }
            BreakerState::HalfOpen => {
                if self.probe_in_flight {
                    self.short_circuits += 1;
                    // The probe resolves within one call timeout.
                    Err(self.config.call_timeout_ms)
                } else {
                    self.probe_in_flight = true;
                    self.total_calls += 1;
                    Ok(())
                }
            }
        }
    }

    pub fn on_success(&mut self, now: Instant) {
        match self.state {
            BreakerState::HalfOpen => {
                info!(breaker = %self.name, "circuit breaker HALF_OPEN -> CLOSED (probe succeeded)");
                self.zero_counters();
                self.state = BreakerState::Closed;
            }
            BreakerState::Closed => {
                self.success_count = self.success_count.saturating_add(1);
                match self.config.counting {
                    FailureCounting::Consecutive => {
                        self.failure_count = 0;
                        self.recent_failures.clear();
                    }
                    FailureCounting::Rolling { window_ms } => self.prune(now, window_ms),
                }
            }
            // Late result from a call admitted before the breaker opened.
            BreakerState::Open => {
                self.success_count = self.success_count.saturating_add(1);
            }
        }
    }

    pub fn on_failure(&mut self, now: Instant, reason: &str) {
        self.total_failures += 1;
        self.last_failure = Some(reason.to_string());

        match self.state {
            BreakerState::HalfOpen => {
                self.failure_count = self.failure_count.saturating_add(1);
                self.state = BreakerState::Open;
                self.opened_at = Some(now);
                self.probe_in_flight = false;
                warn!(breaker = %self.name, reason, "circuit breaker HALF_OPEN -> OPEN (probe failed)");
            }
            BreakerState::Closed => {
                match self.config.counting {
                    FailureCounting::Consecutive => {
                        self.failure_count = self.failure_count.saturating_add(1);
                    }
                    FailureCounting::Rolling { window_ms } => {
                        self.recent_failures.push_back(now);
                        self.prune(now, window_ms);
                    }
                }
                if self.failure_count >= self.config.failure_threshold {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(now);
                    warn!(
                        breaker = %self.name,
                        failures = self.failure_count,
                        threshold = self.config.failure_threshold,
                        "circuit breaker CLOSED -> OPEN"
                    );
                }
            }
            // Already open; the reset timer keeps running from the original trip.
            BreakerState::Open => {
                self.failure_count = self.failure_count.saturating_add(1);
            }
        }
    }

    fn prune(&mut self, now: Instant, window_ms: u64) {
        let window = Duration::from_millis(window_ms);
        while let Some(oldest) = self.recent_failures.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
        self.failure_count = self.recent_failures.len() as u32;
    }

    fn zero_counters(&mut self) {
        self.failure_count = 0;
        self.success_count = 0;
        self.recent_failures.clear();
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    /// Force CLOSED with zeroed counters. Lifetime totals are kept.
    pub fn reset(&mut self) {
        self.zero_counters();
        self.state = BreakerState::Closed;
    }

    pub fn health(&self, now: Instant) -> BreakerHealth {
        let open = self.state == BreakerState::Open;
        BreakerHealth {
            name: self.name.clone(),
            state: self.state,
            healthy: !open,
            failure_count: self.failure_count,
            success_count: self.success_count,
            failure_threshold: self.config.failure_threshold,
            reset_timeout_ms: self.config.reset_timeout_ms,
            retry_in_ms: open.then(|| self.retry_in(now).as_millis() as u64),
            opened_for_ms: self
                .opened_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            total_calls: self.total_calls,
            total_failures: self.total_failures,
            short_circuits: self.short_circuits,
            last_failure: self.last_failure.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// BreakerRegistry
// ---------------------------------------------------------------------------

/// Shared table of named breakers with internal synchronization.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakersConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakersConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Registry where every breaker uses `defaults`.
    pub fn with_defaults(defaults: BreakerConfig) -> Self {
        Self::new(BreakersConfig {
            default: defaults,
            overrides: HashMap::new(),
        })
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn with_breaker<R>(&self, name: &str, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut table = self.table();
        let breaker = table
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, self.config.for_name(name).clone()));
        f(breaker)
    }

    pub fn call_timeout(&self, name: &str) -> Duration {
        Duration::from_millis(self.config.for_name(name).call_timeout_ms)
    }

    /// Admit or short-circuit one call on `name`.
    pub fn acquire(&self, name: &str) -> Result<()> {
        let now = Instant::now();
        self.with_breaker(name, |b| b.try_acquire(now))
            .map_err(|retry_in_ms| GateError::BreakerOpen {
                name: name.to_string(),
                retry_in_ms,
            })
    }

    pub fn record_success(&self, name: &str) {
        let now = Instant::now();
        self.with_breaker(name, |b| b.on_success(now));
    }

    pub fn record_failure(&self, name: &str, reason: &str) {
        let now = Instant::now();
        self.with_breaker(name, |b| b.on_failure(now, reason));
    }

    /// Run `f` behind breaker `name` with the breaker's configured timeout.
    pub async fn call<T, F, Fut>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.call_timeout(name);
        self.call_with_timeout(name, timeout, f).await
    }

    /// Run `f` behind breaker `name`. Errors and timeouts both count as
    /// failures; an open breaker returns [`GateError::BreakerOpen`] without
    /// invoking `f`.
    pub async fn call_with_timeout<T, F, Fut>(
        &self,
        name: &str,
        timeout: Duration,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire(name)?;
        let mut guard = PendingCall {
            registry: self,
            name,
            settled: false,
        };

        let outcome = tokio::time::timeout(timeout, f()).await;
        guard.settled = true;

        match outcome {
            Ok(Ok(value)) => {
                self.record_success(name);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure(name, &err.to_string());
                Err(err)
            }
            Err(_) => {
                let err = GateError::Timeout {
                    operation: name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                self.record_failure(name, &err.to_string());
                Err(err)
            }
        }
    }

    pub fn health(&self, name: &str) -> Option<BreakerHealth> {
        let now = Instant::now();
        self.table().get(name).map(|b| b.health(now))
    }

    /// Health of every known breaker, sorted by name.
    pub fn health_all(&self) -> Vec<BreakerHealth> {
        let now = Instant::now();
        let mut all: Vec<BreakerHealth> = self.table().values().map(|b| b.health(now)).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Returns false when no breaker with that name exists.
    pub fn reset(&self, name: &str) -> bool {
        match self.table().get_mut(name) {
            Some(b) => {
                b.reset();
                info!(breaker = %name, "circuit breaker manually reset");
                true
            }
            None => false,
        }
    }

    /// Reset every breaker under a single lock acquisition.
    pub fn reset_all(&self) -> usize {
        let mut table = self.table();
        for b in table.values_mut() {
            b.reset();
        }
        info!(count = table.len(), "all circuit breakers manually reset");
        table.len()
    }
}

/// Counts a guarded call as failed if its future is dropped before it
/// settles, so a cancelled half-open probe cannot wedge the breaker.
struct PendingCall<'a> {
    registry: &'a BreakerRegistry,
    name: &'a str,
    settled: bool,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry
                .record_failure(self.name, "call abandoned before completion");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
