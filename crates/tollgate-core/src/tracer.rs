//! Bounded in-memory audit log of sealed decisions.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::decision::SealedDecision;

/// Aggregate view over the decisions currently held.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceSummary {
    pub total: usize,
    pub capacity: usize,
    pub by_outcome: BTreeMap<String, usize>,
    pub by_domain: BTreeMap<String, usize>,
    pub by_risk: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_duration_ms: Option<f64>,
}

/// Fixed-capacity ring of sealed decisions with FIFO eviction.
#[derive(Debug)]
pub struct DecisionTracer {
    capacity: usize,
    ring: RwLock<VecDeque<SealedDecision>>,
}

impl DecisionTracer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<SealedDecision>> {
        self.ring.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<SealedDecision>> {
        self.ring.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Append in arrival order, evicting the oldest entry once full.
    pub fn record(&self, decision: SealedDecision) {
        let mut ring = self.write();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(decision);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Everything held, oldest first.
    pub fn snapshot(&self) -> Vec<SealedDecision> {
        self.read().iter().cloned().collect()
    }

    /// Up to `k` decisions, newest first.
    pub fn recent(&self, k: usize) -> Vec<SealedDecision> {
        self.read().iter().rev().take(k).cloned().collect()
    }

    pub fn by_domain(&self, domain: &str, limit: usize) -> Vec<SealedDecision> {
        self.filtered(limit, |d| d.routing.domain == domain)
    }

    pub fn by_caller(&self, caller: &str, limit: usize) -> Vec<SealedDecision> {
        self.filtered(limit, |d| d.caller == caller)
    }

    fn filtered(&self, limit: usize, pred: impl Fn(&SealedDecision) -> bool) -> Vec<SealedDecision> {
        self.read()
            .iter()
            .rev()
            .filter(|d| pred(d))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<SealedDecision> {
        self.read().iter().rev().find(|d| d.id == id).cloned()
    }

    pub fn summary(&self) -> TraceSummary {
        let ring = self.read();
        let mut summary = TraceSummary {
            total: ring.len(),
            capacity: self.capacity,
            ..TraceSummary::default()
        };
        let mut durations = Vec::with_capacity(ring.len());
        for d in ring.iter() {
            let outcome = d.outcome.map(|o| o.as_str()).unwrap_or("pending");
            *summary.by_outcome.entry(outcome.to_string()).or_default() += 1;
            *summary.by_domain.entry(d.routing.domain.clone()).or_default() += 1;
            *summary.by_risk.entry(d.risk.as_str().to_string()).or_default() += 1;
            if let Some(ms) = d.duration_ms() {
                durations.push(ms as f64);
            }
        }
        if !durations.is_empty() {
            summary.mean_duration_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{DecisionEvent, Outcome, RiskLevel, Routing};

    fn sealed(id: usize, domain: &str, caller: &str, outcome: Outcome) -> SealedDecision {
        let mut event = DecisionEvent::new(format!("d{id}"), "bash", caller, "ls");
        event.routing = Routing {
            domain: domain.to_string(),
            suggested_handler: None,
        };
        event.outcome = Some(outcome);
        event.seal()
    }

    #[test]
    fn buffer_never_exceeds_capacity_and_keeps_newest() {
        let tracer = DecisionTracer::new(500);
        for i in 0..550 {
            tracer.record(sealed(i, "general", "c", Outcome::Allow));
        }
        assert_eq!(tracer.len(), 500);
        let ids: Vec<String> = tracer.snapshot().iter().map(|d| d.id.clone()).collect();
        let expected: Vec<String> = (50..550).map(|i| format!("d{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn recent_is_newest_first() {
        let tracer = DecisionTracer::new(10);
        for i in 0..5 {
            tracer.record(sealed(i, "general", "c", Outcome::Allow));
        }
        let ids: Vec<String> = tracer.recent(3).iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["d4", "d3", "d2"]);
        assert_eq!(tracer.recent(100).len(), 5);
    }

    #[test]
    fn filters_by_domain_and_caller() {
        let tracer = DecisionTracer::new(10);
        tracer.record(sealed(0, "code", "alice", Outcome::Allow));
        tracer.record(sealed(1, "system", "bob", Outcome::Block));
        tracer.record(sealed(2, "code", "bob", Outcome::Allow));

        let code: Vec<String> = tracer.by_domain("code", 10).iter().map(|d| d.id.clone()).collect();
        assert_eq!(code, vec!["d2", "d0"]);
        assert_eq!(tracer.by_caller("bob", 10).len(), 2);
        assert_eq!(tracer.by_caller("bob", 1)[0].id, "d2");
        assert!(tracer.by_domain("research", 10).is_empty());
    }

    #[test]
    fn get_returns_full_trace() {
        let tracer = DecisionTracer::new(10);
        tracer.record(sealed(7, "code", "alice", Outcome::Allow));
        let found = tracer.get("d7").unwrap();
        assert!(found.trace.len() >= 2);
        assert!(tracer.get("missing").is_none());
    }

    #[test]
    fn summary_counts_outcomes_domains_and_risk() {
        let tracer = DecisionTracer::new(10);
        tracer.record(sealed(0, "code", "a", Outcome::Allow));
        tracer.record(sealed(1, "code", "a", Outcome::Block));
        tracer.record(sealed(2, "system", "a", Outcome::Block));

        let s = tracer.summary();
        assert_eq!(s.total, 3);
        assert_eq!(s.capacity, 10);
        assert_eq!(s.by_outcome["block"], 2);
        assert_eq!(s.by_outcome["allow"], 1);
        assert_eq!(s.by_domain["code"], 2);
        assert_eq!(s.by_risk[RiskLevel::Low.as_str()], 3);
        assert!(s.mean_duration_ms.is_some());
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let tracer = DecisionTracer::new(0);
        tracer.record(sealed(0, "g", "a", Outcome::Allow));
        tracer.record(sealed(1, "g", "a", Outcome::Allow));
        assert_eq!(tracer.len(), 1);
        assert_eq!(tracer.snapshot()[0].id, "d1");
    }
}
