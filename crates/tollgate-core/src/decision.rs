//! Decision records produced by one admission cycle.
//!
//! A [`DecisionEvent`] is mutable only while the orchestrator owns it.
//! [`DecisionEvent::seal`] turns it into a [`SealedDecision`], a shared,
//! read-only snapshot that the tracer stores and the audit surface serves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::consensus::ConsensusResult;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 1,
            RiskLevel::High => 2,
            RiskLevel::Critical => 3,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quantized caller trust, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Untrusted,
    Guarded,
    Neutral,
    Trusted,
    Elevated,
}

impl TrustLevel {
    pub const ALL: [TrustLevel; 5] = [
        TrustLevel::Untrusted,
        TrustLevel::Guarded,
        TrustLevel::Neutral,
        TrustLevel::Trusted,
        TrustLevel::Elevated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrustLevel::Untrusted => "untrusted",
            TrustLevel::Guarded => "guarded",
            TrustLevel::Neutral => "neutral",
            TrustLevel::Trusted => "trusted",
            TrustLevel::Elevated => "elevated",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intervention {
    Silent,
    Notify,
    Ask,
    Block,
}

impl Intervention {
    pub fn as_str(self) -> &'static str {
        match self {
            Intervention::Silent => "silent",
            Intervention::Notify => "notify",
            Intervention::Ask => "ask",
            Intervention::Block => "block",
        }
    }
}

impl fmt::Display for Intervention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    Block,
    /// Allowed and executed, but the response was altered (truncated).
    Modified,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::Block => "block",
            Outcome::Modified => "modified",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission state machine stages, in the order they are traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Route,
    RiskClassify,
    InterventionDecide,
    Judgment,
    Allow,
    Block,
    Execute,
    PostAnalysis,
    Sealed,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routing {
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_handler: Option<String>,
}

impl Routing {
    pub fn general() -> Self {
        Self {
            domain: "general".to_string(),
            suggested_handler: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub stage: Stage,
    pub at: DateTime<Utc>,
    pub detail: String,
}

/// How the judgment step ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JudgmentRecord {
    Completed { result: ConsensusResult },
    Unavailable { error: String, fallback: String },
}

/// Execution facts reported back to the orchestrator after the tool ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub duration_ms: u64,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub id: String,
    pub event_type: String,
    pub caller: String,
    pub excerpt: String,
    pub routing: Routing,
    pub risk: RiskLevel,
    pub trust: TrustLevel,
    pub intervention: Intervention,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judgment: Option<JudgmentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
    /// Breakers consulted during this cycle, by name.
    pub breakers: Vec<String>,
    pub trace: Vec<TraceStep>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DecisionEvent {
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        caller: impl Into<String>,
        excerpt: impl Into<String>,
    ) -> Self {
        let mut event = Self {
            id: id.into(),
            event_type: event_type.into(),
            caller: caller.into(),
            excerpt: excerpt.into(),
            routing: Routing::general(),
            risk: RiskLevel::Low,
            trust: TrustLevel::Neutral,
            intervention: Intervention::Silent,
            outcome: None,
            reason: None,
            judgment: None,
            execution: None,
            breakers: Vec::new(),
            trace: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        };
        event.step(Stage::Received, "admission cycle started");
        event
    }

    /// Append one timestamped trace step.
    pub fn step(&mut self, stage: Stage, detail: impl Into<String>) {
        self.trace.push(TraceStep {
            stage,
            at: Utc::now(),
            detail: detail.into(),
        });
    }

    pub fn consulted(&mut self, breaker: &str) {
        if !self.breakers.iter().any(|b| b == breaker) {
            self.breakers.push(breaker.to_string());
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.outcome == Some(Outcome::Block)
    }

    /// Close the cycle. No further steps can be appended afterwards.
    pub fn seal(mut self) -> SealedDecision {
        self.step(Stage::Sealed, "decision sealed");
        self.completed_at = Some(Utc::now());
        SealedDecision(Arc::new(self))
    }
}

/// Immutable, cheaply clonable snapshot of a completed decision.
#[derive(Debug, Clone)]
pub struct SealedDecision(Arc<DecisionEvent>);

impl SealedDecision {
    pub fn duration_ms(&self) -> Option<i64> {
        self.0
            .completed_at
            .map(|done| (done - self.0.started_at).num_milliseconds())
    }
}

impl Deref for SealedDecision {
    type Target = DecisionEvent;

    fn deref(&self) -> &DecisionEvent {
        &self.0
    }
}

impl Serialize for SealedDecision {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_starts_with_received_step() {
        let event = DecisionEvent::new("d1", "bash", "key:abc", "ls -la");
        assert_eq!(event.trace.len(), 1);
        assert_eq!(event.trace[0].stage, Stage::Received);
        assert!(event.outcome.is_none());
    }

    #[test]
    fn seal_appends_final_step_and_completes() {
        let mut event = DecisionEvent::new("d1", "bash", "key:abc", "ls");
        event.step(Stage::Route, "domain=system");
        event.outcome = Some(Outcome::Allow);
        let sealed = event.seal();
        assert_eq!(sealed.trace.last().unwrap().stage, Stage::Sealed);
        assert!(sealed.completed_at.is_some());
        assert!(sealed.duration_ms().unwrap() >= 0);
    }

    #[test]
    fn consulted_breakers_are_deduplicated() {
        let mut event = DecisionEvent::new("d1", "bash", "c", "x");
        event.consulted("orchestrator:judgment");
        event.consulted("orchestrator:judgment");
        assert_eq!(event.breakers, vec!["orchestrator:judgment".to_string()]);
    }

    #[test]
    fn sealed_decision_serializes_snake_case() {
        let mut event = DecisionEvent::new("d1", "bash", "c", "x");
        event.risk = RiskLevel::Critical;
        event.intervention = Intervention::Block;
        event.outcome = Some(Outcome::Block);
        let json = serde_json::to_value(event.seal()).unwrap();
        assert_eq!(json["risk"], "critical");
        assert_eq!(json["intervention"], "block");
        assert_eq!(json["outcome"], "block");
        assert_eq!(json["trace"][0]["stage"], "received");
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert!(TrustLevel::Elevated > TrustLevel::Untrusted);
    }
}
