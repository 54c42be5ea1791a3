//! Seams to the external collaborators the orchestrator calls through
//! breakers: judgment before execution and outcome recorders afterwards.

use futures::future::BoxFuture;
use serde::Serialize;

use crate::consensus::ConsensusResult;
use crate::decision::{Outcome, RiskLevel};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct JudgmentRequest {
    pub decision_id: String,
    pub question: String,
    pub context: serde_json::Value,
    pub risk: RiskLevel,
}

pub trait Judgment: Send + Sync {
    fn judge<'a>(&'a self, request: &'a JudgmentRequest) -> BoxFuture<'a, Result<ConsensusResult>>;
}

/// What post-analysis reports for one executed (or blocked) call.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord {
    pub decision_id: String,
    pub caller: String,
    pub domain: String,
    pub risk: RiskLevel,
    pub outcome: Outcome,
    pub success: bool,
    pub duration_ms: u64,
}

/// Best-effort recorder of call outcomes. Errors are logged and dropped.
pub trait OutcomeSink: Send + Sync {
    /// Also names the breaker guarding this sink: `orchestrator:<name>`.
    fn name(&self) -> &str;

    fn record<'a>(&'a self, outcome: &'a OutcomeRecord) -> BoxFuture<'a, Result<()>>;
}
