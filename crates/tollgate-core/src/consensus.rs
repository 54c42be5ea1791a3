//! Quorum voting over a fixed panel of named participants.
//!
//! Abstentions are excluded from the denominator. A reject share above the
//! veto threshold vetoes the result regardless of how many approvals there
//! are; otherwise the approve share must reach the approval threshold.

use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::collab::{Judgment, JudgmentRequest};
use crate::config::ConsensusConfig;
use crate::error::{GateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    Approve,
    Reject,
    Abstain,
}

impl VoteDecision {
    fn label(self) -> &'static str {
        match self {
            VoteDecision::Approve => "APPROVE",
            VoteDecision::Reject => "REJECT",
            VoteDecision::Abstain => "ABSTAIN",
        }
    }
}

/// What a participant returns from one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub decision: VoteDecision,
    pub reason: String,
}

impl Ballot {
    pub fn approve(reason: impl Into<String>) -> Self {
        Self {
            decision: VoteDecision::Approve,
            reason: reason.into(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            decision: VoteDecision::Reject,
            reason: reason.into(),
        }
    }

    pub fn abstain(reason: impl Into<String>) -> Self {
        Self {
            decision: VoteDecision::Abstain,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub participant_id: String,
    pub decision: VoteDecision,
    pub reason: String,
}

/// The one capability a panel member needs.
pub trait Voter: Send + Sync {
    fn vote<'a>(
        &'a self,
        question: &'a str,
        context: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<Ballot>>;
}

/// Stand-in for participants without a voting capability.
pub struct NoVote;

impl Voter for NoVote {
    fn vote<'a>(
        &'a self,
        _question: &'a str,
        _context: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<Ballot>> {
        Box::pin(async { Ok(Ballot::abstain("no voting method available")) })
    }
}

/// Rejects when the question mentions any deny keyword, approves otherwise.
pub struct KeywordVoter {
    deny: Vec<String>,
}

impl KeywordVoter {
    pub fn new<I, S>(deny: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deny: deny.into_iter().map(|s| s.into().to_lowercase()).collect(),
        }
    }
}

impl Voter for KeywordVoter {
    fn vote<'a>(
        &'a self,
        question: &'a str,
        _context: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<Ballot>> {
        Box::pin(async move {
            let lowered = question.to_lowercase();
            Ok(match self.deny.iter().find(|k| lowered.contains(k.as_str())) {
                Some(k) => Ballot::reject(format!("matched '{k}'")),
                None => Ballot::approve("no deny keyword matched"),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// ConsensusResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Vetoed,
    /// Deciding votes existed but approval fell short without a veto.
    NotApproved,
    NoConsensus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub question: String,
    pub votes: Vec<Vote>,
    pub approve_count: usize,
    pub reject_count: usize,
    pub abstain_count: usize,
    pub deciding_votes: usize,
    pub approval_ratio: f64,
    pub reject_ratio: f64,
    pub vetoed: bool,
    pub approved: bool,
    pub approval_threshold: f64,
    pub veto_threshold: f64,
}

impl ConsensusResult {
    /// Aggregate `votes` under the given thresholds.
    pub fn tally(
        question: impl Into<String>,
        votes: Vec<Vote>,
        approval_threshold: f64,
        veto_threshold: f64,
    ) -> Self {
        let count = |d: VoteDecision| votes.iter().filter(|v| v.decision == d).count();
        let approve_count = count(VoteDecision::Approve);
        let reject_count = count(VoteDecision::Reject);
        let abstain_count = count(VoteDecision::Abstain);
        let deciding_votes = approve_count + reject_count;

        let (approval_ratio, reject_ratio) = if deciding_votes > 0 {
            (
                approve_count as f64 / deciding_votes as f64,
                reject_count as f64 / deciding_votes as f64,
            )
        } else {
            (0.0, 0.0)
        };
        let vetoed = deciding_votes > 0 && reject_ratio > veto_threshold;
        let approved = !vetoed && deciding_votes > 0 && approval_ratio >= approval_threshold;

        Self {
            question: question.into(),
            votes,
            approve_count,
            reject_count,
            abstain_count,
            deciding_votes,
            approval_ratio,
            reject_ratio,
            vetoed,
            approved,
            approval_threshold,
            veto_threshold,
        }
    }

    pub fn verdict(&self) -> Verdict {
        if self.deciding_votes == 0 {
            Verdict::NoConsensus
        } else if self.vetoed {
            Verdict::Vetoed
        } else if self.approved {
            Verdict::Approved
        } else {
            Verdict::NotApproved
        }
    }

    /// Fixed-width ballot sheet in panel order, for audit display.
    pub fn ballot(&self) -> String {
        let verdict = match self.verdict() {
            Verdict::Approved => "APPROVED",
            Verdict::Vetoed => "VETOED",
            Verdict::NotApproved => "NOT APPROVED",
            Verdict::NoConsensus => "NO CONSENSUS",
        };
        let mut out = String::new();
        let _ = writeln!(
            out,
            "approve {:>3} | reject {:>3} | abstain {:>3} | ratio {:.3} | {}",
            self.approve_count, self.reject_count, self.abstain_count, self.approval_ratio, verdict
        );
        for v in &self.votes {
            let reason: String = v.reason.chars().take(48).collect();
            let _ = writeln!(out, "  {:<14} {:<8} {}", v.participant_id, v.decision.label(), reason);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ConsensusEngine
// ---------------------------------------------------------------------------

struct Participant {
    id: String,
    voter: Arc<dyn Voter>,
    can_vote: bool,
}

pub struct ConsensusEngine {
    participants: Vec<Participant>,
    approval_threshold: f64,
    veto_threshold: f64,
    vote_timeout: Duration,
}

impl ConsensusEngine {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            participants: Vec::new(),
            approval_threshold: config.approval_threshold,
            veto_threshold: config.veto_threshold,
            vote_timeout: Duration::from_millis(config.vote_timeout_ms),
        }
    }

    pub fn with_participant(mut self, id: impl Into<String>, voter: Arc<dyn Voter>) -> Self {
        self.participants.push(Participant {
            id: id.into(),
            voter,
            can_vote: true,
        });
        self
    }

    /// Panel member without a voting capability; always abstains.
    pub fn with_abstainer(mut self, id: impl Into<String>) -> Self {
        self.participants.push(Participant {
            id: id.into(),
            voter: Arc::new(NoVote),
            can_vote: false,
        });
        self
    }

    pub fn participant_ids(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.id.as_str()).collect()
    }

    /// Poll every participant concurrently. Errors and timeouts become
    /// abstentions; the second value counts them.
    async fn poll(&self, question: &str, context: &serde_json::Value) -> (Vec<Vote>, usize) {
        let polls = self.participants.iter().map(|p| async move {
            let outcome = tokio::time::timeout(self.vote_timeout, p.voter.vote(question, context)).await;
            let (ballot, failed) = match outcome {
                Ok(Ok(ballot)) => (ballot, false),
                Ok(Err(e)) => (Ballot::abstain(e.to_string()), true),
                Err(_) => (
                    Ballot::abstain(format!(
                        "vote timed out after {}ms",
                        self.vote_timeout.as_millis()
                    )),
                    true,
                ),
            };
            (
                Vote {
                    participant_id: p.id.clone(),
                    decision: ballot.decision,
                    reason: ballot.reason,
                },
                failed,
            )
        });

        let results = join_all(polls).await;
        let failures = results.iter().filter(|(_, failed)| *failed).count();
        (results.into_iter().map(|(v, _)| v).collect(), failures)
    }

    /// Run one vote. Never fails.
    pub async fn vote(&self, question: &str, context: &serde_json::Value) -> ConsensusResult {
        let (votes, _) = self.poll(question, context).await;
        ConsensusResult::tally(question, votes, self.approval_threshold, self.veto_threshold)
    }
}

impl Judgment for ConsensusEngine {
    /// Unlike [`ConsensusEngine::vote`], reports a downstream failure when
    /// every voting-capable participant errored, so breakers can trip.
    fn judge<'a>(&'a self, request: &'a JudgmentRequest) -> BoxFuture<'a, Result<ConsensusResult>> {
        Box::pin(async move {
            let (votes, failures) = self.poll(&request.question, &request.context).await;
            let voting = self.participants.iter().filter(|p| p.can_vote).count();
            if voting > 0 && failures >= voting {
                return Err(GateError::Downstream(format!(
                    "all {voting} voting participants failed"
                )));
            }
            let result = ConsensusResult::tally(
                request.question.clone(),
                votes,
                self.approval_threshold,
                self.veto_threshold,
            );
            debug!(
                decision = %request.decision_id,
                approve = result.approve_count,
                reject = result.reject_count,
                verdict = ?result.verdict(),
                "consensus reached"
            );
            Ok(result)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
