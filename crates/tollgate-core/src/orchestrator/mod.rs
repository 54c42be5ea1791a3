//! Admission orchestrator.
//!
//! One admission cycle walks
//! `RECEIVED → ROUTE → RISK_CLASSIFY → INTERVENTION_DECIDE → ALLOW | BLOCK`,
//! then, for allowed calls, `EXECUTE → POST_ANALYSIS → SEALED` once the
//! dispatcher reports back. Each transition appends one trace step.
//!
//! Calls into the judgment collaborator and into outcome sinks go through
//! the shared [`BreakerRegistry`]. Post-analysis runs on its own task and
//! never affects the response already computed.

pub mod intervention;
pub mod risk;
pub mod routing;

pub use intervention::{decide, quantize_trust};
pub use risk::{RiskAssessment, RiskClassifier};
pub use routing::{Matcher, RouteRule, Router};

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::breaker::{breaker_name, BreakerRegistry};
use crate::collab::{Judgment, JudgmentRequest, OutcomeRecord, OutcomeSink};
use crate::config::{FallbackPolicy, OrchestratorConfig};
use crate::consensus::Verdict;
use crate::decision::{
    DecisionEvent, ExecutionReport, Intervention, JudgmentRecord, Outcome, SealedDecision, Stage,
};
use crate::error::{GateError, Result};
use crate::protocol::JsonRpcNotification;
use crate::tracer::DecisionTracer;
use crate::trust::{TrustStore, TrustUpdate};

pub const JUDGMENT_BREAKER: &str = "orchestrator:judgment";
pub const DECISION_NOTIFICATION: &str = "notifications/decision";

/// One call presented for admission.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    /// Tool name for `tools/call`.
    pub event_type: String,
    pub caller: String,
    /// Text that routing and risk classification inspect.
    pub content: String,
    pub arguments: serde_json::Value,
    pub require_judgment: bool,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    router: Router,
    risk: RiskClassifier,
    breakers: Arc<BreakerRegistry>,
    tracer: Arc<DecisionTracer>,
    trust: Arc<dyn TrustStore>,
    judgment: Option<Arc<dyn Judgment>>,
    sinks: Vec<Arc<dyn OutcomeSink>>,
    notifications: Option<broadcast::Sender<JsonRpcNotification>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        breakers: Arc<BreakerRegistry>,
        tracer: Arc<DecisionTracer>,
        trust: Arc<dyn TrustStore>,
    ) -> Self {
        Self {
            config,
            router: Router::default(),
            risk: RiskClassifier::default(),
            breakers,
            tracer,
            trust,
            judgment: None,
            sinks: Vec::new(),
            notifications: None,
        }
    }

    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub fn with_risk(mut self, risk: RiskClassifier) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_judgment(mut self, judgment: Arc<dyn Judgment>) -> Self {
        self.judgment = Some(judgment);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Publish every sealed decision as a `notifications/decision` message.
    pub fn with_notifications(mut self, tx: broadcast::Sender<JsonRpcNotification>) -> Self {
        self.notifications = Some(tx);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn tracer(&self) -> &Arc<DecisionTracer> {
        &self.tracer
    }

    // -----------------------------------------------------------------------
    // Pre-execution decision
    // -----------------------------------------------------------------------

    /// Decide whether the call may run. On allow, returns the open event to
    /// hand back to [`Orchestrator::post_analysis`]; on block, the sealed
    /// decision is already recorded and the error carries the reason.
    pub async fn pre_decision(&self, id: &str, req: &AdmissionRequest) -> Result<DecisionEvent> {
        let excerpt: String = req.content.chars().take(self.config.excerpt_chars).collect();
        let mut event = DecisionEvent::new(id, &req.event_type, &req.caller, excerpt);

        event.routing = self.router.route(&req.event_type, &req.content);
        event.step(
            Stage::Route,
            match &event.routing.suggested_handler {
                Some(h) => format!("domain={} handler={h}", event.routing.domain),
                None => format!("domain={}", event.routing.domain),
            },
        );

        let assessment = self.risk.classify(&req.content);
        event.risk = assessment.level;
        event.step(
            Stage::RiskClassify,
            match &assessment.matched {
                Some(hit) => format!("{} (matched '{hit}')", assessment.level),
                None => format!("{} (no risk markers)", assessment.level),
            },
        );

        let score = self.lookup_trust(&req.caller).await;
        event.trust = quantize_trust(score, &self.config.trust_breakpoints);
        event.intervention = decide(event.risk, event.trust);
        event.step(
            Stage::InterventionDecide,
            format!(
                "risk={} trust={} ({score:.2}) -> {}",
                event.risk, event.trust, event.intervention
            ),
        );

        if event.intervention == Intervention::Block {
            let reason = format!(
                "{} risk {} call is not permitted for {} caller '{}'",
                event.risk, event.event_type, event.trust, event.caller
            );
            return Err(self.block(event, reason));
        }

        let wants_judgment = req.require_judgment
            || event.risk >= self.config.judge_risk_at_or_above
            || event.intervention == Intervention::Ask;
        if wants_judgment {
            if let Some(reason) = self.run_judgment(&mut event, req).await {
                return Err(self.block(event, reason));
            }
        }

        event.outcome = Some(Outcome::Allow);
        event.step(Stage::Allow, format!("intervention={}", event.intervention));
        debug!(decision = %event.id, domain = %event.routing.domain, risk = %event.risk, "call admitted");
        Ok(event)
    }

    /// Reads go to the blocking pool, as post-analysis writes do.
    async fn lookup_trust(&self, caller: &str) -> f64 {
        let store = Arc::clone(&self.trust);
        let owned = caller.to_string();
        match tokio::task::spawn_blocking(move || store.score(&owned)).await {
            Ok(Ok(score)) => score,
            Ok(Err(e)) => {
                warn!(caller, error = %e, "trust lookup failed, using default");
                self.config.default_trust
            }
            Err(e) => {
                warn!(caller, error = %e, "trust lookup task failed, using default");
                self.config.default_trust
            }
        }
    }

    /// Returns a block reason when judgment (or its fallback) refuses the call.
    async fn run_judgment(&self, event: &mut DecisionEvent, req: &AdmissionRequest) -> Option<String> {
        let request = JudgmentRequest {
            decision_id: event.id.clone(),
            question: format!(
                "Allow {} for '{}': {}",
                event.event_type, event.caller, event.excerpt
            ),
            context: json!({
                "event_type": event.event_type,
                "caller": event.caller,
                "domain": event.routing.domain,
                "risk": event.risk,
                "trust": event.trust,
                "arguments": req.arguments,
            }),
            risk: event.risk,
        };

        event.consulted(JUDGMENT_BREAKER);
        let outcome = match &self.judgment {
            Some(judgment) => {
                self.breakers
                    .call(JUDGMENT_BREAKER, || judgment.judge(&request))
                    .await
            }
            None => Err(GateError::Downstream(
                "no judgment collaborator configured".to_string(),
            )),
        };

        match outcome {
            Ok(result) => {
                let verdict = result.verdict();
                event.step(
                    Stage::Judgment,
                    format!(
                        "{verdict:?}: approve={} reject={} abstain={}",
                        result.approve_count, result.reject_count, result.abstain_count
                    ),
                );
                let reason = (verdict == Verdict::Vetoed).then(|| {
                    format!(
                        "vetoed by consensus ({} of {} deciding votes rejected)",
                        result.reject_count, result.deciding_votes
                    )
                });
                event.judgment = Some(JudgmentRecord::Completed { result });
                reason
            }
            Err(e) => {
                let policy = self.config.judgment_fallback.for_risk(event.risk);
                let label = match policy {
                    FallbackPolicy::Permissive => "permissive",
                    FallbackPolicy::Restrictive => "restrictive",
                };
                warn!(decision = %event.id, risk = %event.risk, fallback = label, error = %e, "judgment unavailable");
                event.step(Stage::Judgment, format!("unavailable ({e}); fallback={label}"));
                event.judgment = Some(JudgmentRecord::Unavailable {
                    error: e.to_string(),
                    fallback: label.to_string(),
                });
                (policy == FallbackPolicy::Restrictive)
                    .then(|| format!("judgment unavailable for {} risk call: {e}", event.risk))
            }
        }
    }

    fn block(&self, mut event: DecisionEvent, reason: String) -> GateError {
        event.outcome = Some(Outcome::Block);
        event.reason = Some(reason.clone());
        event.step(Stage::Block, reason.clone());
        info!(decision = %event.id, caller = %event.caller, risk = %event.risk, "call blocked");

        let record = self.outcome_record(&event, false, 0);
        self.publish(event);

        let sinks = self.sinks.clone();
        let breakers = Arc::clone(&self.breakers);
        let trust = Arc::clone(&self.trust);
        tokio::spawn(async move {
            report_outcome(&breakers, &sinks, &trust, &record, TrustUpdate::Blocked).await;
        });

        GateError::PermissionDenied(reason)
    }

    // -----------------------------------------------------------------------
    // Post-analysis
    // -----------------------------------------------------------------------

    /// Record the execution outcome on a separate task. The returned handle
    /// resolves to the sealed decision; callers may drop it.
    pub fn post_analysis(
        self: &Arc<Self>,
        event: DecisionEvent,
        report: ExecutionReport,
    ) -> JoinHandle<SealedDecision> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.finish(event, report).await })
    }

    async fn finish(&self, mut event: DecisionEvent, report: ExecutionReport) -> SealedDecision {
        event.step(
            Stage::Execute,
            match &report.error {
                None => format!("completed in {}ms", report.duration_ms),
                Some(err) => format!("failed after {}ms: {err}", report.duration_ms),
            },
        );
        if report.truncated {
            event.outcome = Some(Outcome::Modified);
        }

        for sink in &self.sinks {
            event.consulted(&breaker_name("orchestrator", sink.name()));
        }
        let update = if report.success {
            TrustUpdate::Success
        } else {
            TrustUpdate::Failure
        };
        let record = self.outcome_record(&event, report.success, report.duration_ms);
        let notes = report_outcome(&self.breakers, &self.sinks, &self.trust, &record, update).await;
        event.step(Stage::PostAnalysis, notes.join("; "));

        event.execution = Some(report);
        self.publish(event)
    }

    fn outcome_record(&self, event: &DecisionEvent, success: bool, duration_ms: u64) -> OutcomeRecord {
        OutcomeRecord {
            decision_id: event.id.clone(),
            caller: event.caller.clone(),
            domain: event.routing.domain.clone(),
            risk: event.risk,
            outcome: event.outcome.unwrap_or(Outcome::Allow),
            success,
            duration_ms,
        }
    }

    fn publish(&self, event: DecisionEvent) -> SealedDecision {
        let sealed = event.seal();
        self.tracer.record(sealed.clone());
        if let Some(tx) = &self.notifications {
            match serde_json::to_value(&sealed) {
                Ok(params) => {
                    if tx.send(JsonRpcNotification::new(DECISION_NOTIFICATION, params)).is_err() {
                        debug!(decision = %sealed.id, "no notification subscribers");
                    }
                }
                Err(e) => warn!(decision = %sealed.id, error = %e, "failed to encode decision notification"),
            }
        }
        sealed
    }
}

/// Feed every sink through its breaker and nudge caller trust. Failures are
/// logged and summarized, never returned.
async fn report_outcome(
    breakers: &BreakerRegistry,
    sinks: &[Arc<dyn OutcomeSink>],
    trust: &Arc<dyn TrustStore>,
    record: &OutcomeRecord,
    update: TrustUpdate,
) -> Vec<String> {
    let mut notes = Vec::with_capacity(sinks.len() + 1);
    for sink in sinks {
        let name = breaker_name("orchestrator", sink.name());
        match breakers.call(&name, || sink.record(record)).await {
            Ok(()) => notes.push(format!("{} ok", sink.name())),
            Err(e) => {
                warn!(decision = %record.decision_id, breaker = %name, error = %e, "outcome sink failed");
                notes.push(format!("{} failed: {e}", sink.name()));
            }
        }
    }

    let store = Arc::clone(trust);
    let caller = record.caller.clone();
    match tokio::task::spawn_blocking(move || store.record(&caller, update)).await {
        Ok(Ok(score)) => notes.push(format!("trust={score:.2}")),
        Ok(Err(e)) => {
            warn!(caller = %record.caller, error = %e, "trust update failed");
            notes.push(format!("trust update failed: {e}"));
        }
        Err(e) => warn!(caller = %record.caller, error = %e, "trust update task failed"),
    }
    notes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use crate::config::{BreakerConfig, ConsensusConfig, FailureCounting};
    use crate::consensus::{ConsensusEngine, KeywordVoter};
    use crate::decision::{RiskLevel, TrustLevel};
    use crate::trust::MemoryTrustStore;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        trust: Arc<MemoryTrustStore>,
        breakers: Arc<BreakerRegistry>,
        tracer: Arc<DecisionTracer>,
    }

    fn harness(build: impl FnOnce(Orchestrator) -> Orchestrator) -> Harness {
        let trust = Arc::new(MemoryTrustStore::new(0.5));
        let breakers = Arc::new(BreakerRegistry::with_defaults(BreakerConfig {
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
            call_timeout_ms: 500,
            counting: FailureCounting::Consecutive,
        }));
        let tracer = Arc::new(DecisionTracer::new(50));
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::clone(&breakers),
            Arc::clone(&tracer),
            trust.clone(),
        );
        Harness {
            orchestrator: Arc::new(build(orchestrator)),
            trust,
            breakers,
            tracer,
        }
    }

    fn request(tool: &str, content: &str) -> AdmissionRequest {
        AdmissionRequest {
            event_type: tool.to_string(),
            caller: "alice".to_string(),
            content: content.to_string(),
            arguments: json!({ "command": content }),
            require_judgment: false,
        }
    }

    fn panel(deny: &[&str]) -> Arc<ConsensusEngine> {
        Arc::new(
            ConsensusEngine::new(&ConsensusConfig::default())
                .with_participant("guardian", Arc::new(KeywordVoter::new(deny.to_vec())))
                .with_participant("auditor", Arc::new(KeywordVoter::new(deny.to_vec())))
                .with_abstainer("scout"),
        )
    }

    struct BrokenJudgment;

    impl Judgment for BrokenJudgment {
        fn judge<'a>(
            &'a self,
            _request: &'a JudgmentRequest,
        ) -> BoxFuture<'a, Result<crate::consensus::ConsensusResult>> {
            Box::pin(async { Err(GateError::Downstream("judges offline".into())) })
        }
    }

    struct CountingSink {
        calls: AtomicUsize,
        fail: bool,
    }

    impl OutcomeSink for CountingSink {
        fn name(&self) -> &str {
            "learning"
        }

        fn record<'a>(&'a self, _outcome: &'a OutcomeRecord) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    Err(GateError::Downstream("store unavailable".into()))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn stages(event: &DecisionEvent) -> Vec<Stage> {
        event.trace.iter().map(|s| s.stage).collect()
    }

    #[tokio::test]
    async fn low_risk_call_is_admitted_with_full_trace() {
        let h = harness(|o| o);
        let event = h
            .orchestrator
            .pre_decision("d1", &request("echo", "hello world"))
            .await
            .unwrap();
        assert_eq!(event.outcome, Some(Outcome::Allow));
        assert_eq!(event.risk, RiskLevel::Low);
        assert_eq!(event.trust, TrustLevel::Neutral);
        assert_eq!(event.intervention, Intervention::Silent);
        assert_eq!(
            stages(&event),
            vec![
                Stage::Received,
                Stage::Route,
                Stage::RiskClassify,
                Stage::InterventionDecide,
                Stage::Allow
            ]
        );
        assert!(h.tracer.is_empty());
    }

    #[tokio::test]
    async fn matrix_block_is_recorded_with_reason() {
        let h = harness(|o| o);
        h.trust.set("alice", 0.1);
        let err = h
            .orchestrator
            .pre_decision("d2", &request("bash", "rm -rf / now"))
            .await
            .unwrap_err();
        let GateError::PermissionDenied(reason) = err else {
            panic!("expected PermissionDenied");
        };
        assert!(reason.contains("critical"));

        let sealed = h.tracer.get("d2").unwrap();
        assert_eq!(sealed.outcome, Some(Outcome::Block));
        assert_eq!(sealed.reason.as_deref(), Some(reason.as_str()));
        assert_eq!(sealed.trace.last().unwrap().stage, Stage::Sealed);
        assert!(sealed.judgment.is_none());
    }

    #[tokio::test]
    async fn approving_panel_admits_high_risk_call() {
        let h = harness(|o| o.with_judgment(panel(&["drop database"])));
        let event = h
            .orchestrator
            .pre_decision("d3", &request("bash", "sudo systemctl restart nginx"))
            .await
            .unwrap();
        assert_eq!(event.risk, RiskLevel::High);
        assert!(matches!(event.judgment, Some(JudgmentRecord::Completed { .. })));
        assert!(stages(&event).contains(&Stage::Judgment));
        assert_eq!(event.breakers, vec![JUDGMENT_BREAKER.to_string()]);
    }

    #[tokio::test]
    async fn veto_blocks_the_call() {
        let h = harness(|o| o.with_judgment(panel(&["nginx"])));
        let err = h
            .orchestrator
            .pre_decision("d4", &request("bash", "sudo systemctl restart nginx"))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("[BLOCKED] vetoed by consensus"));
        assert!(h.tracer.get("d4").unwrap().is_blocked());
    }

    #[tokio::test]
    async fn explicit_flag_requests_judgment_for_low_risk() {
        let h = harness(|o| o.with_judgment(panel(&["hello"])));
        let mut req = request("echo", "hello");
        req.require_judgment = true;
        assert!(h.orchestrator.pre_decision("d5", &req).await.is_err());
    }

    #[tokio::test]
    async fn unavailable_judgment_uses_fallback_by_risk() {
        let h = harness(|o| o.with_judgment(Arc::new(BrokenJudgment)));

        // high risk: permissive by default
        let event = h
            .orchestrator
            .pre_decision("d6", &request("bash", "git reset --hard HEAD~3"))
            .await
            .unwrap();
        assert!(matches!(
            event.judgment,
            Some(JudgmentRecord::Unavailable { ref fallback, .. }) if fallback == "permissive"
        ));

        // critical risk from a trusted caller reaches judgment, then fails closed
        h.trust.set("alice", 0.9);
        let err = h
            .orchestrator
            .pre_decision("d7", &request("bash", "mkfs.ext4 /dev/sdb1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("judgment unavailable"));
    }

    #[tokio::test]
    async fn repeated_judgment_failures_open_the_breaker() {
        let h = harness(|o| o.with_judgment(Arc::new(BrokenJudgment)));
        for i in 0..3 {
            let _ = h
                .orchestrator
                .pre_decision(&format!("b{i}"), &request("bash", "git reset --hard"))
                .await;
        }
        let health = h.breakers.health(JUDGMENT_BREAKER).unwrap();
        assert_eq!(health.state, BreakerState::Open);
        assert_eq!(health.short_circuits, 1);
    }

    #[tokio::test]
    async fn post_analysis_seals_updates_trust_and_notifies() {
        let (tx, mut rx) = broadcast::channel(8);
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let h = harness(|o| o.with_notifications(tx).with_sink(sink.clone()));

        let event = h
            .orchestrator
            .pre_decision("d8", &request("echo", "hi"))
            .await
            .unwrap();
        let report = ExecutionReport {
            success: true,
            duration_ms: 12,
            truncated: true,
            error: None,
        };
        let sealed = h.orchestrator.post_analysis(event, report).await.unwrap();

        assert_eq!(sealed.outcome, Some(Outcome::Modified));
        assert!(stages(&sealed).ends_with(&[Stage::Execute, Stage::PostAnalysis, Stage::Sealed]));
        assert!(sealed.breakers.contains(&"orchestrator:learning".to_string()));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert!((h.trust.score("alice").unwrap() - 0.51).abs() < 1e-9);
        assert_eq!(h.tracer.len(), 1);

        let note = rx.recv().await.unwrap();
        assert_eq!(note.method, DECISION_NOTIFICATION);
        assert_eq!(note.params["id"], "d8");
    }

    #[tokio::test]
    async fn failing_sink_never_escapes_post_analysis() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let h = harness(|o| o.with_sink(sink));
        let event = h
            .orchestrator
            .pre_decision("d9", &request("echo", "hi"))
            .await
            .unwrap();
        let report = ExecutionReport {
            success: false,
            duration_ms: 3,
            truncated: false,
            error: Some("exit 1".into()),
        };
        let sealed = h.orchestrator.post_analysis(event, report).await.unwrap();
        assert_eq!(sealed.outcome, Some(Outcome::Allow));
        let post = sealed
            .trace
            .iter()
            .find(|s| s.stage == Stage::PostAnalysis)
            .unwrap();
        assert!(post.detail.contains("learning failed"));
        assert!((h.trust.score("alice").unwrap() - 0.48).abs() < 1e-9);
    }

    /// Remembers which thread served the last score lookup.
    struct ThreadRecordingStore {
        inner: MemoryTrustStore,
        reader: std::sync::Mutex<Option<std::thread::ThreadId>>,
    }

    impl TrustStore for ThreadRecordingStore {
        fn score(&self, caller: &str) -> Result<f64> {
            *self.reader.lock().unwrap() = Some(std::thread::current().id());
            self.inner.score(caller)
        }
        fn record(&self, caller: &str, update: TrustUpdate) -> Result<f64> {
            self.inner.record(caller, update)
        }
        fn list(&self) -> Result<Vec<(String, crate::trust::TrustRecord)>> {
            self.inner.list()
        }
    }

    #[tokio::test]
    async fn trust_lookup_runs_off_the_async_thread() {
        let store = Arc::new(ThreadRecordingStore {
            inner: MemoryTrustStore::new(0.5),
            reader: std::sync::Mutex::new(None),
        });
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(BreakerRegistry::default()),
            Arc::new(DecisionTracer::new(10)),
            store.clone(),
        );
        orchestrator
            .pre_decision("t1", &request("echo", "hello"))
            .await
            .unwrap();
        let reader = store.reader.lock().unwrap().expect("score was read");
        assert_ne!(reader, std::thread::current().id());
    }

    #[tokio::test]
    async fn identical_inputs_route_and_classify_identically() {
        let h = harness(|o| o);
        let req = request("bash", "git push origin main");
        let a = h.orchestrator.pre_decision("x1", &req).await.unwrap();
        let b = h.orchestrator.pre_decision("x2", &req).await.unwrap();
        assert_eq!(a.routing, b.routing);
        assert_eq!(a.risk, b.risk);
        assert_eq!(a.intervention, b.intervention);
    }
}
