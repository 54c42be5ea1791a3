use std::sync::Arc;
use tollgate_core::tools::GatewayTool;
use tollgate_core::tracer::DecisionTracer;

const DEFAULT_LIMIT: usize = 20;

/// Recent decisions from the in-memory audit log, newest first.
pub struct DecisionsTool {
    tracer: Arc<DecisionTracer>,
}

impl DecisionsTool {
    pub fn new(tracer: Arc<DecisionTracer>) -> Self {
        Self { tracer }
    }
}

impl GatewayTool for DecisionsTool {
    fn name(&self) -> &str {
        "gateway_decisions"
    }

    fn description(&self) -> &str {
        "List recent admission decisions, optionally filtered by domain or caller, with a summary"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum decisions to return (default 20)"
                },
                "domain": {
                    "type": "string",
                    "description": "Only decisions routed to this domain"
                },
                "caller": {
                    "type": "string",
                    "description": "Only decisions made for this caller"
                }
            }
        })
    }

    fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        let limit = match &args["limit"] {
            serde_json::Value::Null => DEFAULT_LIMIT,
            v => v
                .as_u64()
                .filter(|n| *n > 0)
                .map(|n| n as usize)
                .ok_or_else(|| "limit must be a positive integer".to_string())?,
        };

        let decisions = match (args["domain"].as_str(), args["caller"].as_str()) {
            (Some(domain), caller) => self
                .tracer
                .by_domain(domain, usize::MAX)
                .into_iter()
                .filter(|d| caller.map_or(true, |c| d.caller == c))
                .take(limit)
                .collect(),
            (None, Some(caller)) => self.tracer.by_caller(caller, limit),
            (None, None) => self.tracer.recent(limit),
        };

        Ok(serde_json::json!({
            "decisions": decisions,
            "summary": self.tracer.summary(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::decision::{DecisionEvent, Outcome, Routing};

    fn record(tracer: &DecisionTracer, id: &str, caller: &str, domain: &str) {
        let mut event = DecisionEvent::new(id, "tools/call", caller, "echo");
        event.routing = Routing {
            domain: domain.to_string(),
            suggested_handler: None,
        };
        event.outcome = Some(Outcome::Allow);
        tracer.record(event.seal());
    }

    fn tool() -> DecisionsTool {
        let tracer = Arc::new(DecisionTracer::new(10));
        record(&tracer, "d1", "alice", "code");
        record(&tracer, "d2", "bob", "code");
        record(&tracer, "d3", "alice", "research");
        DecisionsTool::new(tracer)
    }

    #[test]
    fn lists_newest_first_with_summary() {
        let out = tool().call(serde_json::json!({})).unwrap();
        let ids: Vec<&str> = out["decisions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, ["d3", "d2", "d1"]);
        assert_eq!(out["summary"]["total"], 3);
    }

    #[test]
    fn filters_combine() {
        let out = tool()
            .call(serde_json::json!({"domain": "code", "caller": "alice"}))
            .unwrap();
        let decisions = out["decisions"].as_array().unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0]["id"], "d1");

        let out = tool().call(serde_json::json!({"caller": "alice", "limit": 1})).unwrap();
        assert_eq!(out["decisions"][0]["id"], "d3");
        assert_eq!(out["decisions"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn rejects_bad_limit() {
        let err = tool().call(serde_json::json!({"limit": 0})).unwrap_err();
        assert!(err.contains("positive integer"));
    }
}
