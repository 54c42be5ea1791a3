use std::sync::Arc;
use tollgate_core::breaker::BreakerRegistry;
use tollgate_core::tools::GatewayTool;

// ---------------------------------------------------------------------------
// gateway_breakers
// ---------------------------------------------------------------------------

pub struct BreakersTool {
    breakers: Arc<BreakerRegistry>,
}

impl BreakersTool {
    pub fn new(breakers: Arc<BreakerRegistry>) -> Self {
        Self { breakers }
    }
}

impl GatewayTool for BreakersTool {
    fn name(&self) -> &str {
        "gateway_breakers"
    }

    fn description(&self) -> &str {
        "Report circuit breaker health, either for one breaker or all of them"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Breaker name, e.g. orchestrator:judgment (omit for all)"
                }
            }
        })
    }

    fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        match args["name"].as_str() {
            Some(name) => self
                .breakers
                .health(name)
                .map(|h| serde_json::json!({ "breakers": [h] }))
                .ok_or_else(|| format!("breaker '{name}' not found")),
            None => Ok(serde_json::json!({ "breakers": self.breakers.health_all() })),
        }
    }
}

// ---------------------------------------------------------------------------
// gateway_breaker_reset
// ---------------------------------------------------------------------------

pub struct BreakerResetTool {
    breakers: Arc<BreakerRegistry>,
}

impl BreakerResetTool {
    pub fn new(breakers: Arc<BreakerRegistry>) -> Self {
        Self { breakers }
    }
}

impl GatewayTool for BreakerResetTool {
    fn name(&self) -> &str {
        "gateway_breaker_reset"
    }

    fn description(&self) -> &str {
        "Force a circuit breaker (or all breakers) back to closed"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Breaker to reset"
                },
                "all": {
                    "type": "boolean",
                    "description": "Reset every breaker instead"
                }
            }
        })
    }

    fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        if args["all"].as_bool().unwrap_or(false) {
            let count = self.breakers.reset_all();
            return Ok(serde_json::json!({ "reset": count }));
        }
        let name = args["name"]
            .as_str()
            .ok_or_else(|| "missing required argument: name (or all: true)".to_string())?;
        if !self.breakers.reset(name) {
            return Err(format!("breaker '{name}' not found"));
        }
        Ok(serde_json::json!({ "name": name, "reset": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<BreakerRegistry> {
        let breakers = Arc::new(BreakerRegistry::default());
        breakers.record_failure("orchestrator:judgment", "timeout");
        breakers.record_success("orchestrator:audit");
        breakers
    }

    #[test]
    fn lists_all_or_one() {
        let tool = BreakersTool::new(registry());
        let all = tool.call(serde_json::json!({})).unwrap();
        assert_eq!(all["breakers"].as_array().unwrap().len(), 2);

        let one = tool
            .call(serde_json::json!({"name": "orchestrator:judgment"}))
            .unwrap();
        assert_eq!(one["breakers"][0]["failure_count"], 1);

        let err = tool.call(serde_json::json!({"name": "nope"})).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn reset_one_and_all() {
        let breakers = registry();
        let tool = BreakerResetTool::new(Arc::clone(&breakers));

        let out = tool
            .call(serde_json::json!({"name": "orchestrator:judgment"}))
            .unwrap();
        assert_eq!(out["reset"], true);
        assert_eq!(breakers.health("orchestrator:judgment").unwrap().failure_count, 0);

        let out = tool.call(serde_json::json!({"all": true})).unwrap();
        assert_eq!(out["reset"], 2);

        assert!(tool.call(serde_json::json!({})).is_err());
        assert!(tool.call(serde_json::json!({"name": "missing"})).is_err());
    }
}
