//! JSON-RPC method dispatch shared by every transport.
//!
//! Transports hand in raw lines or decoded JSON values and write out
//! whatever response comes back; `None` means nothing is sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::decision::ExecutionReport;
use crate::error::GateError;
use crate::orchestrator::{AdmissionRequest, Orchestrator};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use crate::tools::{GatewayTool, ToolRegistry};
use crate::truncate::truncate_result;

const KNOWN_NOTIFICATIONS: &[&str] = &["notifications/initialized", "notifications/cancelled"];

pub struct Dispatcher {
    config: DispatcherConfig,
    orchestrator: Arc<Orchestrator>,
    tools: Arc<ToolRegistry>,
    shutdown: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        orchestrator: Arc<Orchestrator>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            tools,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// True once a `shutdown` request has been answered.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Handle one line of the line-delimited transport.
    pub async fn handle_line(&self, line: &str, caller: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<Value>(line) {
            Ok(raw) => self.handle_value(raw, caller).await,
            Err(e) => Some(JsonRpcResponse::from_error(
                None,
                &GateError::Parse(e.to_string()),
            )),
        }
    }

    /// Handle one decoded envelope. Messages without an `id` key are
    /// notifications and never produce a response.
    pub async fn handle_value(&self, raw: Value, caller: &str) -> Option<JsonRpcResponse> {
        let has_id = raw.as_object().map(|o| o.contains_key("id")).unwrap_or(false);
        if !has_id {
            match raw.get("method").and_then(Value::as_str) {
                Some(m) if KNOWN_NOTIFICATIONS.contains(&m) => debug!(method = m, "notification"),
                Some(m) => debug!(method = m, "ignoring unknown notification"),
                None => debug!("ignoring message without id or method"),
            }
            return None;
        }

        let id = raw.get("id").cloned();
        let req: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::from_error(
                    id,
                    &GateError::InvalidRequest(e.to_string()),
                ))
            }
        };
        if req.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::from_error(
                req.id,
                &GateError::InvalidRequest(format!("unsupported jsonrpc version '{}'", req.jsonrpc)),
            ));
        }
        Some(self.handle_request(&req, caller).await)
    }

    pub async fn handle_request(&self, req: &JsonRpcRequest, caller: &str) -> JsonRpcResponse {
        let id = req.id.clone();
        match req.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": self.config.protocol_version,
                    "capabilities": {
                        "tools": {},
                        "resources": {},
                        "prompts": {}
                    },
                    "serverInfo": {
                        "name": "tollgate",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            ),
            m if KNOWN_NOTIFICATIONS.contains(&m) => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": self.tools.list() })),
            "tools/call" => match self.call_tool(req.params.as_ref(), caller).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => JsonRpcResponse::from_error(id, &e),
            },
            "resources/list" => JsonRpcResponse::success(id, json!({ "resources": [] })),
            "prompts/list" => JsonRpcResponse::success(id, json!({ "prompts": [] })),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "shutdown" => {
                self.shutdown.store(true, Ordering::SeqCst);
                JsonRpcResponse::success(id, json!({}))
            }
            other => JsonRpcResponse::from_error(
                id,
                &GateError::NotFound(format!("method not found: {other}")),
            ),
        }
    }

    // -----------------------------------------------------------------------
    // tools/call
    // -----------------------------------------------------------------------

    /// Admission, execution and post-analysis run on their own task, so a
    /// caller that stops waiting only loses the response.
    async fn call_tool(&self, params: Option<&Value>, caller: &str) -> crate::Result<Value> {
        let params = params.ok_or_else(|| GateError::InvalidParams("missing params".to_string()))?;
        let name = params["name"]
            .as_str()
            .ok_or_else(|| GateError::InvalidParams("missing tool name in params".to_string()))?;
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| GateError::NotFound(format!("tool not found: {name}")))?;

        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let admission = AdmissionRequest {
            event_type: name.to_string(),
            caller: caller.to_string(),
            content: admission_text(name, &args),
            arguments: args,
            require_judgment: params["_meta"]["requireJudgment"].as_bool().unwrap_or(false),
        };

        let cycle = tokio::spawn(admit_and_execute(
            Arc::clone(&self.orchestrator),
            tool,
            admission,
            self.config.max_response_bytes,
        ));
        match cycle.await {
            Ok(result) => result,
            Err(e) => Err(GateError::Downstream(format!("admission task failed: {e}"))),
        }
    }
}

async fn admit_and_execute(
    orchestrator: Arc<Orchestrator>,
    tool: Arc<dyn GatewayTool>,
    admission: AdmissionRequest,
    max_response_bytes: usize,
) -> crate::Result<Value> {
    let decision_id = Uuid::new_v4().to_string();
    let event = orchestrator.pre_decision(&decision_id, &admission).await?;

    let name = admission.event_type;
    let args = admission.arguments;
    let started = Instant::now();
    let outcome = match tokio::task::spawn_blocking(move || tool.call(args)).await {
        Ok(outcome) => outcome,
        Err(e) => Err(format!("tool panicked: {e}")),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    let (text, is_error) = match &outcome {
        Ok(Value::String(s)) => (s.clone(), false),
        Ok(v) => (
            serde_json::to_string_pretty(v)
                .unwrap_or_else(|e| format!("serialization error: {e}")),
            false,
        ),
        Err(e) => (e.clone(), true),
    };
    let result = json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    });
    let (result, warning) = truncate_result(result, max_response_bytes);
    if let Some(w) = &warning {
        warn!(
            decision = %decision_id,
            tool = %name,
            original_bytes = w.original_bytes,
            truncated_bytes = w.truncated_bytes,
            "tool result truncated"
        );
    }

    let report = ExecutionReport {
        success: !is_error,
        duration_ms,
        truncated: warning.is_some(),
        error: outcome.err(),
    };
    // Detached: the response never waits on post-analysis.
    drop(orchestrator.post_analysis(event, report));
    Ok(result)
}

/// Text inspected by routing and risk: the tool name followed by every
/// string found in the arguments, depth first.
fn admission_text(name: &str, args: &Value) -> String {
    fn collect(v: &Value, out: &mut Vec<String>) {
        match v {
            Value::String(s) => out.push(s.clone()),
            Value::Array(items) => items.iter().for_each(|i| collect(i, out)),
            Value::Object(map) => map.values().for_each(|i| collect(i, out)),
            _ => {}
        }
    }
    let mut parts = vec![name.to_string()];
    collect(args, &mut parts);
    parts.join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
