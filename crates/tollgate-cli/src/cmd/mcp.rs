use crate::setup;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tollgate_core::dispatch::Dispatcher;
use tollgate_core::protocol::JsonRpcResponse;

/// Caller identity for everything arriving on the stdio transport.
const STDIO_CALLER: &str = "stdio";

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = setup::load_valid_config(config_path)?;
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async move {
        let ctx = setup::build_context(config)?;
        tracing::info!(tools = ctx.tools.len(), "tollgate stdio transport ready");
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        serve_lines(Arc::clone(&ctx.dispatcher), stdin, stdout).await
    })
}

// ---------------------------------------------------------------------------
// Line loop
// ---------------------------------------------------------------------------

/// One JSON message per line in each direction. Blank lines are skipped
/// and notifications get no reply.
///
/// `tools/call` requests run as separate tasks and reply when they finish,
/// so a slow call never holds up the lines behind it. Everything else is
/// answered in arrival order. After a `shutdown` reply no further lines are
/// read, but calls already in flight still complete and reply.
pub async fn serve_lines<R, W>(dispatcher: Arc<Dispatcher>, reader: R, writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::try_join!(read_lines(dispatcher, reader, tx), write_replies(rx, writer))?;
    Ok(())
}

async fn read_lines<R>(
    dispatcher: Arc<Dispatcher>,
    reader: R,
    tx: mpsc::UnboundedSender<JsonRpcResponse>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut in_flight = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Value>(&line) {
            Ok(raw) if is_tool_call(&raw) => {
                let dispatcher = Arc::clone(&dispatcher);
                let tx = tx.clone();
                in_flight.spawn(async move {
                    if let Some(response) = dispatcher.handle_value(raw, STDIO_CALLER).await {
                        send(&tx, response);
                    }
                });
                None
            }
            Ok(raw) => dispatcher.handle_value(raw, STDIO_CALLER).await,
            Err(_) => dispatcher.handle_line(&line, STDIO_CALLER).await,
        };
        if let Some(response) = reply {
            send(&tx, response);
        }

        while in_flight.try_join_next().is_some() {}

        if dispatcher.is_shutdown() {
            tracing::info!(in_flight = in_flight.len(), "shutdown requested, closing stdio transport");
            break;
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::warn!(error = %e, "stdio request task failed");
        }
    }
    Ok(())
}

async fn write_replies<W>(mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>, mut writer: W) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    Ok(())
}

fn is_tool_call(raw: &Value) -> bool {
    raw.get("id").is_some() && raw.get("method").and_then(Value::as_str) == Some("tools/call")
}

fn send(tx: &mpsc::UnboundedSender<JsonRpcResponse>, response: JsonRpcResponse) {
    if tx.send(response).is_err() {
        tracing::debug!("stdout writer closed; reply dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tollgate_core::config::Config;
    use tollgate_core::tools::GatewayTool;
    use tollgate_core::AppContext;

    struct Sleepy;

    impl GatewayTool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "Blocks for 300ms"
        }
        fn schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        fn call(&self, _args: Value) -> Result<Value, String> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Value::String("awake".into()))
        }
    }

    fn context() -> AppContext {
        let ctx = setup::build_context(Config::default()).unwrap();
        ctx.tools.register(Arc::new(Sleepy));
        ctx
    }

    async fn raw_exchange(ctx: &AppContext, input: &str) -> String {
        let mut output = Vec::new();
        serve_lines(Arc::clone(&ctx.dispatcher), input.as_bytes(), &mut output)
            .await
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    async fn exchange(input: &str) -> Vec<Value> {
        raw_exchange(&context(), input)
            .await
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn responds_once_per_request_line() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let replies = exchange(input).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[0]["result"]["serverInfo"]["name"], "tollgate");
        assert_eq!(replies[1]["result"]["tools"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn garbage_line_gets_parse_error_and_loop_continues() {
        let input = "not json\n{\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"ping\"}\n";
        let replies = exchange(input).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["error"]["code"], -32700);
        assert_eq!(replies[1]["id"], 5);
    }

    #[tokio::test]
    async fn shutdown_stops_reading() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"shutdown"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
        );
        let replies = exchange(input).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["id"], 1);
    }

    #[tokio::test]
    async fn echo_call_round_trips_through_admission() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"echo","arguments":{"text":"hi"}}}"#,
            "\n",
        );
        let replies = exchange(input).await;
        assert_eq!(replies[0]["result"]["isError"], false);
        assert!(replies[0]["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("hi"));
    }

    #[tokio::test]
    async fn slow_call_does_not_hold_up_later_lines() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"sleepy"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
        );
        let replies = exchange(input).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 2);
        assert_eq!(replies[1]["id"], 1);
        assert_eq!(replies[1]["result"]["content"][0]["text"], "awake");
    }

    #[tokio::test]
    async fn shutdown_lets_in_flight_calls_finish() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"sleepy"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"shutdown"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#,
            "\n",
        );
        let replies = exchange(input).await;
        let ids: Vec<i64> = replies.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, [2, 1]);
    }

    #[tokio::test]
    async fn stdio_and_http_replies_are_byte_identical() {
        use http_body_util::BodyExt;
        use tower::ServiceExt;

        let ctx = context();
        let router = tollgate_server::build_router(ctx.clone());
        for request in [
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            r#"{"jsonrpc":"2.0","id":"t","method":"tools/list"}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"nope"}"#,
        ] {
            let line = raw_exchange(&ctx, &format!("{request}\n")).await;

            let req = axum::http::Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(request))
                .unwrap();
            let response = router.clone().oneshot(req).await.unwrap();
            let body = response.into_body().collect().await.unwrap().to_bytes();

            assert_eq!(line.trim_end_matches('\n').as_bytes(), &body[..], "request: {request}");
        }
    }
}
