use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tracing::warn;

use crate::auth::Caller;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// POST /mcp: one JSON-RPC envelope per request
// ---------------------------------------------------------------------------

/// Protocol errors travel inside the JSON-RPC body, so this always answers
/// 200, or 202 with no body when the message was a notification.
pub async fn post_message(
    State(app): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: String,
) -> Response {
    match app.ctx.dispatcher.handle_line(&body, &caller.0).await {
        Some(resp) => Json(resp).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /mcp/events: SSE push of decision notifications
// ---------------------------------------------------------------------------

pub async fn sse_events(State(app): State<AppState>) -> impl IntoResponse {
    let rx = app.ctx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        let notification = match msg {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "sse subscriber lagged; notifications dropped");
                return None;
            }
        };
        let data = serde_json::to_string(&notification).ok()?;
        Some(Ok::<Event, Infallible>(
            Event::default().event("message").data(data),
        ))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
