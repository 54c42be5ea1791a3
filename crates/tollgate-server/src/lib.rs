pub mod auth;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::{middleware as mw, Router};
use tollgate_core::AppContext;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with the MCP transport, operator API and
/// middleware stack. Used by `serve()` and available for integration testing.
pub fn build_router(ctx: AppContext) -> Router {
    let app_state = state::AppState::new(ctx);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // MCP transport
        .route("/mcp", post(routes::mcp::post_message))
        .route("/mcp/events", get(routes::mcp::sse_events))
        // Decisions
        .route("/api/decisions", get(routes::decisions::list_decisions))
        .route(
            "/api/decisions/summary",
            get(routes::decisions::decision_summary),
        )
        .route("/api/decisions/{id}", get(routes::decisions::get_decision))
        // Breakers
        .route("/api/breakers", get(routes::breakers::list_breakers))
        .route(
            "/api/breakers/reset",
            post(routes::breakers::reset_all_breakers),
        )
        .route("/api/breakers/{name}", get(routes::breakers::get_breaker))
        .route(
            "/api/breakers/{name}/reset",
            post(routes::breakers::reset_breaker),
        )
        // Innermost first: auth sees only requests the transport limiter admitted.
        .layer(mw::from_fn_with_state(
            app_state.clone(),
            auth::auth_middleware,
        ))
        .layer(mw::from_fn_with_state(
            app_state.clone(),
            middleware::rate_limit,
        ))
        .layer(cors)
        .layer(mw::from_fn(middleware::security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Bind `server.host:server.port` from the context's config and serve until
/// the process is stopped.
pub async fn serve(ctx: AppContext) -> anyhow::Result<()> {
    let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(ctx, listener).await
}

/// Serve on a pre-bound listener.
///
/// Lets the caller read the actual port before starting (useful when
/// `port = 0` and the OS picks a free port).
pub async fn serve_on(ctx: AppContext, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let local = listener.local_addr()?;
    let app = build_router(ctx);

    tracing::info!("tollgate listening on http://{local}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
