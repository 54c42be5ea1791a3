use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use crate::error::AppError;
use crate::state::AppState;
use tollgate_core::breaker::BreakerHealth;

// ---------------------------------------------------------------------------
// GET /api/breakers
// ---------------------------------------------------------------------------

pub async fn list_breakers(State(app): State<AppState>) -> Json<Vec<BreakerHealth>> {
    Json(app.ctx.breakers.health_all())
}

// ---------------------------------------------------------------------------
// GET /api/breakers/{name}
// ---------------------------------------------------------------------------

pub async fn get_breaker(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<BreakerHealth>, AppError> {
    app.ctx
        .breakers
        .health(&name)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("breaker '{name}' not found")))
}

// ---------------------------------------------------------------------------
// POST /api/breakers/{name}/reset
// ---------------------------------------------------------------------------

pub async fn reset_breaker(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !app.ctx.breakers.reset(&name) {
        return Err(AppError::not_found(format!("breaker '{name}' not found")));
    }
    Ok(Json(json!({ "name": name, "reset": true })))
}

// ---------------------------------------------------------------------------
// POST /api/breakers/reset
// ---------------------------------------------------------------------------

pub async fn reset_all_breakers(State(app): State<AppState>) -> Json<serde_json::Value> {
    let count = app.ctx.breakers.reset_all();
    Json(json!({ "reset": count }))
}
