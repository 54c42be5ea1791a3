use axum::extract::{Path, Query, State};
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;
use tollgate_core::decision::SealedDecision;
use tollgate_core::tracer::TraceSummary;

// ---------------------------------------------------------------------------
// GET /api/decisions: most recent decisions, newest first
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize, Default)]
pub struct DecisionListParams {
    limit: Option<usize>,
    domain: Option<String>,
    caller: Option<String>,
}

pub async fn list_decisions(
    State(app): State<AppState>,
    Query(params): Query<DecisionListParams>,
) -> Json<Vec<SealedDecision>> {
    let tracer = &app.ctx.tracer;
    let limit = params.limit.unwrap_or(50);
    let decisions = match (params.domain, params.caller) {
        (Some(domain), None) => tracer.by_domain(&domain, limit),
        (None, Some(caller)) => tracer.by_caller(&caller, limit),
        (Some(domain), Some(caller)) => tracer
            .by_domain(&domain, usize::MAX)
            .into_iter()
            .filter(|d| d.caller == caller)
            .take(limit)
            .collect(),
        (None, None) => tracer.recent(limit),
    };
    Json(decisions)
}

// ---------------------------------------------------------------------------
// GET /api/decisions/summary
// ---------------------------------------------------------------------------

pub async fn decision_summary(State(app): State<AppState>) -> Json<TraceSummary> {
    Json(app.ctx.tracer.summary())
}

// ---------------------------------------------------------------------------
// GET /api/decisions/{id}
// ---------------------------------------------------------------------------

pub async fn get_decision(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SealedDecision>, AppError> {
    app.ctx
        .tracer
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("decision '{id}' not found")))
}
