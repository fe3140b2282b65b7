use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::app::AppState;

/// GET /pools/{name}/{partition}/status
pub async fn get_pool_status(
    State(state): State<AppState>,
    Path((name, partition)): Path<(String, String)>,
) -> Response {
    match state.store.get(&partition, &name) {
        Some(pool) => Json(pool.status_view().await).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": format!("pool {partition}/{name} does not exist")})),
        )
            .into_response(),
    }
}

/// GET /pools/status
pub async fn get_all_pools_status(State(state): State<AppState>) -> Response {
    let mut views = Vec::new();
    for pool in state.store.all() {
        views.push(pool.status_view().await);
    }
    // 输出顺序稳定，便于观测
    views.sort_by(|a, b| (&a.partition, &a.name).cmp(&(&b.partition, &b.name)));
    Json(json!({ "pools": views })).into_response()
}

/// GET /health
pub async fn health_check() -> Response {
    Json(json!({
        "status": "healthy",
        "message": "Scheduler running normally",
    }))
    .into_response()
}
