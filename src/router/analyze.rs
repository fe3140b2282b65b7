use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::select::ScheduleRequest;
use crate::app::AppState;

const DEFAULT_SIMULATE_ITERATIONS: u64 = 100;
const DEFAULT_ANALYZE_ITERATIONS: u64 = 1000;

#[derive(Debug, Deserialize)]
pub struct IterationsQuery {
    pub iterations: Option<u64>,
}

/// POST /pools/{name}/{partition}/simulate?iterations=N
pub async fn simulate_selection(
    State(state): State<AppState>,
    Path((name, partition)): Path<(String, String)>,
    Query(query): Query<IterationsQuery>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };
    let iterations = query.iterations.unwrap_or(DEFAULT_SIMULATE_ITERATIONS);
    info!(pool = %name, partition = %partition, iterations, "simulate selection");

    let result = state
        .scheduler
        .simulate(&name, &partition, &request.members, iterations)
        .await;
    Json(result).into_response()
}

/// POST /pools/{name}/{partition}/analyze?iterations=N
/// 对冻结分值做概率偏差分析
pub async fn analyze_selection(
    State(state): State<AppState>,
    Path((name, partition)): Path<(String, String)>,
    Query(query): Query<IterationsQuery>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };
    let iterations = query.iterations.unwrap_or(DEFAULT_ANALYZE_ITERATIONS);
    info!(pool = %name, partition = %partition, iterations, "analyze selection accuracy");

    match state
        .scheduler
        .analyze(&name, &partition, &request.members, iterations)
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(message) => Json(json!({ "error": message })).into_response(),
    }
}
