use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use crate::app::AppState;

/// 调度请求体
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub pool_name: String,
    pub partition: String,
    /// 候选成员列表，格式 ["ip:port", ...]
    pub members: Vec<String>,
}

impl ScheduleRequest {
    /// 请求级校验，失败对应400
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.pool_name.is_empty() {
            return Err("pool_name cannot be empty");
        }
        if self.partition.is_empty() {
            return Err("partition cannot be empty");
        }
        if self.members.is_empty() {
            return Err("members cannot be empty");
        }
        Ok(())
    }
}

/// POST /scheduler/select
/// 响应为纯文本："ip:port"、"none" 或 "fallback"。
/// 请求体畸形是调用方错误（400）；上游数据问题（Pool缺失、
/// 无可用成员）不是，统一200+"none"。
pub async fn select_optimal_member(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            warn!("invalid schedule request body: {}", rejection.body_text());
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    if let Err(detail) = request.validate() {
        return (StatusCode::BAD_REQUEST, detail).into_response();
    }

    info!(
        pool = %request.pool_name,
        partition = %request.partition,
        candidates = request.members.len(),
        "received schedule request"
    );

    let selection = state
        .scheduler
        .select(&request.pool_name, &request.partition, &request.members)
        .await;

    let result = selection.as_response_text().to_string();
    info!(pool = %request.pool_name, result = %result, "schedule result");
    (StatusCode::OK, result).into_response()
}
