use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::analyze::{analyze_selection, simulate_selection};
use super::select::select_optimal_member;
use super::status::{get_all_pools_status, get_pool_status, health_check};
use crate::app::AppState;

/// 创建应用路由
pub fn create_app_router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/scheduler/select", post(select_optimal_member))
        .route("/pools/status", get(get_all_pools_status))
        .route("/pools/{name}/{partition}/status", get(get_pool_status))
        .route("/pools/{name}/{partition}/simulate", post(simulate_selection))
        .route("/pools/{name}/{partition}/analyze", post(analyze_selection))
        .layer(TraceLayer::new_for_http())
}

/// 首页处理器
pub async fn index() -> &'static str {
    "LLM Inference Gateway Scheduler"
}
