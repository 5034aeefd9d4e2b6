//! 路由配置模块
//!
//! 定义活动 REST API 端点的路由映射

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::{handlers, state::AppState};

/// 构建活动相关的路由
///
/// 静态路径（/stats/...）必须先于动态路径（/{id}）注册
pub fn activity_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::activity::publish_activity))
        .route("/", get(handlers::activity::list_activities))
        .route("/batch", post(handlers::activity::publish_batch))
        .route("/stats/{user_id}", get(handlers::stats::user_stats))
        .route("/{id}", get(handlers::activity::get_activity))
        .route("/{id}", delete(handlers::activity::delete_activity))
}
