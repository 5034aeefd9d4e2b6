//! 统计 API 处理器

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::instrument;

use crate::{error::ApiError, state::AppState, stats::UserStats};

/// 查询用户活动统计
///
/// GET /api/v1/activities/stats/:user_id
///
/// 返回 { totalActivities, byType, byStatus }。
#[instrument(skip(state))]
pub async fn user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserStats>, ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::Validation("userId 不能为空".to_string()));
    }

    let stats = state.stats.stats_for_user(&user_id).await?;
    Ok(Json(stats))
}
