//! 活动 API 处理器
//!
//! 写路径：请求校验 -> 构造实体 -> 发布到 Kafka（202 Accepted，
//! 持久化由 worker 异步完成）。读路径：直接查询仓储。

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::{info, instrument};
use validator::Validate;

use activity_shared::activity::Activity;

use crate::{
    dto::{
        ApiResponse, BatchPublishRequest, BatchPublishedDto, CreateActivityRequest, DeletedDto,
        ListActivitiesParams, PageResponse, PublishedDto,
    },
    error::ApiError,
    state::AppState,
};

/// 上报单个活动
///
/// POST /api/v1/activities
///
/// 校验在任何总线交互之前完成；成功即表示活动已进入总线，
/// 返回消息的分区与偏移作为投递凭据。
#[instrument(skip(state, req))]
pub async fn publish_activity(
    State(state): State<AppState>,
    Json(req): Json<CreateActivityRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PublishedDto>>), ApiError> {
    req.validate()?;
    let activity = req.into_activity()?;

    let (partition, offset) = state.publisher.publish(&activity).await?;

    info!(
        user_id = %activity.user_id,
        activity_type = %activity.activity_type,
        partition,
        offset,
        "活动已接收并发布"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success_with_message(
            PublishedDto { partition, offset },
            "活动已接收",
        )),
    ))
}

/// 批量上报活动
///
/// POST /api/v1/activities/batch
///
/// 整批先完成全部校验与实体构造，再一次性提交到总线；
/// 任何一条校验失败整批拒绝，不会产生部分发布。
#[instrument(skip(state, req))]
pub async fn publish_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchPublishRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BatchPublishedDto>>), ApiError> {
    req.validate()?;

    let activities = req
        .activities
        .into_iter()
        .map(|item| {
            item.validate()?;
            item.into_activity().map_err(ApiError::from)
        })
        .collect::<Result<Vec<Activity>, ApiError>>()?;

    let deliveries = state.publisher.publish_batch(&activities).await?;

    info!(count = deliveries.len(), "批量活动已接收并发布");

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success_with_message(
            BatchPublishedDto {
                count: deliveries.len(),
            },
            "批量活动已接收",
        )),
    ))
}

/// 查询活动列表
///
/// GET /api/v1/activities
///
/// 过滤条件取合取，分页排序见查询参数；响应为 { data, pagination }。
#[instrument(skip(state))]
pub async fn list_activities(
    State(state): State<AppState>,
    Query(params): Query<ListActivitiesParams>,
) -> Result<Json<PageResponse<Activity>>, ApiError> {
    params.validate()?;

    let (data, total) = state
        .repository
        .find_all(&params.filter(), &params.page_request())
        .await?;

    Ok(Json(PageResponse::new(
        data,
        total,
        params.page,
        params.limit,
    )))
}

/// 按 id 查询单个活动
///
/// GET /api/v1/activities/:id
#[instrument(skip(state))]
pub async fn get_activity(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Activity>, ApiError> {
    match state.repository.find_by_id(id).await? {
        Some(activity) => Ok(Json(activity)),
        None => Err(ApiError::NotFound(format!("Activity {id} 不存在"))),
    }
}

/// 删除活动（运维操作，管道自身从不删除）
///
/// DELETE /api/v1/activities/:id
///
/// 幂等：重复删除返回 deleted=false 而非报错。
#[instrument(skip(state))]
pub async fn delete_activity(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<DeletedDto>>, ApiError> {
    let deleted = state.repository.delete(id).await?;

    if deleted {
        info!(activity_id = id, "活动已删除");
    }

    Ok(Json(ApiResponse::success(DeletedDto { deleted })))
}
