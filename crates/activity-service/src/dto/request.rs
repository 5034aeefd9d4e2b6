//! 请求 DTO 定义
//!
//! 边界校验在此完成：格式与取值范围交给 validator，
//! 语义校验（去空白后的非空用户标识、元数据边界）由实体构造函数兜底。
//! 两道校验都发生在任何总线交互之前。

use activity_shared::activity::{Activity, ActivityStatus, ActivityType, Metadata};
use activity_shared::error::ActivityError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::repository::{ActivityFilter, PageRequest, SortField, SortOrder};

/// 上报活动请求
#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateActivityRequest {
    #[validate(length(min = 1, message = "userId 不能为空"))]
    pub user_id: String,
    pub activity_type: ActivityType,
    #[serde(default)]
    pub metadata: Metadata,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

impl CreateActivityRequest {
    /// 转换为领域实体：PENDING 状态、服务端分配事件时间
    pub fn into_activity(self) -> Result<Activity, ActivityError> {
        Ok(
            Activity::new(self.user_id, self.activity_type, self.metadata)?.with_context(
                self.ip_address,
                self.user_agent,
                self.session_id,
            ),
        )
    }
}

/// 批量上报活动请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BatchPublishRequest {
    #[validate(length(min = 1, max = 100, message = "单批活动数量必须在 1-100 之间"))]
    pub activities: Vec<CreateActivityRequest>,
}

/// 活动列表查询参数
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListActivitiesParams {
    pub user_id: Option<String>,
    pub activity_type: Option<ActivityType>,
    pub status: Option<ActivityStatus>,
    pub session_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    #[validate(range(min = 1, message = "page 必须大于等于 1"))]
    pub page: i64,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100, message = "limit 必须在 1-100 之间"))]
    pub limit: i64,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    10
}

impl ListActivitiesParams {
    /// 提取过滤条件
    pub fn filter(&self) -> ActivityFilter {
        ActivityFilter {
            user_id: self.user_id.clone(),
            activity_type: self.activity_type,
            status: self.status,
            session_id: self.session_id.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }

    /// 提取分页与排序
    pub fn page_request(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            limit: self.limit,
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        }
    }
}
