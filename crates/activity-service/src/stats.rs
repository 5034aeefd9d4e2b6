//! 用户活动统计
//!
//! 从仓储读取单个用户的活动并归并为两张频次表（按类型、按状态）。
//! 扫描量有上限：totalActivities 始终来自计数查询因而精确，
//! 频次明细只在上限之内精确——超大体量用户如需精确明细，
//! 应替换为存储侧聚合实现，对外接口保持不变。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use activity_shared::activity::Activity;
use activity_shared::error::Result;

use crate::repository::{ActivityFilter, ActivityRepositoryTrait, PageRequest};

/// 单次统计最多扫描的活动数
pub const STATS_SCAN_LIMIT: i64 = 10_000;

/// 用户活动统计结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    /// 用户活动总数（来自计数查询，不受扫描上限影响）
    pub total_activities: i64,
    /// 按活动类型的频次
    pub by_type: BTreeMap<String, i64>,
    /// 按处理状态的频次
    pub by_status: BTreeMap<String, i64>,
}

/// 统计聚合器
pub struct StatsAggregator {
    repository: Arc<dyn ActivityRepositoryTrait>,
}

impl StatsAggregator {
    pub fn new(repository: Arc<dyn ActivityRepositoryTrait>) -> Self {
        Self { repository }
    }

    /// 统计指定用户的活动分布
    pub async fn stats_for_user(&self, user_id: &str) -> Result<UserStats> {
        let filter = ActivityFilter::for_user(user_id);
        // 最新的活动优先进入明细窗口
        let page = PageRequest::new(1, STATS_SCAN_LIMIT);

        let (activities, total) = self.repository.find_all(&filter, &page).await?;
        let (by_type, by_status) = reduce_counts(&activities);

        debug!(
            user_id,
            total,
            scanned = activities.len(),
            "用户活动统计完成"
        );

        Ok(UserStats {
            total_activities: total,
            by_type,
            by_status,
        })
    }
}

/// 将活动列表归并为按类型/按状态的频次表
fn reduce_counts(activities: &[Activity]) -> (BTreeMap<String, i64>, BTreeMap<String, i64>) {
    let mut by_type: BTreeMap<String, i64> = BTreeMap::new();
    let mut by_status: BTreeMap<String, i64> = BTreeMap::new();

    for activity in activities {
        *by_type.entry(activity.activity_type.to_string()).or_insert(0) += 1;
        *by_status.entry(activity.status.to_string()).or_insert(0) += 1;
    }

    (by_type, by_status)
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
