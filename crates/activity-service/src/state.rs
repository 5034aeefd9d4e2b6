//! 应用状态定义
//!
//! Axum 路由共享的应用状态。仓储与发布器都是显式注入的句柄
//! 而非进程级单例，测试可以为每个用例构造互相隔离的实例。

use std::sync::Arc;

use crate::publisher::ActivityPublisher;
use crate::repository::ActivityRepositoryTrait;
use crate::stats::StatsAggregator;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 活动仓储（读路径）
    pub repository: Arc<dyn ActivityRepositoryTrait>,
    /// 活动发布器（写路径，持有总线连接）
    pub publisher: Arc<ActivityPublisher>,
    /// 统计聚合器
    pub stats: Arc<StatsAggregator>,
}

impl AppState {
    pub fn new(
        repository: Arc<dyn ActivityRepositoryTrait>,
        publisher: Arc<ActivityPublisher>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            repository,
            publisher,
            stats,
        }
    }
}
