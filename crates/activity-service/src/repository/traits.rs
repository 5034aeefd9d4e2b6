//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试。
//! 存储连接的生命周期由具体实现持有的连接池管理，
//! 调用方不直接触碰连接。

use async_trait::async_trait;

use activity_shared::activity::Activity;
use activity_shared::error::Result;

use super::filter::{ActivityFilter, PageRequest};

/// 活动仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityRepositoryTrait: Send + Sync {
    /// 保存活动：无 id 则插入（返回带存储分配 id 的活动），
    /// 有 id 则按 id 全量替换可变字段；id 不存在时返回 NotFound
    async fn save(&self, activity: Activity) -> Result<Activity>;

    /// 按 id 点查，不存在返回 None（与错误区分）
    async fn find_by_id(&self, id: i64) -> Result<Option<Activity>>;

    /// 过滤 + 分页 + 排序查询，返回 (当前页数据, 满足过滤的总数)
    async fn find_all(
        &self,
        filter: &ActivityFilter,
        page: &PageRequest,
    ) -> Result<(Vec<Activity>, i64)>;

    /// 与 find_all 相同的过滤语义，仅计数
    async fn count_by_filters(&self, filter: &ActivityFilter) -> Result<i64>;

    /// 幂等删除，返回是否实际删除了记录
    async fn delete(&self, id: i64) -> Result<bool>;
}
