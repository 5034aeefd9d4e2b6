//! 活动处理服务
//!
//! 对每条投递恰好执行一次状态迁移并持久化。持久化失败时
//! 尽力把 FAILED 终态写入存储再上抛原始错误——调用方不能假定
//! "报错等于什么都没写入"。
//!
//! 幂等检查基于 Redis：以活动的幂等键（用户 + 事件时间 + 类型）
//! 做 SET NX，at-least-once 投递下的重复消息在处理前被识别并跳过。
//! 超过保留窗口的重复会落为重复的 PROCESSED 行，这是有意的取舍。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use activity_service::repository::ActivityRepositoryTrait;
use activity_shared::activity::Activity;
use activity_shared::cache::Cache;
use activity_shared::error::ActivityError;

use crate::error::WorkerError;

/// 幂等键前缀
const PROCESSED_KEY_PREFIX: &str = "activity:processed:";
/// 幂等记录保留 24 小时，超过此窗口的重复投递不再拦截
const PROCESSED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 活动处理服务
///
/// 组合两个注入的句柄完成处理：
/// - `repository`: 活动持久化
/// - `cache`: Redis 幂等校验
pub struct ActivityProcessor {
    repository: Arc<dyn ActivityRepositoryTrait>,
    cache: Cache,
}

impl ActivityProcessor {
    pub fn new(repository: Arc<dyn ActivityRepositoryTrait>, cache: Cache) -> Self {
        Self { repository, cache }
    }

    fn processed_key(key: &str) -> String {
        format!("{PROCESSED_KEY_PREFIX}{key}")
    }

    /// 只读前置校验：去空白后的非空用户标识、元数据边界
    ///
    /// 线上消息绕过了实体构造函数（serde 不做语义校验），这里兜底。
    /// 类型与时间戳的存在性由类型系统保证，无需重复检查。
    /// 校验失败的活动丢弃并告警，不会重试。
    pub fn validate(&self, activity: &Activity) -> Result<(), WorkerError> {
        if activity.user_id.trim().is_empty() {
            return Err(WorkerError::Invalid {
                reason: "userId 为空".to_string(),
            });
        }
        activity
            .metadata
            .validate()
            .map_err(|e| WorkerError::Invalid {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// 检查活动是否已处理（基于幂等键）
    pub async fn is_processed(&self, activity: &Activity) -> Result<bool, ActivityError> {
        let key = Self::processed_key(&activity.idempotency_key());
        let exists = self.cache.exists(&key).await?;

        if exists {
            debug!(idempotency_key = %activity.idempotency_key(), "活动已处理，跳过");
        }

        Ok(exists)
    }

    /// 写入幂等标记，保留窗口结束后自动过期
    pub async fn mark_processed(&self, activity: &Activity) -> Result<(), ActivityError> {
        let key = Self::processed_key(&activity.idempotency_key());
        self.cache.set_nx(&key, &"1", PROCESSED_TTL).await?;

        debug!(idempotency_key = %activity.idempotency_key(), "活动已标记为已处理");
        Ok(())
    }

    /// 处理活动：迁移到 PROCESSED 并持久化
    ///
    /// 持久化失败时走补偿路径：基于迁移前的原始状态构造 FAILED 副本，
    /// 尽力写入存储（失败只告警），然后把触发故障的原始错误抛给调用方。
    /// 因此报错的活动也可能已经以 FAILED 终态落库。
    pub async fn process(&self, activity: Activity) -> Result<Activity, ActivityError> {
        let pristine = activity.clone();

        let mut activity = activity;
        activity.mark_processed()?;

        match self.repository.save(activity).await {
            Ok(saved) => {
                info!(
                    id = ?saved.id,
                    user_id = %saved.user_id,
                    activity_type = %saved.activity_type,
                    "活动已持久化为 PROCESSED"
                );
                Ok(saved)
            }
            Err(err) => {
                warn!(
                    user_id = %pristine.user_id,
                    error = %err,
                    "持久化失败，尝试记录 FAILED 终态"
                );

                let mut failed = pristine;
                match failed.mark_failed() {
                    Ok(()) => {
                        if let Err(fallback_err) = self.repository.save(failed).await {
                            warn!(
                                error = %fallback_err,
                                "FAILED 终态落库失败，该活动未被记录"
                            );
                        }
                    }
                    Err(transition_err) => {
                        warn!(error = %transition_err, "无法迁移到 FAILED");
                    }
                }

                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
