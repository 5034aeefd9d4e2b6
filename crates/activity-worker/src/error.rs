//! worker 专用错误类型
//!
//! 在共享库 ActivityError 基础上区分两类消费侧特有情形：
//! 重复投递（幂等键已存在，跳过即可）与前置校验不通过（丢弃并告警）。

use activity_shared::error::ActivityError;

/// 活动消费处理错误
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Kafka 重复投递时通过幂等键识别出已处理的事件，直接跳过
    #[error("活动已处理: {key}")]
    AlreadyProcessed { key: String },

    /// 前置校验不通过的活动丢弃而不重试
    #[error("活动校验未通过: {reason}")]
    Invalid { reason: String },

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] ActivityError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkerError::AlreadyProcessed {
            key: "u-001:1700000000000:LOGIN".to_string(),
        };
        assert_eq!(err.to_string(), "活动已处理: u-001:1700000000000:LOGIN");

        let err = WorkerError::Invalid {
            reason: "userId 为空".to_string(),
        };
        assert_eq!(err.to_string(), "活动校验未通过: userId 为空");

        let shared = ActivityError::Delivery("broker 不可达".to_string());
        let err = WorkerError::Shared(shared);
        assert_eq!(err.to_string(), "消息投递失败: broker 不可达");
    }
}
