//! 统一错误处理模块
//!
//! 定义活动管道中所有共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 分类与重试语义对应：连接/投递/持久化类故障可由调用方退避重试，
//! 校验与状态机类错误不可重试。

use thiserror::Error;

/// 活动管道错误类型
#[derive(Debug, Error)]
pub enum ActivityError {
    // ==================== 校验错误 ====================
    #[error("参数校验失败: {0}")]
    Validation(String),

    // ==================== 资源错误 ====================
    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 消息总线错误 ====================
    #[error("总线连接失败: {0}")]
    Connection(String),

    #[error("消息投递失败: {0}")]
    Delivery(String),

    // ==================== 存储错误 ====================
    #[error("持久化失败: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    // ==================== 状态机错误 ====================
    /// 在前置连接/订阅步骤完成之前调用操作，或对终态活动做二次迁移。
    /// 属于编程错误而非可恢复故障。
    #[error("非法状态: {0}")]
    IllegalState(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, ActivityError>;

impl ActivityError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Delivery(_) => "DELIVERY_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::IllegalState(_) => "ILLEGAL_STATE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 仅基础设施层的瞬时故障可重试；校验失败和状态机违规重试多少次
    /// 结果都一样，直接向上传播。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Delivery(_) | Self::Persistence(_) | Self::Redis(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = ActivityError::NotFound {
            entity: "Activity".to_string(),
            id: "42".to_string(),
        };
        assert_eq!(err.code(), "NOT_FOUND");

        assert_eq!(
            ActivityError::Validation("userId 为空".to_string()).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            ActivityError::Delivery("broker 拒绝".to_string()).code(),
            "DELIVERY_ERROR"
        );
        assert_eq!(
            ActivityError::IllegalState("未连接".to_string()).code(),
            "ILLEGAL_STATE"
        );
    }

    #[test]
    fn test_is_retryable() {
        let db_err = ActivityError::Persistence(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        assert!(ActivityError::Connection("broker 不可达".to_string()).is_retryable());
        assert!(ActivityError::Delivery("发送超时".to_string()).is_retryable());

        assert!(!ActivityError::Validation("类型无效".to_string()).is_retryable());
        assert!(!ActivityError::IllegalState("重复迁移".to_string()).is_retryable());
        assert!(
            !ActivityError::NotFound {
                entity: "Activity".to_string(),
                id: "1".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_display() {
        let err = ActivityError::NotFound {
            entity: "Activity".to_string(),
            id: "7".to_string(),
        };
        assert_eq!(err.to_string(), "记录未找到: Activity id=7");

        let err = ActivityError::Delivery("消息超时".to_string());
        assert_eq!(err.to_string(), "消息投递失败: 消息超时");
    }
}
