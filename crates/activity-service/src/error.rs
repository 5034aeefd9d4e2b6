//! 活动服务错误类型定义
//!
//! 将管道错误映射为 HTTP 语义：校验失败 -> 400，资源不存在 -> 404，
//! 其余一律 500。响应体使用统一的机器可读信封。

use activity_shared::error::ActivityError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// 活动服务错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // 请求校验错误
    #[error("参数校验失败: {0}")]
    Validation(String),

    // 资源不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    // 消息总线错误（连接或投递失败，调用方可退避后重试）
    #[error("消息投递失败: {0}")]
    Delivery(String),

    // 系统错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Delivery(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回错误码（API 响应的一部分，客户端据此做条件分支）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Delivery(_) => "DELIVERY_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志，防止信息泄露
        let message = match &self {
            Self::Delivery(e) => {
                tracing::error!(error = %e, "消息投递失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从共享库错误转换
///
/// 校验与未找到保留各自语义，总线故障归入 Delivery，
/// 其余（持久化、缓存、状态机、内部）统一归入 Internal。
impl From<ActivityError> for ApiError {
    fn from(err: ActivityError) -> Self {
        match err {
            ActivityError::Validation(msg) => Self::Validation(msg),
            ActivityError::NotFound { entity, id } => {
                Self::NotFound(format!("{entity} {id} 不存在"))
            }
            ActivityError::Connection(msg) | ActivityError::Delivery(msg) => Self::Delivery(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use serde_json::json;

    /// 所有错误变体及其期望的 (StatusCode, error_code) 映射
    fn all_error_variants() -> Vec<(ApiError, StatusCode, &'static str)> {
        vec![
            (
                ApiError::Validation("userId 不能为空".into()),
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            ),
            (
                ApiError::NotFound("Activity 42 不存在".into()),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                ApiError::Delivery("broker 不可达".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "DELIVERY_ERROR",
            ),
            (
                ApiError::Internal("unexpected state".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ]
    }

    /// 状态码错误会导致客户端误判请求结果，逐一验证
    #[test]
    fn test_all_variants_status_code() {
        for (error, expected_status, label) in all_error_variants() {
            assert_eq!(
                error.status_code(),
                expected_status,
                "状态码不匹配: variant={label}"
            );
        }
    }

    /// 错误码是 API 契约的一部分，必须逐一锁定
    #[test]
    fn test_all_variants_error_code() {
        for (error, _status, expected_code) in all_error_variants() {
            assert_eq!(
                error.error_code(),
                expected_code,
                "错误码不匹配: expected={expected_code}"
            );
        }
    }

    /// 响应体必须包含 success/code/message/data 四个字段
    #[tokio::test]
    async fn test_into_response_body_structure() {
        for (error, expected_status, expected_code) in all_error_variants() {
            let label = format!("{:?}", error);
            let response = error.into_response();

            assert_eq!(response.status(), expected_status, "状态码不匹配: {label}");

            let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("读取响应体失败");
            let body: serde_json::Value =
                serde_json::from_slice(&body_bytes).expect("响应体不是合法 JSON");

            assert_eq!(body["success"], json!(false), "success 应为 false: {label}");
            assert_eq!(body["code"], json!(expected_code), "code 不匹配: {label}");
            assert!(
                !body["message"].as_str().unwrap_or("").is_empty(),
                "message 不应为空: {label}"
            );
            assert!(body["data"].is_null(), "data 应为 null: {label}");
        }
    }

    /// 系统级错误的响应消息不应泄露内部细节
    #[tokio::test]
    async fn test_system_errors_hide_internal_details() {
        let error = ApiError::Delivery("kafka://10.0.0.1:9092 connection refused".into());
        let response = error.into_response();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        let message = body["message"].as_str().unwrap();

        assert!(!message.contains("10.0.0.1"), "消息泄露了内部地址: {message}");
        assert!(message.contains("服务内部错误"));
    }

    /// 业务错误的响应消息应保留原始上下文
    #[tokio::test]
    async fn test_business_errors_preserve_message() {
        let error = ApiError::NotFound("Activity 42 不存在".into());
        let response = error.into_response();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

        assert!(body["message"].as_str().unwrap().contains("42"));
    }

    /// 共享库错误的映射决定了客户端看到的语义
    #[test]
    fn test_from_activity_error_mapping() {
        let err: ApiError = ActivityError::Validation("类型无效".into()).into();
        assert!(matches!(err, ApiError::Validation(_)));

        let err: ApiError = ActivityError::NotFound {
            entity: "Activity".into(),
            id: "7".into(),
        }
        .into();
        match &err {
            ApiError::NotFound(msg) => assert!(msg.contains('7')),
            other => panic!("期望 NotFound，实际: {other:?}"),
        }

        let err: ApiError = ActivityError::Connection("broker down".into()).into();
        assert!(matches!(err, ApiError::Delivery(_)));

        let err: ApiError = ActivityError::Delivery("队列已满".into()).into();
        assert!(matches!(err, ApiError::Delivery(_)));

        // 持久化与状态机错误都归入 Internal
        let err: ApiError = ActivityError::Persistence(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(err, ApiError::Internal(_)));

        let err: ApiError = ActivityError::IllegalState("未连接".into()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    /// validator 错误应保留字段名，否则用户无法定位问题
    #[test]
    fn test_from_validation_errors() {
        use validator::{ValidationError, ValidationErrors};

        let mut errors = ValidationErrors::new();
        let mut field_error = ValidationError::new("length");
        field_error.message = Some("userId 不能为空".into());
        errors.add("userId", field_error);

        let api_error: ApiError = errors.into();
        match &api_error {
            ApiError::Validation(msg) => assert!(msg.contains("userId")),
            other => panic!("期望 Validation 变体，实际: {other:?}"),
        }
        assert_eq!(api_error.status_code(), StatusCode::BAD_REQUEST);
    }
}
