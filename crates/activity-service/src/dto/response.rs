//! 响应 DTO 定义
//!
//! 列表查询返回 `{ data, pagination }` 结构；写操作与错误使用统一的
//! `{ success, code, message, data }` 信封。活动本身的 serde 表示
//! 即对外 JSON 形态，不再做一层映射。

use serde::Serialize;

/// 分页元信息
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

/// 分页响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> PageResponse<T> {
    /// 创建分页响应，totalPages = ceil(total / limit)
    pub fn new(data: Vec<T>, total: i64, page: i64, limit: i64) -> Self {
        let total_pages = if limit > 0 {
            (total + limit - 1) / limit
        } else {
            0
        };

        Self {
            data,
            pagination: Pagination {
                total,
                page,
                limit,
                total_pages,
            },
        }
    }
}

/// API 统一响应信封
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    /// 创建成功响应（自定义消息）
    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

/// 单条活动已接收
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedDto {
    /// 消息落入的分区（同一用户的事件始终落在同一分区）
    pub partition: i32,
    /// 分区内偏移
    pub offset: i64,
}

/// 批量活动已接收
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPublishedDto {
    pub count: usize,
}

/// 删除结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedDto {
    pub deleted: bool,
}
