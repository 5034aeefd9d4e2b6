//! 查询过滤与分页模型
//!
//! 过滤条件是零个或多个等值/区间谓词的合取（AND）。
//! 排序字段采用封闭枚举白名单，列名由枚举映射而来，
//! 查询串里的任意字符串永远不会拼进 SQL。

use activity_shared::activity::{ActivityStatus, ActivityType};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// 活动查询过滤条件
///
/// 所有字段可选，提供的条件之间取合取；时间区间的两端各自独立可选，
/// 均为闭区间（>= start, <= end）。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityFilter {
    pub user_id: Option<String>,
    pub activity_type: Option<ActivityType>,
    pub status: Option<ActivityStatus>,
    pub session_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl ActivityFilter {
    /// 仅按用户过滤的便捷构造（统计场景）
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    /// 是否没有任何过滤条件
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none()
            && self.activity_type.is_none()
            && self.status.is_none()
            && self.session_id.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
    }

    /// 构建 WHERE 子句，占位符从 $1 开始编号
    ///
    /// 返回 (子句, 占位符数量)。绑定顺序固定为：
    /// user_id, activity_type, status, session_id, start_date, end_date，
    /// 调用方必须按同样顺序 bind。
    pub fn where_clause(&self) -> (String, usize) {
        let mut conditions = Vec::new();
        let mut param_idx = 1;

        if self.user_id.is_some() {
            conditions.push(format!("user_id = ${param_idx}"));
            param_idx += 1;
        }
        if self.activity_type.is_some() {
            conditions.push(format!("activity_type = ${param_idx}"));
            param_idx += 1;
        }
        if self.status.is_some() {
            conditions.push(format!("status = ${param_idx}"));
            param_idx += 1;
        }
        if self.session_id.is_some() {
            conditions.push(format!("session_id = ${param_idx}"));
            param_idx += 1;
        }
        if self.start_date.is_some() {
            conditions.push(format!("timestamp >= ${param_idx}"));
            param_idx += 1;
        }
        if self.end_date.is_some() {
            conditions.push(format!("timestamp <= ${param_idx}"));
            param_idx += 1;
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (clause, param_idx - 1)
    }
}

/// 排序字段白名单
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    Timestamp,
    CreatedAt,
    UpdatedAt,
    Status,
    ActivityType,
    UserId,
}

impl SortField {
    /// 对应的列名，ORDER BY 只接受这里列出的值
    pub fn column(&self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Status => "status",
            Self::ActivityType => "activity_type",
            Self::UserId => "user_id",
        }
    }
}

/// 排序方向
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// 分页与排序请求
///
/// page 从 1 开始；skip = (page - 1) * limit。
/// 边界校验（page >= 1, 1 <= limit <= 100）发生在 DTO 层，
/// 这里的 offset 仅做下限保护。
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl Default for PageRequest {
    /// 默认第一页 10 条，按事件时间倒序
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl PageRequest {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page,
            limit,
            ..Default::default()
        }
    }

    /// 数据库查询的 OFFSET
    pub fn offset(&self) -> i64 {
        (self.page - 1).max(0) * self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_has_no_where_clause() {
        let filter = ActivityFilter::default();
        assert!(filter.is_empty());

        let (clause, bound) = filter.where_clause();
        assert_eq!(clause, "");
        assert_eq!(bound, 0);
    }

    #[test]
    fn test_single_condition() {
        let filter = ActivityFilter::for_user("u-001");
        assert!(!filter.is_empty());

        let (clause, bound) = filter.where_clause();
        assert_eq!(clause, "WHERE user_id = $1");
        assert_eq!(bound, 1);
    }

    #[test]
    fn test_conjunction_of_all_conditions() {
        let filter = ActivityFilter {
            user_id: Some("u-001".to_string()),
            activity_type: Some(ActivityType::Login),
            status: Some(ActivityStatus::Processed),
            session_id: Some("sess-1".to_string()),
            start_date: Some(Utc::now()),
            end_date: Some(Utc::now()),
        };

        let (clause, bound) = filter.where_clause();
        assert_eq!(
            clause,
            "WHERE user_id = $1 AND activity_type = $2 AND status = $3 \
             AND session_id = $4 AND timestamp >= $5 AND timestamp <= $6"
        );
        assert_eq!(bound, 6);
    }

    #[test]
    fn test_time_range_bounds_are_independent() {
        let filter = ActivityFilter {
            start_date: Some(Utc::now()),
            ..Default::default()
        };
        let (clause, _) = filter.where_clause();
        assert_eq!(clause, "WHERE timestamp >= $1");

        let filter = ActivityFilter {
            end_date: Some(Utc::now()),
            ..Default::default()
        };
        let (clause, _) = filter.where_clause();
        assert_eq!(clause, "WHERE timestamp <= $1");
    }

    #[test]
    fn test_placeholder_numbering_skips_absent_conditions() {
        // status 缺席时，session_id 的占位符应紧随 activity_type
        let filter = ActivityFilter {
            activity_type: Some(ActivityType::PageView),
            session_id: Some("sess-9".to_string()),
            ..Default::default()
        };

        let (clause, bound) = filter.where_clause();
        assert_eq!(clause, "WHERE activity_type = $1 AND session_id = $2");
        assert_eq!(bound, 2);
    }

    #[test]
    fn test_page_request_offset() {
        assert_eq!(PageRequest::new(1, 10).offset(), 0);
        assert_eq!(PageRequest::new(2, 10).offset(), 10);
        assert_eq!(PageRequest::new(5, 20).offset(), 80);
        // 下限保护：page 0 不会产生负 offset
        assert_eq!(PageRequest::new(0, 10).offset(), 0);
    }

    #[test]
    fn test_default_sort_is_timestamp_desc() {
        let page = PageRequest::default();
        assert_eq!(page.sort_by, SortField::Timestamp);
        assert_eq!(page.sort_order, SortOrder::Desc);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 10);
    }

    #[test]
    fn test_sort_field_columns() {
        assert_eq!(SortField::Timestamp.column(), "timestamp");
        assert_eq!(SortField::CreatedAt.column(), "created_at");
        assert_eq!(SortField::ActivityType.column(), "activity_type");
        assert_eq!(SortOrder::Asc.sql(), "ASC");
        assert_eq!(SortOrder::Desc.sql(), "DESC");
    }

    #[test]
    fn test_sort_field_parses_camel_case() {
        // 查询串中的 sortBy 取值与枚举的 camelCase 对应
        let field: SortField = serde_json::from_str("\"createdAt\"").unwrap();
        assert_eq!(field, SortField::CreatedAt);

        // 白名单之外的字段直接拒绝
        let result: Result<SortField, _> = serde_json::from_str("\"password\"");
        assert!(result.is_err());
    }
}
