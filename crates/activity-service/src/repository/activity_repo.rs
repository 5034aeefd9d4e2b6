//! 活动仓储的 PostgreSQL 实现
//!
//! 单表 activities，一行一个活动。枚举列以字符串存储，
//! 读取时经 sqlx::Type 校验，集合之外的取值在解码阶段即失败；
//! 元数据以 JSONB 存储，读取时同样拒绝不符合标量约束的内容。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use activity_shared::activity::{Activity, ActivityStatus, ActivityType, Metadata};
use activity_shared::error::{ActivityError, Result};

use super::filter::{ActivityFilter, PageRequest};
use super::traits::ActivityRepositoryTrait;

/// 活动仓储
pub struct ActivityRepository {
    pool: PgPool,
}

/// activities 表的行结构
#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: i64,
    user_id: String,
    activity_type: ActivityType,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
    status: ActivityStatus,
    ip_address: Option<String>,
    user_agent: Option<String>,
    session_id: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for Activity {
    type Error = ActivityError;

    fn try_from(row: ActivityRow) -> Result<Self> {
        // 元数据 fail-closed：历史数据中混入数组/嵌套对象时拒绝读出
        let metadata: Metadata = serde_json::from_value(row.metadata)
            .map_err(|e| ActivityError::Internal(format!("存储中的元数据非法: {e}")))?;

        Ok(Activity {
            id: Some(row.id),
            user_id: row.user_id,
            activity_type: row.activity_type,
            metadata,
            timestamp: row.timestamp,
            status: row.status,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            session_id: row.session_id,
            processed_at: row.processed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// SELECT 列清单，insert/update 的 RETURNING 与查询共用
const COLUMNS: &str = "id, user_id, activity_type, metadata, timestamp, status, \
     ip_address, user_agent, session_id, processed_at, created_at, updated_at";

impl ActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn metadata_json(activity: &Activity) -> Result<serde_json::Value> {
        serde_json::to_value(&activity.metadata)
            .map_err(|e| ActivityError::Internal(format!("序列化元数据失败: {e}")))
    }

    /// 插入新活动，id 与 created_at/updated_at 由存储分配
    async fn insert(&self, activity: Activity) -> Result<Activity> {
        let metadata = Self::metadata_json(&activity)?;

        let sql = format!(
            r#"
            INSERT INTO activities (
                user_id, activity_type, metadata, timestamp, status,
                ip_address, user_agent, session_id, processed_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, ActivityRow>(&sql)
            .bind(&activity.user_id)
            .bind(activity.activity_type)
            .bind(metadata)
            .bind(activity.timestamp)
            .bind(activity.status)
            .bind(&activity.ip_address)
            .bind(&activity.user_agent)
            .bind(&activity.session_id)
            .bind(activity.processed_at)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    /// 按 id 全量替换可变字段，id 不存在时返回 NotFound
    async fn update(&self, id: i64, activity: Activity) -> Result<Activity> {
        let metadata = Self::metadata_json(&activity)?;

        let sql = format!(
            r#"
            UPDATE activities SET
                user_id = $2, activity_type = $3, metadata = $4, timestamp = $5,
                status = $6, ip_address = $7, user_agent = $8, session_id = $9,
                processed_at = $10, updated_at = NOW()
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, ActivityRow>(&sql)
            .bind(id)
            .bind(&activity.user_id)
            .bind(activity.activity_type)
            .bind(metadata)
            .bind(activity.timestamp)
            .bind(activity.status)
            .bind(&activity.ip_address)
            .bind(&activity.user_agent)
            .bind(&activity.session_id)
            .bind(activity.processed_at)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(ActivityError::NotFound {
                entity: "Activity".to_string(),
                id: id.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ActivityRepositoryTrait for ActivityRepository {
    async fn save(&self, activity: Activity) -> Result<Activity> {
        match activity.id {
            Some(id) => self.update(id, activity).await,
            None => self.insert(activity).await,
        }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Activity>> {
        let sql = format!("SELECT {COLUMNS} FROM activities WHERE id = $1");

        let row = sqlx::query_as::<_, ActivityRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Activity::try_from).transpose()
    }

    async fn find_all(
        &self,
        filter: &ActivityFilter,
        page: &PageRequest,
    ) -> Result<(Vec<Activity>, i64)> {
        let (where_clause, bound) = filter.where_clause();

        // 统计总数
        let count_sql = format!("SELECT COUNT(*) FROM activities {where_clause}");
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);

        if let Some(ref user_id) = filter.user_id {
            count_query = count_query.bind(user_id);
        }
        if let Some(activity_type) = filter.activity_type {
            count_query = count_query.bind(activity_type);
        }
        if let Some(status) = filter.status {
            count_query = count_query.bind(status);
        }
        if let Some(ref session_id) = filter.session_id {
            count_query = count_query.bind(session_id);
        }
        if let Some(start_date) = filter.start_date {
            count_query = count_query.bind(start_date);
        }
        if let Some(end_date) = filter.end_date {
            count_query = count_query.bind(end_date);
        }

        let (total,) = count_query.fetch_one(&self.pool).await?;

        if total == 0 {
            return Ok((Vec::new(), 0));
        }

        // 查询数据页。排序列名来自白名单枚举，不存在注入面
        let data_sql = format!(
            "SELECT {COLUMNS} FROM activities {where_clause} \
             ORDER BY {} {} LIMIT ${} OFFSET ${}",
            page.sort_by.column(),
            page.sort_order.sql(),
            bound + 1,
            bound + 2,
        );

        let mut data_query = sqlx::query_as::<_, ActivityRow>(&data_sql);

        if let Some(ref user_id) = filter.user_id {
            data_query = data_query.bind(user_id);
        }
        if let Some(activity_type) = filter.activity_type {
            data_query = data_query.bind(activity_type);
        }
        if let Some(status) = filter.status {
            data_query = data_query.bind(status);
        }
        if let Some(ref session_id) = filter.session_id {
            data_query = data_query.bind(session_id);
        }
        if let Some(start_date) = filter.start_date {
            data_query = data_query.bind(start_date);
        }
        if let Some(end_date) = filter.end_date {
            data_query = data_query.bind(end_date);
        }

        let rows = data_query
            .bind(page.limit)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let activities = rows
            .into_iter()
            .map(Activity::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok((activities, total))
    }

    async fn count_by_filters(&self, filter: &ActivityFilter) -> Result<i64> {
        let (where_clause, _) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM activities {where_clause}");

        let mut query = sqlx::query_as::<_, (i64,)>(&sql);

        if let Some(ref user_id) = filter.user_id {
            query = query.bind(user_id);
        }
        if let Some(activity_type) = filter.activity_type {
            query = query.bind(activity_type);
        }
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(ref session_id) = filter.session_id {
            query = query.bind(session_id);
        }
        if let Some(start_date) = filter.start_date {
            query = query.bind(start_date);
        }
        if let Some(end_date) = filter.end_date {
            query = query.bind(end_date);
        }

        let (total,) = query.fetch_one(&self.pool).await?;
        Ok(total)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM activities WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// 集成测试（需要已应用迁移的本地 PostgreSQL）
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use activity_shared::config::DatabaseConfig;
    use activity_shared::database::Database;

    async fn test_repo() -> ActivityRepository {
        let db = Database::connect(&DatabaseConfig::default())
            .await
            .expect("连接测试数据库失败");
        ActivityRepository::new(db.pool().clone())
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_insert_then_find_round_trip() {
        let repo = test_repo().await;

        let activity =
            Activity::new("it-user-1", ActivityType::Login, Metadata::new()).unwrap();
        let saved = repo.save(activity).await.unwrap();

        let id = saved.id.expect("插入后应分配 id");
        let found = repo.find_by_id(id).await.unwrap().expect("应能按 id 查到");

        assert_eq!(found.user_id, "it-user-1");
        assert_eq!(found.activity_type, ActivityType::Login);
        assert_eq!(found.status, ActivityStatus::Pending);

        assert!(repo.delete(id).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_update_missing_id_returns_not_found() {
        let repo = test_repo().await;

        let mut activity =
            Activity::new("it-user-2", ActivityType::Logout, Metadata::new()).unwrap();
        activity.id = Some(i64::MAX);

        let err = repo.save(activity).await.unwrap_err();
        assert!(matches!(err, ActivityError::NotFound { .. }));
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_find_all_total_matches_count_by_filters() {
        let repo = test_repo().await;

        let filter = ActivityFilter::for_user("it-user-1");
        let (_, total) = repo
            .find_all(&filter, &PageRequest::default())
            .await
            .unwrap();
        let count = repo.count_by_filters(&filter).await.unwrap();

        assert_eq!(total, count);
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_status_filter_conjunction() {
        let repo = test_repo().await;
        let user_id = format!("it-filter-{}", chrono::Utc::now().timestamp_millis());

        // 3 条 FAILED + 7 条 PROCESSED
        let mut ids = Vec::new();
        for i in 0..10 {
            let mut activity =
                Activity::new(&user_id, ActivityType::PageView, Metadata::new()).unwrap();
            if i < 3 {
                activity.mark_failed().unwrap();
            } else {
                activity.mark_processed().unwrap();
            }
            ids.push(repo.save(activity).await.unwrap().id.unwrap());
        }

        let filter = ActivityFilter {
            user_id: Some(user_id),
            status: Some(ActivityStatus::Failed),
            ..Default::default()
        };
        let (data, total) = repo
            .find_all(&filter, &PageRequest::new(1, 10))
            .await
            .unwrap();

        assert_eq!(data.len(), 3);
        assert_eq!(total, 3);
        assert!(data.iter().all(|a| a.status == ActivityStatus::Failed));
        // 与相同过滤条件的计数查询一致
        assert_eq!(repo.count_by_filters(&filter).await.unwrap(), 3);

        for id in ids {
            repo.delete(id).await.unwrap();
        }
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_delete_is_idempotent() {
        let repo = test_repo().await;

        let activity =
            Activity::new("it-user-3", ActivityType::ApiCall, Metadata::new()).unwrap();
        let saved = repo.save(activity).await.unwrap();
        let id = saved.id.unwrap();

        assert!(repo.delete(id).await.unwrap());
        // 第二次删除同一 id 返回 false 而非报错
        assert!(!repo.delete(id).await.unwrap());
    }
}
