//! 活动领域模型
//!
//! 定义用户行为活动的实体、封闭枚举与处理状态机。所有进入管道的活动
//! 都在构造期完成校验；总线传输与存储共用同一 serde 表示
//! （camelCase 字段、枚举字符串、ISO-8601 时间戳），保证序列化往返无损。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ActivityError;

// ---------------------------------------------------------------------------
// ActivityType / ActivityStatus — 封闭枚举
// ---------------------------------------------------------------------------

/// 活动类型
///
/// 封闭集合：反序列化遇到集合之外的取值直接失败，
/// 存储层通过 sqlx::Type 以同样的字符串形式读写，未知值在读取时同样被拒绝。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    Login,
    Logout,
    PageView,
    ButtonClick,
    FormSubmit,
    ApiCall,
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 与 serde 的 SCREAMING_SNAKE_CASE 保持一致，
        // 便于在日志、幂等键和统计表中统一引用
        let s = match self {
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::PageView => "PAGE_VIEW",
            Self::ButtonClick => "BUTTON_CLICK",
            Self::FormSubmit => "FORM_SUBMIT",
            Self::ApiCall => "API_CALL",
        };
        write!(f, "{s}")
    }
}

/// 活动处理状态
///
/// 状态迁移单向：PENDING -> PROCESSED（成功终态）或 PENDING -> FAILED
/// （失败终态）。终态之后没有任何合法迁移。
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityStatus {
    #[default]
    Pending,
    Processed,
    Failed,
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Metadata — 有界的类型化键值映射
// ---------------------------------------------------------------------------

/// 元数据值
///
/// 只允许标量取值，数组/嵌套对象在反序列化阶段即被拒绝，
/// 防止任意嵌套结构演化成隐式 schema。
/// untagged 按声明顺序匹配，Bool 必须排在数值类型之前。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// 单个活动允许的元数据条目上限
pub const METADATA_MAX_ENTRIES: usize = 32;
/// 元数据键名的最大长度（字节）
pub const METADATA_MAX_KEY_LEN: usize = 64;

/// 活动元数据
///
/// BTreeMap 保证序列化输出键序稳定，便于测试与日志比对。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// 插入一个键值，超出容量或键名超长时拒绝
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: MetadataValue,
    ) -> Result<(), ActivityError> {
        let key = key.into();
        if key.len() > METADATA_MAX_KEY_LEN {
            return Err(ActivityError::Validation(format!(
                "元数据键名超过 {METADATA_MAX_KEY_LEN} 字节: {key}"
            )));
        }
        if !self.0.contains_key(&key) && self.0.len() >= METADATA_MAX_ENTRIES {
            return Err(ActivityError::Validation(format!(
                "元数据条目超过上限 {METADATA_MAX_ENTRIES}"
            )));
        }
        self.0.insert(key, value);
        Ok(())
    }

    /// 浅合并：patch 中的键覆盖已有同名键，合并结果仍受容量约束
    pub fn merge(&mut self, patch: Metadata) -> Result<(), ActivityError> {
        for (key, value) in patch.0 {
            self.insert(key, value)?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 校验容量约束
    ///
    /// serde transparent 反序列化不会触发 insert 的检查，
    /// 在消息/请求边界处显式调用本方法兜底。
    pub fn validate(&self) -> Result<(), ActivityError> {
        if self.0.len() > METADATA_MAX_ENTRIES {
            return Err(ActivityError::Validation(format!(
                "元数据条目超过上限 {METADATA_MAX_ENTRIES}"
            )));
        }
        if let Some(key) = self.0.keys().find(|k| k.len() > METADATA_MAX_KEY_LEN) {
            return Err(ActivityError::Validation(format!(
                "元数据键名超过 {METADATA_MAX_KEY_LEN} 字节: {key}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Activity — 活动实体
// ---------------------------------------------------------------------------

/// 用户行为活动实体
///
/// 管道中流动的工作单元：发布时以 PENDING 创建（尚无 id），
/// 首次持久化时由存储分配 id，消费侧对每次投递恰好执行一次状态迁移。
/// 管道自身从不删除活动，删除是外部运维操作。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// 存储分配的标识，首次持久化之前为 None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub user_id: String,
    pub activity_type: ActivityType,
    #[serde(default)]
    pub metadata: Metadata,
    /// 事件发生时间（客户端或服务端指定）
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// 当且仅当状态为 PROCESSED 时非空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    /// 以 PENDING 状态构造新活动，任何副作用之前完成校验
    pub fn new(
        user_id: impl Into<String>,
        activity_type: ActivityType,
        metadata: Metadata,
    ) -> Result<Self, ActivityError> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(ActivityError::Validation(
                "userId 不能为空".to_string(),
            ));
        }
        metadata.validate()?;

        let now = Utc::now();
        Ok(Self {
            id: None,
            user_id,
            activity_type,
            metadata,
            timestamp: now,
            status: ActivityStatus::Pending,
            ip_address: None,
            user_agent: None,
            session_id: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// 附加来源上下文（IP、User-Agent、会话标识）
    pub fn with_context(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
        session_id: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self.session_id = session_id;
        self
    }

    /// 迁移到 PROCESSED 终态，设置 processed_at
    ///
    /// 只允许从 PENDING 迁移；对终态的二次迁移是编程错误，显式拒绝
    /// 而非静默忽略，让调用方的状态机缺陷尽早暴露。
    pub fn mark_processed(&mut self) -> Result<(), ActivityError> {
        if self.status != ActivityStatus::Pending {
            return Err(ActivityError::IllegalState(format!(
                "无法从 {} 迁移到 PROCESSED",
                self.status
            )));
        }
        let now = Utc::now();
        self.status = ActivityStatus::Processed;
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// 迁移到 FAILED 终态，processed_at 保持为空
    pub fn mark_failed(&mut self) -> Result<(), ActivityError> {
        if self.status != ActivityStatus::Pending {
            return Err(ActivityError::IllegalState(format!(
                "无法从 {} 迁移到 FAILED",
                self.status
            )));
        }
        self.status = ActivityStatus::Failed;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 浅合并元数据并刷新 updated_at
    pub fn merge_metadata(&mut self, patch: Metadata) -> Result<(), ActivityError> {
        self.metadata.merge(patch)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 幂等键：用户 + 事件时间 + 类型唯一标识一个逻辑事件
    ///
    /// at-least-once 投递下同一消息可能重复到达，
    /// 消费侧在应用 PROCESSED 迁移之前以此键去重。
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.user_id,
            self.timestamp.timestamp_millis(),
            self.activity_type
        )
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
