//! Redis 缓存管理模块
//!
//! 提供 Redis 连接管理和幂等标记相关的缓存操作封装。
//! 消费侧用 SET NX + TTL 在处理前对重复投递去重，worker 是
//! 本模块连接的唯一属主，其他组件不直接触碰连接生命周期。

use crate::config::RedisConfig;
use crate::error::{ActivityError, Result};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Redis 缓存客户端
#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    /// 创建 Redis 客户端
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self { client })
    }

    /// 获取连接
    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(ActivityError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(ActivityError::from)
    }

    /// 检查键是否存在
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    /// 原子性地仅在 key 不存在时设置值，并指定 TTL
    ///
    /// 基于 Redis SET NX EX 实现，用于分布式幂等检查。
    /// 返回 true 表示设置成功（key 此前不存在），false 表示 key 已存在。
    pub async fn set_nx<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)
            .map_err(|e| ActivityError::Internal(format!("缓存序列化失败: {e}")))?;

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(serialized)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // 需要本地 Redis
    async fn test_set_nx_idempotency() {
        let cache = Cache::new(&RedisConfig::default()).unwrap();
        let key = "activity:test:set_nx";

        let first = cache.set_nx(key, &"1", Duration::from_secs(5)).await.unwrap();
        let second = cache.set_nx(key, &"1", Duration::from_secs(5)).await.unwrap();

        assert!(first);
        assert!(!second);
        assert!(cache.exists(key).await.unwrap());
    }
}
