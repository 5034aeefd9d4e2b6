//! 活动事件发布器
//!
//! 将活动实体序列化为线上格式并发送到活动 topic。
//! 消息 key 固定取用户标识：同一用户的所有事件落在同一分区，
//! 消费侧因此能按发布顺序观察到该用户的事件；跨用户的全局顺序不保证。

use activity_shared::activity::Activity;
use activity_shared::config::KafkaConfig;
use activity_shared::error::{ActivityError, Result};
use activity_shared::kafka::{KafkaProducer, topics};
use tracing::{debug, info};

/// 活动发布器
///
/// 持有进程内唯一的生产者连接，连接生命周期由本组件管理，
/// 其他组件只通过 publish/publish_batch 使用它。
pub struct ActivityPublisher {
    producer: KafkaProducer,
}

impl ActivityPublisher {
    /// 创建发布器（未连接，发送前必须先 connect 成功）
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        Ok(Self {
            producer: KafkaProducer::new(config)?,
        })
    }

    /// 建立总线连接
    pub async fn connect(&mut self) -> Result<()> {
        self.producer.connect().await?;
        info!(topic = topics::USER_ACTIVITIES, "活动发布器已连接");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.producer.is_connected()
    }

    /// 发布单个活动，返回 (partition, offset) 投递元数据
    pub async fn publish(&self, activity: &Activity) -> Result<(i32, i64)> {
        let (partition, offset) = self
            .producer
            .send_json(topics::USER_ACTIVITIES, &activity.user_id, activity)
            .await?;

        debug!(
            user_id = %activity.user_id,
            activity_type = %activity.activity_type,
            partition,
            offset,
            "活动已发布"
        );
        Ok((partition, offset))
    }

    /// 批量发布：一次请求提交整批，每条消息按各自的用户标识独立分区
    ///
    /// 批内任一条失败即整批报 Delivery 错误，不提供部分成功语义。
    pub async fn publish_batch(&self, activities: &[Activity]) -> Result<Vec<(i32, i64)>> {
        let messages = activities
            .iter()
            .map(|activity| {
                let payload = serde_json::to_vec(activity)
                    .map_err(|e| ActivityError::Internal(format!("序列化活动失败: {e}")))?;
                Ok((activity.user_id.clone(), payload))
            })
            .collect::<Result<Vec<_>>>()?;

        let deliveries = self
            .producer
            .send_batch(topics::USER_ACTIVITIES, &messages)
            .await?;

        info!(count = deliveries.len(), "批量活动已发布");
        Ok(deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use activity_shared::activity::{ActivityType, Metadata};

    fn test_config() -> KafkaConfig {
        KafkaConfig {
            brokers: "127.0.0.1:1".to_string(),
            connect_timeout_ms: 200,
            message_timeout_ms: 200,
            ..KafkaConfig::default()
        }
    }

    #[tokio::test]
    async fn test_publish_refused_before_connect() {
        let publisher = ActivityPublisher::new(&test_config()).unwrap();
        assert!(!publisher.is_connected());

        let activity = Activity::new("u-001", ActivityType::Login, Metadata::new()).unwrap();

        let err = publisher.publish(&activity).await.unwrap_err();
        assert!(matches!(err, ActivityError::IllegalState(_)));

        let err = publisher.publish_batch(&[activity]).await.unwrap_err();
        assert!(matches!(err, ActivityError::IllegalState(_)));
    }

    #[tokio::test]
    async fn test_connect_fails_with_unreachable_broker() {
        let mut publisher = ActivityPublisher::new(&test_config()).unwrap();

        let err = publisher.connect().await.unwrap_err();
        assert!(matches!(err, ActivityError::Connection(_)));
        assert!(!publisher.is_connected());
    }
}
