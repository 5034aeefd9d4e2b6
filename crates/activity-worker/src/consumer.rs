//! Kafka 消费者与消息分发
//!
//! 将 Kafka 消息解码为活动实体，经前置校验与幂等检查后交给
//! ActivityProcessor 持久化。瞬时故障按退避策略就地重试，
//! 重试耗尽或无法解码的消息发送到死信队列；
//! 校验不通过的消息丢弃并告警，不重试。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use activity_shared::activity::Activity;
use activity_shared::config::AppConfig;
use activity_shared::dlq::DlqProducer;
use activity_shared::error::ActivityError;
use activity_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use activity_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::WorkerError;
use crate::processor::ActivityProcessor;

/// 活动事件消费者
///
/// 组合 KafkaConsumer（消息拉取）、ActivityProcessor（状态迁移与持久化）
/// 和 DlqProducer（死信投递）三个组件，形成完整的消费管道。
pub struct ActivityConsumer {
    consumer: KafkaConsumer,
    processor: Arc<ActivityProcessor>,
    dlq: Arc<DlqProducer>,
    retry_policy: RetryPolicy,
}

impl ActivityConsumer {
    pub fn new(
        config: &AppConfig,
        processor: Arc<ActivityProcessor>,
        dlq: Arc<DlqProducer>,
        retry_policy: RetryPolicy,
    ) -> Result<Self, WorkerError> {
        let consumer = KafkaConsumer::new(&config.kafka, None)?;
        Ok(Self {
            consumer,
            processor,
            dlq,
            retry_policy,
        })
    }

    /// 启动消费循环：connect -> subscribe -> start，直到收到 shutdown 信号
    ///
    /// handler 内的错误全部就地消化（记录日志/送 DLQ），
    /// 永远向消费循环返回 Ok——单条坏消息不能卡死分区。
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        self.consumer.connect().await?;
        self.consumer.subscribe(&[topics::USER_ACTIVITIES])?;

        info!(topic = topics::USER_ACTIVITIES, "活动事件消费者已启动");

        let processor = self.processor;
        let dlq = self.dlq;
        let retry_policy = self.retry_policy;

        self.consumer
            .start(shutdown, |msg| {
                let processor = &processor;
                let dlq = &dlq;
                let retry_policy = &retry_policy;
                async move {
                    match handle_message(processor, dlq, retry_policy, &msg).await {
                        Ok(()) => {}
                        Err(WorkerError::AlreadyProcessed { key }) => {
                            debug!(idempotency_key = %key, "重复投递，已跳过");
                        }
                        Err(e) => {
                            error!(
                                error = %e,
                                topic = %msg.topic,
                                partition = msg.partition,
                                offset = msg.offset,
                                "处理活动事件失败"
                            );
                        }
                    }
                    Ok(())
                }
            })
            .await?;

        info!("活动事件消费者已停止");
        Ok(())
    }
}

/// 处理单条 Kafka 消息的完整流程
///
/// 拆分为独立函数而非方法，便于在测试中直接调用而无需构造完整的
/// Consumer。流程：反序列化 -> 前置校验 -> 幂等检查 -> 带重试的处理
/// -> 幂等标记。处理必须完整结束后才返回，消费循环才会取下一条，
/// 这是分区内保序的前提。
pub async fn handle_message(
    processor: &ActivityProcessor,
    dlq: &DlqProducer,
    retry_policy: &RetryPolicy,
    msg: &ConsumerMessage,
) -> Result<(), WorkerError> {
    // 1. 反序列化。无法解码的消息重试没有意义，直接送死信队列存证
    let activity: Activity = match msg.deserialize_payload() {
        Ok(activity) => activity,
        Err(e) => {
            warn!(
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                error = %e,
                "消息解码失败，发送到死信队列"
            );

            let message_id = msg
                .key
                .clone()
                .unwrap_or_else(|| format!("{}:{}", msg.partition, msg.offset));
            let payload = String::from_utf8_lossy(&msg.payload);
            if let Err(dlq_err) = dlq
                .send_to_dlq(&message_id, &msg.topic, &payload, &e.to_string())
                .await
            {
                error!(error = %dlq_err, "发送死信队列失败，消息可能丢失");
            }
            return Err(WorkerError::Shared(e));
        }
    };

    info!(
        user_id = %activity.user_id,
        activity_type = %activity.activity_type,
        partition = msg.partition,
        offset = msg.offset,
        "收到活动事件"
    );

    // 2. 前置校验：不通过的活动丢弃并告警，不进入重试或 DLQ
    if let Err(e) = processor.validate(&activity) {
        warn!(
            user_id = %activity.user_id,
            error = %e,
            "活动校验未通过，丢弃"
        );
        return Err(e);
    }

    // 3. 幂等检查：at-least-once 重复投递在此被拦截
    if processor.is_processed(&activity).await? {
        return Err(WorkerError::AlreadyProcessed {
            key: activity.idempotency_key(),
        });
    }

    // 4. 带重试的处理：仅瞬时故障重试，退避间隔按策略递增
    let result = retry_with_policy(
        retry_policy,
        "process_activity",
        ActivityError::is_retryable,
        || processor.process(activity.clone()),
    )
    .await;

    match result {
        Ok(saved) => {
            // 5. 写入幂等标记。失败只告警：最坏情况是一次可容忍的重复处理
            if let Err(e) = processor.mark_processed(&activity).await {
                warn!(
                    idempotency_key = %activity.idempotency_key(),
                    error = %e,
                    "幂等标记写入失败，后续可能重复处理"
                );
            }

            info!(
                id = ?saved.id,
                user_id = %saved.user_id,
                status = %saved.status,
                "活动事件处理完成"
            );
            Ok(())
        }
        Err(e) => {
            error!(
                user_id = %activity.user_id,
                error = %e,
                "重试耗尽，活动发送到死信队列"
            );

            if let Err(dlq_err) = dlq.send_activity_to_dlq(&activity, &e.to_string()).await {
                error!(error = %dlq_err, "发送死信队列失败，消息可能丢失");
            }
            Err(WorkerError::Shared(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use activity_service::repository::{
        ActivityFilter, ActivityRepositoryTrait, PageRequest,
    };
    use activity_shared::activity::{ActivityType, Metadata};
    use activity_shared::cache::Cache;
    use activity_shared::config::{KafkaConfig, RedisConfig};
    use activity_shared::error::Result as SharedResult;
    use activity_shared::kafka::{KafkaProducer, topics};

    /// 计数仓储：只记录 save 被调用的次数
    #[derive(Default)]
    struct CountingRepository {
        saves: AtomicUsize,
    }

    #[async_trait]
    impl ActivityRepositoryTrait for CountingRepository {
        async fn save(&self, activity: Activity) -> SharedResult<Activity> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(activity)
        }

        async fn find_by_id(&self, _id: i64) -> SharedResult<Option<Activity>> {
            Ok(None)
        }

        async fn find_all(
            &self,
            _filter: &ActivityFilter,
            _page: &PageRequest,
        ) -> SharedResult<(Vec<Activity>, i64)> {
            Ok((Vec::new(), 0))
        }

        async fn count_by_filters(&self, _filter: &ActivityFilter) -> SharedResult<i64> {
            Ok(0)
        }

        async fn delete(&self, _id: i64) -> SharedResult<bool> {
            Ok(false)
        }
    }

    fn make_fixture() -> (Arc<CountingRepository>, ActivityProcessor, DlqProducer) {
        let repo = Arc::new(CountingRepository::default());
        let cache = Cache::new(&RedisConfig::default()).expect("Redis client 创建失败");
        let processor = ActivityProcessor::new(repo.clone(), cache);

        // 未连接的生产者：DLQ 投递会失败并只记录日志，测试不触网
        let kafka_config = KafkaConfig {
            brokers: "127.0.0.1:1".to_string(),
            connect_timeout_ms: 200,
            message_timeout_ms: 200,
            ..KafkaConfig::default()
        };
        let producer = KafkaProducer::new(&kafka_config).unwrap();
        let dlq = DlqProducer::new(producer, "activity-worker", RetryPolicy::default());

        (repo, processor, dlq)
    }

    /// 构造测试用的 ConsumerMessage，key 与发布侧一致取用户标识
    fn make_test_message(activity: &Activity) -> ConsumerMessage {
        let payload = serde_json::to_vec(activity).expect("序列化测试活动失败");
        ConsumerMessage {
            topic: topics::USER_ACTIVITIES.to_string(),
            partition: 0,
            offset: 1,
            key: Some(activity.user_id.clone()),
            payload,
            timestamp: Some(activity.timestamp.timestamp_millis()),
        }
    }

    /// 消息 key 必须等于用户标识——这是同一用户事件分区保序的前提
    #[test]
    fn test_message_key_is_user_id() {
        let activity = Activity::new("u-001", ActivityType::Login, Metadata::new()).unwrap();
        let msg = make_test_message(&activity);

        assert_eq!(msg.key.as_deref(), Some("u-001"));
    }

    /// 线上消息能完整还原为活动实体
    #[test]
    fn test_message_round_trip() {
        let activity = Activity::new("u-002", ActivityType::PageView, Metadata::new())
            .unwrap()
            .with_context(None, None, Some("sess-7".to_string()));
        let msg = make_test_message(&activity);

        let restored: Activity = msg.deserialize_payload().expect("反序列化失败");
        assert_eq!(restored, activity);
    }

    /// 畸形负载的反序列化以 Validation 错误失败
    #[test]
    fn test_malformed_payload_fails_validation() {
        let msg = ConsumerMessage {
            topic: topics::USER_ACTIVITIES.to_string(),
            partition: 0,
            offset: 9,
            key: None,
            payload: b"{not valid json".to_vec(),
            timestamp: None,
        };

        let result: Result<Activity, _> = msg.deserialize_payload();
        assert!(matches!(result, Err(ActivityError::Validation(_))));
    }

    /// 无法解码的消息：返回错误且不触碰仓储
    #[tokio::test]
    async fn test_handle_message_decode_failure() {
        let (repo, processor, dlq) = make_fixture();

        let msg = ConsumerMessage {
            topic: topics::USER_ACTIVITIES.to_string(),
            partition: 1,
            offset: 5,
            key: None,
            payload: b"garbage".to_vec(),
            timestamp: None,
        };

        let err = handle_message(&processor, &dlq, &RetryPolicy::default(), &msg)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WorkerError::Shared(ActivityError::Validation(_))
        ));
        assert_eq!(repo.saves.load(Ordering::SeqCst), 0);
    }

    /// 前置校验不通过的活动被丢弃：不重试、不落库
    #[tokio::test]
    async fn test_handle_message_drops_invalid_activity() {
        let (repo, processor, dlq) = make_fixture();

        // 空白 userId 的线上消息（绕过实体构造的语义校验）
        let json = r#"{
            "userId": " ",
            "activityType": "LOGIN",
            "timestamp": "2025-06-01T08:00:00Z",
            "createdAt": "2025-06-01T08:00:00Z",
            "updatedAt": "2025-06-01T08:00:00Z"
        }"#;
        let msg = ConsumerMessage {
            topic: topics::USER_ACTIVITIES.to_string(),
            partition: 0,
            offset: 3,
            key: Some(" ".to_string()),
            payload: json.as_bytes().to_vec(),
            timestamp: None,
        };

        let err = handle_message(&processor, &dlq, &RetryPolicy::default(), &msg)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Invalid { .. }));
        assert_eq!(repo.saves.load(Ordering::SeqCst), 0);
    }
}
