//! 死信队列处理
//!
//! 活动处理失败且重试预算耗尽后，消息被发送到死信队列（DLQ）。
//! DLQ 消费者按退避计划把到期的消息发回原始 topic 重新投递，
//! 超过上限的消息记录日志等待人工介入。除被延后的这条消息外，
//! 分区内其余消息的顺序不受影响。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::activity::Activity;
use crate::config::AppConfig;
use crate::error::ActivityError;
use crate::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer, topics};
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// DeadLetterMessage — 死信消息信封
// ---------------------------------------------------------------------------

/// 死信消息信封
///
/// 包装原始消息，附加失败原因、重试次数等元数据，
/// 便于 DLQ 消费时决定重新投递还是永久归档。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息标识（活动的幂等键）
    pub message_id: String,
    /// 原始 topic
    pub source_topic: String,
    /// 原始消息内容（JSON 字符串）
    pub payload: String,
    /// 失败原因
    pub error: String,
    /// 已重试次数
    pub retry_count: u32,
    /// 最大重试次数
    pub max_retries: u32,
    /// 首次失败时间
    pub first_failed_at: DateTime<Utc>,
    /// 最近失败时间
    pub last_failed_at: DateTime<Utc>,
    /// 下次重试时间（None 表示不再重试）
    pub next_retry_at: Option<DateTime<Utc>>,
    /// 来源服务
    pub source_service: String,
}

impl DeadLetterMessage {
    /// 创建新的死信消息
    ///
    /// 首次进入 DLQ 时 retry_count 为 0，next_retry_at 设为当前时间，
    /// 让 DLQ 消费者首轮扫描即可尝试重新投递。
    pub fn new(
        message_id: impl Into<String>,
        source_topic: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
        max_retries: u32,
        source_service: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_id: message_id.into(),
            source_topic: source_topic.into(),
            payload: payload.into(),
            error: error.into(),
            retry_count: 0,
            max_retries,
            first_failed_at: now,
            last_failed_at: now,
            next_retry_at: Some(now),
            source_service: source_service.into(),
        }
    }

    /// 是否还有重试机会
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 增加重试计数并更新元数据
    ///
    /// 每次重试失败后调用：更新错误与时间戳，并按退避策略计算下一次
    /// 重试时间；已达上限则 next_retry_at 置空。
    pub fn increment_retry(&mut self, error: &str, retry_policy: &RetryPolicy) {
        self.retry_count += 1;
        self.error = error.to_string();
        self.last_failed_at = Utc::now();

        if self.should_retry() {
            let delay = retry_policy.delay_for_attempt(self.retry_count);
            self.next_retry_at =
                Some(self.last_failed_at + chrono::Duration::from_std(delay).unwrap_or_default());
        } else {
            self.next_retry_at = None;
        }
    }
}

// ---------------------------------------------------------------------------
// DlqProducer — 将失败消息发送到死信队列
// ---------------------------------------------------------------------------

/// DLQ 生产者
///
/// worker 在活动处理失败且重试耗尽后调用此组件把消息写入死信队列，
/// 而非直接丢弃，保证消息最终被重试或人工处理。
pub struct DlqProducer {
    producer: KafkaProducer,
    source_service: String,
    retry_policy: RetryPolicy,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, source_service: &str, retry_policy: RetryPolicy) -> Self {
        Self {
            producer,
            source_service: source_service.to_string(),
            retry_policy,
        }
    }

    /// 将失败消息发送到死信队列
    pub async fn send_to_dlq(
        &self,
        message_id: &str,
        source_topic: &str,
        payload: &str,
        error: &str,
    ) -> Result<(), ActivityError> {
        let dlq_msg = DeadLetterMessage::new(
            message_id,
            source_topic,
            payload,
            error,
            self.retry_policy.max_retries,
            &self.source_service,
        );

        self.producer
            .send_json(topics::DEAD_LETTER_QUEUE, message_id, &dlq_msg)
            .await?;

        warn!(message_id, source_topic, error, "消息已发送到死信队列");

        Ok(())
    }

    /// 从活动实体构造死信消息并发送
    ///
    /// 便捷方法：以幂等键作为 message_id，把整个活动序列化为 payload。
    /// 活动管道只有一个业务 topic，source_topic 固定为 USER_ACTIVITIES。
    pub async fn send_activity_to_dlq(
        &self,
        activity: &Activity,
        error: &str,
    ) -> Result<(), ActivityError> {
        let payload = serde_json::to_string(activity)
            .map_err(|e| ActivityError::Internal(format!("序列化活动失败: {e}")))?;

        self.send_to_dlq(
            &activity.idempotency_key(),
            topics::USER_ACTIVITIES,
            &payload,
            error,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// DlqConsumer — 处理死信队列消息
// ---------------------------------------------------------------------------

/// DLQ 消费者
///
/// 持续消费死信队列，对尚有重试机会且到达重试时间的消息重新投递到
/// 原始 topic；超过上限的消息记录日志以便人工介入。
pub struct DlqConsumer {
    consumer: KafkaConsumer,
    /// 将待重试的消息发回原始 topic
    retry_producer: KafkaProducer,
}

impl DlqConsumer {
    /// 创建 DLQ 消费者
    ///
    /// 使用 `.dlq` 后缀作为独立消费组，与业务消费者互不干扰
    pub fn new(config: &AppConfig, retry_producer: KafkaProducer) -> Result<Self, ActivityError> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("dlq"))?;

        Ok(Self {
            consumer,
            retry_producer,
        })
    }

    /// 启动 DLQ 消费循环：connect -> subscribe -> start
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<(), ActivityError> {
        self.consumer.connect().await?;
        self.consumer.subscribe(&[topics::DEAD_LETTER_QUEUE])?;

        info!(topic = topics::DEAD_LETTER_QUEUE, "DLQ 消费者已启动");

        let retry_producer = self.retry_producer.clone();

        self.consumer
            .start(shutdown, move |msg| {
                let producer = retry_producer.clone();
                async move { handle_dlq_message(&msg, &producer).await }
            })
            .await?;

        info!("DLQ 消费循环已退出");
        Ok(())
    }
}

/// 处理单条死信消息
///
/// 判断消息是否仍可重试且重试时间已到达：
/// - 是 → 将原始 payload 发回 source_topic，由业务消费者重新处理
/// - 否 → 记录错误日志，需要人工介入
async fn handle_dlq_message(
    msg: &ConsumerMessage,
    retry_producer: &KafkaProducer,
) -> Result<(), ActivityError> {
    let dlq_msg: DeadLetterMessage = msg.deserialize_payload()?;

    if dlq_msg.should_retry() {
        let now = Utc::now();
        if let Some(next_retry) = dlq_msg.next_retry_at
            && now >= next_retry
        {
            info!(
                message_id = %dlq_msg.message_id,
                source_topic = %dlq_msg.source_topic,
                retry_count = dlq_msg.retry_count,
                max_retries = dlq_msg.max_retries,
                "重试死信消息，发回原始 topic"
            );

            retry_producer
                .send(
                    &dlq_msg.source_topic,
                    &dlq_msg.message_id,
                    dlq_msg.payload.as_bytes(),
                )
                .await?;

            return Ok(());
        }

        // 重试时间未到，消息会在下次消费时再次检查
        info!(
            message_id = %dlq_msg.message_id,
            next_retry_at = ?dlq_msg.next_retry_at,
            "死信消息重试时间未到，跳过"
        );
    } else {
        error!(
            message_id = %dlq_msg.message_id,
            source_topic = %dlq_msg.source_topic,
            source_service = %dlq_msg.source_service,
            retry_count = dlq_msg.retry_count,
            max_retries = dlq_msg.max_retries,
            first_failed_at = %dlq_msg.first_failed_at,
            last_failed_at = %dlq_msg.last_failed_at,
            error = %dlq_msg.error,
            "死信消息已耗尽重试次数，需人工介入"
        );
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
