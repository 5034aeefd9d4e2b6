//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射和优雅关闭语义。
//!
//! 两端都有显式的连接状态机：生产者必须先 connect 成功才能发送，
//! 消费者必须按 connect -> subscribe -> start 的顺序推进，
//! 乱序调用以 IllegalState 错误拒绝而非悬挂或静默失败。

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::ActivityError;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理所有 Kafka topic 名称，防止字符串散落在各服务中导致拼写不一致
pub mod topics {
    pub const USER_ACTIVITIES: &str = "activity.user.events";
    pub const DEAD_LETTER_QUEUE: &str = "activity.dlq";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的
/// 结构体，使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
        }
    }

    /// 将 JSON 格式负载反序列化为目标类型
    ///
    /// 负载畸形属于不可重试的输入问题，映射为 Validation 错误，
    /// 由消费侧决定丢弃或送入死信队列。
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, ActivityError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| ActivityError::Validation(format!("负载反序列化失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并提供类型安全的 JSON 发送方法。
/// 创建后处于未连接状态，必须先调用 `connect` 确认 broker 可达，
/// 之后才允许发送——未连接即发送是编程错误，以 IllegalState 拒绝。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    connect_timeout: Duration,
    message_timeout: Duration,
    connected: bool,
}

impl KafkaProducer {
    /// 根据配置创建生产者（尚未连接）
    pub fn new(config: &KafkaConfig) -> Result<Self, ActivityError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(|e| ActivityError::Connection(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已创建（未连接）");
        Ok(Self {
            producer,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            message_timeout: Duration::from_millis(config.message_timeout_ms),
            connected: false,
        })
    }

    /// 建立连接：在超时内拉取集群元数据确认 broker 可达
    ///
    /// librdkafka 本身是惰性连接的，这里显式探测一次，
    /// 把"broker 配置错误"从首次发送提前到启动阶段暴露。
    pub async fn connect(&mut self) -> Result<(), ActivityError> {
        self.producer
            .client()
            .fetch_metadata(None, self.connect_timeout)
            .map_err(|e| ActivityError::Connection(format!("broker 不可达: {e}")))?;

        self.connected = true;
        info!("Kafka 生产者已连接");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn ensure_connected(&self) -> Result<(), ActivityError> {
        if !self.connected {
            return Err(ActivityError::IllegalState(
                "生产者未连接，请先调用 connect".to_string(),
            ));
        }
        Ok(())
    }

    /// 发送原始字节消息，返回 (partition, offset) 投递元数据
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), ActivityError> {
        self.ensure_connected()?;

        let record = FutureRecord::to(topic).key(key).payload(payload);

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, self.message_timeout)
            .await
            .map_err(|(e, _)| ActivityError::Delivery(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    ///
    /// 序列化与网络发送拆分为两步，便于独立定位故障原因。
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), ActivityError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| ActivityError::Internal(format!("序列化失败: {e}")))?;

        self.send(topic, key, &payload).await
    }

    /// 批量发送：每条消息独立按自身 key 分区，一次性提交后统一等待确认
    ///
    /// 任一条投递失败即整批报错——批内不提供部分成功语义，
    /// 与 at-least-once 的批粒度投递约定一致（调用方整批重发即可）。
    pub async fn send_batch(
        &self,
        topic: &str,
        messages: &[(String, Vec<u8>)],
    ) -> Result<Vec<(i32, i64)>, ActivityError> {
        self.ensure_connected()?;

        let futures: Vec<_> = messages
            .iter()
            .map(|(key, payload)| {
                let record = FutureRecord::to(topic).key(key).payload(payload);
                self.producer.send(record, self.message_timeout)
            })
            .collect();

        let results = futures::future::join_all(futures).await;

        let mut deliveries = Vec::with_capacity(results.len());
        let mut failed = 0usize;
        for result in results {
            match result {
                Ok(delivery) => deliveries.push((delivery.partition, delivery.offset)),
                Err((e, _)) => {
                    failed += 1;
                    warn!(topic, error = %e, "批量发送中单条投递失败");
                }
            }
        }

        if failed > 0 {
            return Err(ActivityError::Delivery(format!(
                "批量发送失败: {}/{} 条未投递",
                failed,
                messages.len()
            )));
        }

        debug!(topic, count = deliveries.len(), "批量消息已发送");
        Ok(deliveries)
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 消费者连接状态
///
/// disconnected -> connected -> subscribed 的单向推进，
/// consuming 由 `start` 的消费循环本身体现。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connected,
    Subscribed,
}

/// 面向业务的 Kafka 消费者
///
/// 封装 `StreamConsumer` 并提供基于 `watch` channel 的优雅关闭语义，
/// 确保进程退出时不会丢失正在处理的消息。
/// 每个分区内消息严格顺序处理：handler 完整结束（含持久化副作用）
/// 之后才取下一条，这是按用户分区键保序的前提。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    connect_timeout: Duration,
    state: ConsumerState,
}

impl KafkaConsumer {
    /// 创建消费者（尚未连接）
    ///
    /// `group_id_suffix` 允许同一服务内不同消费逻辑使用独立的消费组，
    /// 例如 "activity-service.dlq"。
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, ActivityError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| ActivityError::Connection(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已创建（未连接）");
        Ok(Self {
            consumer,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            state: ConsumerState::Disconnected,
        })
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// 建立连接：拉取元数据确认 broker 可达
    pub async fn connect(&mut self) -> Result<(), ActivityError> {
        if self.state != ConsumerState::Disconnected {
            return Err(ActivityError::IllegalState(format!(
                "consumer 已处于 {:?} 状态，不能重复 connect",
                self.state
            )));
        }

        self.consumer
            .fetch_metadata(None, self.connect_timeout)
            .map_err(|e| ActivityError::Connection(format!("broker 不可达: {e}")))?;

        self.state = ConsumerState::Connected;
        info!("Kafka 消费者已连接");
        Ok(())
    }

    /// 订阅指定的 topic 列表，必须在 connect 成功之后调用
    pub fn subscribe(&mut self, topics: &[&str]) -> Result<(), ActivityError> {
        if self.state != ConsumerState::Connected {
            return Err(ActivityError::IllegalState(format!(
                "consumer 处于 {:?} 状态，必须先 connect 再 subscribe",
                self.state
            )));
        }

        self.consumer
            .subscribe(topics)
            .map_err(|e| ActivityError::Connection(format!("订阅 topic 失败: {e}")))?;

        self.state = ConsumerState::Subscribed;
        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环，必须在 subscribe 成功之后调用
    ///
    /// 使用 `tokio::select!` 同时监听消息流和关闭信号：
    /// - 收到消息时顺序调用 handler；handler 返回错误只记录日志而不中断
    ///   循环，避免单条坏消息卡死整个分区。
    /// - 关闭信号变为 `true` 时退出循环，正在执行的 handler 自然完成，
    ///   之后不再拉取新消息。
    pub async fn start<F, Fut>(
        self,
        mut shutdown: watch::Receiver<bool>,
        handler: F,
    ) -> Result<(), ActivityError>
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), ActivityError>>,
    {
        if self.state != ConsumerState::Subscribed {
            return Err(ActivityError::IllegalState(format!(
                "consumer 处于 {:?} 状态，必须先 subscribe 再 start",
                self.state
            )));
        }

        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    match msg_result {
                        Ok(borrowed_msg) => {
                            let msg = ConsumerMessage::from_borrowed(&borrowed_msg);
                            debug!(
                                topic = %msg.topic,
                                partition = msg.partition,
                                offset = msg.offset,
                                "收到 Kafka 消息"
                            );

                            // 顺序 await：处理完当前消息才取下一条，保证分区内有序
                            if let Err(e) = handler(msg).await {
                                error!(error = %e, "处理 Kafka 消息失败");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
