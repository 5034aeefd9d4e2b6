//! 活动处理 worker
//!
//! 消费 Kafka 中的用户活动事件：反序列化 -> 前置校验 -> 幂等检查 ->
//! 状态迁移并持久化。瞬时故障按退避策略重试，重试耗尽的消息送入
//! 死信队列。分区内严格顺序处理，保证同一用户的事件按发布顺序落库。

pub mod consumer;
pub mod error;
pub mod processor;
