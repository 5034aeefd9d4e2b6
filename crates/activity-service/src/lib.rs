//! 活动接入与查询服务
//!
//! 提供活动上报的 HTTP 入口（校验后发布到 Kafka）以及持久化活动的
//! 查询、统计 REST API。写路径只与消息总线交互，读路径只与存储交互，
//! 两者通过 worker 的异步消费解耦。

pub mod dto;
pub mod error;
pub mod handlers;
pub mod publisher;
pub mod repository;
pub mod routes;
pub mod state;
pub mod stats;
