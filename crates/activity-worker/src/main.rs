//! 活动处理 worker 进程
//!
//! 组装存储、缓存与总线句柄，运行活动消费循环与 DLQ 重投递循环。
//! 优雅关闭：收到信号后停止拉取新消息，等待在途消息的持久化完成，
//! 再断开连接退出。

use std::sync::Arc;

use activity_service::repository::{ActivityRepository, ActivityRepositoryTrait};
use activity_shared::{
    cache::Cache,
    config::AppConfig,
    database::Database,
    dlq::{DlqConsumer, DlqProducer},
    kafka::KafkaProducer,
    observability,
    retry::RetryPolicy,
};
use activity_worker::{consumer::ActivityConsumer, processor::ActivityProcessor};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("activity-worker").unwrap_or_default();
    observability::init(&config.observability)?;

    info!("Starting activity-worker...");

    // 基础设施句柄：连接池、缓存、总线生产者各一份，显式注入下游组件
    let db = Database::connect(&config.database).await?;
    let cache = Cache::new(&config.redis)?;
    let repository: Arc<dyn ActivityRepositoryTrait> =
        Arc::new(ActivityRepository::new(db.pool().clone()));
    let processor = Arc::new(ActivityProcessor::new(repository, cache));

    // DLQ 与重投递共用同一个生产者连接
    let mut producer = KafkaProducer::new(&config.kafka)?;
    producer.connect().await?;

    let retry_policy = RetryPolicy::default();
    let dlq = Arc::new(DlqProducer::new(
        producer.clone(),
        "activity-worker",
        retry_policy.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = ActivityConsumer::new(&config, processor, dlq, retry_policy)?;
    let mut consumer_handle = tokio::spawn(consumer.run(shutdown_rx.clone()));

    let dlq_consumer = DlqConsumer::new(&config, producer)?;
    let mut dlq_handle = tokio::spawn(dlq_consumer.run(shutdown_rx));

    // 等待关闭信号；任一消费循环意外退出也触发整体关闭
    let mut consumer_done = false;
    let mut dlq_done = false;
    tokio::select! {
        _ = shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭");
        }
        result = &mut consumer_handle => {
            consumer_done = true;
            error!(?result, "活动消费循环意外退出");
        }
        result = &mut dlq_handle => {
            dlq_done = true;
            error!(?result, "DLQ 消费循环意外退出");
        }
    }

    // 通知消费循环退出：不再拉取新消息，在途消息自然处理完
    let _ = shutdown_tx.send(true);

    if !consumer_done && let Err(e) = consumer_handle.await {
        error!(error = %e, "等待活动消费循环退出失败");
    }
    if !dlq_done && let Err(e) = dlq_handle.await {
        error!(error = %e, "等待 DLQ 消费循环退出失败");
    }

    db.close().await;
    info!("activity-worker shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
