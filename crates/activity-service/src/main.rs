//! 活动接入与查询服务
//!
//! 接收活动上报（发布到 Kafka）并提供持久化活动的查询、统计 REST API。

use std::sync::Arc;

use activity_service::{
    publisher::ActivityPublisher,
    repository::{ActivityRepository, ActivityRepositoryTrait},
    routes,
    state::AppState,
    stats::StatsAggregator,
};
use activity_shared::{config::AppConfig, database::Database, observability};
use axum::{Json, Router, routing::get};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("activity-api").unwrap_or_default();
    observability::init(&config.observability)?;

    info!("Starting activity-api on {}", config.server_addr());

    // 初始化基础设施：存储连接池与总线生产者各一份，归属明确
    let db = Database::connect(&config.database).await?;
    let repository: Arc<dyn ActivityRepositoryTrait> =
        Arc::new(ActivityRepository::new(db.pool().clone()));

    // 总线必须在启动阶段可达：connect 失败直接退出，
    // 避免启动一个接收不了上报的空壳服务
    let mut publisher = ActivityPublisher::new(&config.kafka)?;
    publisher.connect().await?;
    let publisher = Arc::new(publisher);

    let stats = Arc::new(StatsAggregator::new(repository.clone()));
    let state = AppState::new(repository, publisher.clone(), stats);

    // 上报接口面向各端（web/app），放开跨域
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api/v1/activities", routes::activity_routes())
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db_for_ready = db.clone();
                let publisher_for_ready = publisher;
                move || readiness_check(db_for_ready.clone(), publisher_for_ready.clone())
            }),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：停止接收新连接并等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");

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
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 存活探针：进程正常即返回 ok
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "activity-api"
    }))
}

/// 就绪探针：检查数据库连接与总线生产者状态
async fn readiness_check(
    db: Database,
    publisher: Arc<ActivityPublisher>,
) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();
    let bus_ok = publisher.is_connected();
    let all_ok = db_ok && bus_ok;

    Json(serde_json::json!({
        "status": if all_ok { "ok" } else { "degraded" },
        "service": "activity-api",
        "checks": {
            "database": if db_ok { "ok" } else { "fail" },
            "kafka": if bus_ok { "ok" } else { "fail" }
        }
    }))
}
