//! 配送服务队列消费者
//!
//! 轮询订单 FIFO 队列并为新订单创建配送任务。

use std::sync::Arc;

use anyhow::Result;
use delivery_consumer::{EventRouter, LoggingDeliveryHandler, QueueConsumer};
use delivery_shared::{config::AppConfig, observability, queue::InMemoryQueue};
use tokio::signal;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "delivery-consumer";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // 1. 加载配置，失败时回退到默认值
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..AppConfig::default()
        }
    });

    // 2. 初始化日志
    observability::init_tracing(&config.observability)?;

    info!(
        service = %config.service_name,
        environment = %config.environment,
        queue = %config.queue.name,
        "Starting delivery-consumer..."
    );
    if config.is_production() {
        warn!("生产环境下仍在使用内存队列，消息不会持久化");
    }

    // 3. 组装队列客户端与分发器
    let queue = Arc::new(
        InMemoryQueue::new(config.queue.visibility_timeout()).with_queue(&config.queue.name),
    );
    let dispatcher = Arc::new(EventRouter::new(LoggingDeliveryHandler));
    let consumer = QueueConsumer::from_config(&config.queue, queue, dispatcher)?;

    // 4. 启动消费并等待关闭信号
    consumer.start().await;
    shutdown_signal().await;
    consumer.stop();

    info!("Service shutdown complete");
    Ok(())
}

/// 监听 Ctrl+C 和 SIGTERM 信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
