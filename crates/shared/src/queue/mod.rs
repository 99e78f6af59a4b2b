//! 队列客户端抽象
//!
//! 消费者只依赖 `QueueClient` 的两个操作：批量拉取与按回执句柄删除。
//! 具体传输协议与鉴权不在本库范围内，这里只提供内存实现供本地运行与测试。

mod memory;

pub use memory::{InMemoryQueue, QueueStats};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::DeliveryError;

// ---------------------------------------------------------------------------
// QueueMessage
// ---------------------------------------------------------------------------

/// 从队列拉取到的消息
///
/// `receipt_handle` 是一次性令牌，仅在可见性超时之前有效，删除消息时必须提供。
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: Value,
    /// 该消息累计被投递的次数，首次投递为 1
    pub receive_count: u32,
    pub received_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// QueueClient
// ---------------------------------------------------------------------------

/// 队列服务客户端
///
/// 至少一次投递语义：未删除的消息在可见性超时后会被重新投递。
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// 按 FIFO 顺序拉取最多 `max_messages` 条消息，没有消息时返回空列表
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> Result<Vec<QueueMessage>, DeliveryError>;

    /// 确认消息已处理，从队列中移除
    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), DeliveryError>;
}
