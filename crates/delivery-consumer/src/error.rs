//! 配送消费者错误类型
//!
//! 在共享库 DeliveryError 基础上定义消费流程特有的错误，
//! 便于轮询循环区分"删除后丢弃"与"保留等待重投"两类结果。

use delivery_shared::error::DeliveryError;
use delivery_shared::events::MalformedEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// 已识别事件的负载缺少必要字段，保留在队列中等待重投
    #[error("消息格式错误: {0}")]
    MalformedEvent(#[from] MalformedEvent),

    /// 已识别事件的业务处理失败，消息保留在队列中等待重投
    #[error("事件处理失败: event_type={event_type}, 原因={message}")]
    Handler { event_type: String, message: String },

    #[error(transparent)]
    Shared(#[from] DeliveryError),
}

impl ConsumerError {
    pub fn handler(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            event_type: event_type.into(),
            message: message.into(),
        }
    }
}
