//! 订单配送队列消费者
//!
//! 定时从订单 FIFO 队列拉取消息，按 `eventType` 分发到配送处理器，
//! 处理成功后删除消息；处理失败的消息保留在队列中，等待可见性超时后重投。

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod handler;

pub use consumer::{
    BatchSummary, ConsumerSettings, MessageOutcome, PollReport, ProcessedMessage, QueueConsumer,
    SkipReason,
};
pub use dispatcher::{DiscardReason, DispatchOutcome, EventDispatcher, EventRouter};
pub use error::ConsumerError;
pub use handler::{LoggingDeliveryHandler, OrderDeliveryHandler};
