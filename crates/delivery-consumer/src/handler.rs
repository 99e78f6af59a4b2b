//! 订单配送处理器
//!
//! 消费者只通过 `OrderDeliveryHandler` 调用业务逻辑。
//! 重复投递下的幂等由处理器自行保证。

use std::sync::Arc;

use async_trait::async_trait;
use delivery_shared::events::OrderCreatedEvent;
use tracing::info;

use crate::error::ConsumerError;

/// 订单创建事件的配送处理接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderDeliveryHandler: Send + Sync {
    /// 为新订单创建配送任务；返回错误时消息不会被删除
    async fn process_order_created(&self, event: &OrderCreatedEvent) -> Result<(), ConsumerError>;
}

#[async_trait]
impl<T: OrderDeliveryHandler + ?Sized> OrderDeliveryHandler for Arc<T> {
    async fn process_order_created(&self, event: &OrderCreatedEvent) -> Result<(), ConsumerError> {
        (**self).process_order_created(event).await
    }
}

/// 仅记录日志的处理器，用于本地运行
#[derive(Debug, Default, Clone)]
pub struct LoggingDeliveryHandler;

#[async_trait]
impl OrderDeliveryHandler for LoggingDeliveryHandler {
    async fn process_order_created(&self, event: &OrderCreatedEvent) -> Result<(), ConsumerError> {
        let item_count: u32 = event.items.iter().map(|i| i.quantity).sum();
        info!(
            order_id = %event.order_id,
            customer_id = %event.customer_id,
            item_count,
            city = event.delivery_address.as_ref().map(|a| a.city.as_str()),
            "已为订单创建配送任务"
        );
        Ok(())
    }
}
