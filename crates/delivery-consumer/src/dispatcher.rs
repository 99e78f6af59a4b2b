//! 事件分发
//!
//! 将队列消息解码为事件并路由到对应处理器。分发结果决定消息去留：
//! - `Ok(_)`：消息删除（包括缺少判别字段与未知事件类型，重投无意义）
//! - `Err(_)`：已识别事件解码或处理失败，消息保留等待重投

use async_trait::async_trait;
use delivery_shared::events::{Event, MalformedEvent};
use delivery_shared::queue::QueueMessage;
use tracing::{info, warn};

use crate::error::ConsumerError;
use crate::handler::OrderDeliveryHandler;

/// 分发成功时的具体结果
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// 处理器已执行成功
    Handled { event_type: String },
    /// 消息不可处理，按已处理丢弃
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiscardReason {
    Malformed(MalformedEvent),
    UnknownEventType(String),
}

/// 事件分发接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    async fn dispatch(&self, message: &QueueMessage) -> Result<DispatchOutcome, ConsumerError>;
}

/// 按 `eventType` 路由的分发器
pub struct EventRouter<H> {
    delivery: H,
}

impl<H: OrderDeliveryHandler> EventRouter<H> {
    pub fn new(delivery: H) -> Self {
        Self { delivery }
    }
}

#[async_trait]
impl<H: OrderDeliveryHandler> EventDispatcher for EventRouter<H> {
    async fn dispatch(&self, message: &QueueMessage) -> Result<DispatchOutcome, ConsumerError> {
        let event = match Event::decode(&message.body) {
            Ok(event) => event,
            // 类型已识别但缺少订单标识：交给重投，不静默丢弃订单
            Err(reason @ MalformedEvent::InvalidPayload { .. }) => {
                return Err(ConsumerError::MalformedEvent(reason));
            }
            Err(reason) => {
                warn!(
                    message_id = %message.message_id,
                    reason = %reason,
                    "消息无法解码为事件，直接丢弃"
                );
                return Ok(DispatchOutcome::Discarded(DiscardReason::Malformed(reason)));
            }
        };

        let event_type = event.event_type().to_string();
        info!(
            event_type = %event_type,
            message_id = %message.message_id,
            receive_count = message.receive_count,
            "开始处理事件"
        );

        match event {
            Event::OrderCreated(order) => {
                self.delivery.process_order_created(&order).await?;
                Ok(DispatchOutcome::Handled { event_type })
            }
            Event::Unknown { .. } => {
                warn!(
                    event_type = %event_type,
                    message_id = %message.message_id,
                    "未知事件类型，直接丢弃"
                );
                Ok(DispatchOutcome::Discarded(DiscardReason::UnknownEventType(
                    event_type,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MockOrderDeliveryHandler;
    use chrono::Utc;
    use serde_json::{Value, json};

    fn message(body: Value) -> QueueMessage {
        QueueMessage {
            message_id: "msg-001".to_string(),
            receipt_handle: "rh-001".to_string(),
            body,
            receive_count: 1,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_order_created_routes_to_delivery_handler() {
        let mut handler = MockOrderDeliveryHandler::new();
        handler
            .expect_process_order_created()
            .withf(|e| e.order_id == "order-001" && e.customer_id == "cust-001")
            .times(1)
            .returning(|_| Ok(()));

        let router = EventRouter::new(handler);
        let outcome = router
            .dispatch(&message(json!({
                "eventType": "ORDER_CREATED",
                "orderId": "order-001",
                "customerId": "cust-001"
            })))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Handled {
                event_type: "ORDER_CREATED".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_handler_error_is_propagated() {
        let mut handler = MockOrderDeliveryHandler::new();
        handler
            .expect_process_order_created()
            .times(1)
            .returning(|_| Err(ConsumerError::handler("ORDER_CREATED", "下游超时")));

        let router = EventRouter::new(handler);
        let result = router
            .dispatch(&message(json!({
                "eventType": "ORDER_CREATED",
                "orderId": "order-001",
                "customerId": "cust-001"
            })))
            .await;

        assert!(matches!(result, Err(ConsumerError::Handler { .. })));
    }

    #[tokio::test]
    async fn test_missing_event_type_is_discarded() {
        let mut handler = MockOrderDeliveryHandler::new();
        handler.expect_process_order_created().times(0);

        let router = EventRouter::new(handler);
        let outcome = router
            .dispatch(&message(json!({"orderId": "order-001"})))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Discarded(DiscardReason::Malformed(MalformedEvent::MissingEventType))
        );
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_discarded() {
        let mut handler = MockOrderDeliveryHandler::new();
        handler.expect_process_order_created().times(0);

        let router = EventRouter::new(handler);
        let outcome = router
            .dispatch(&message(json!({"eventType": "UNKNOWN_TYPE"})))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Discarded(DiscardReason::UnknownEventType(
                "UNKNOWN_TYPE".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_order_without_identifiers_is_retained() {
        let mut handler = MockOrderDeliveryHandler::new();
        handler.expect_process_order_created().times(0);

        let router = EventRouter::new(handler);
        let result = router
            .dispatch(&message(json!({"eventType": "ORDER_CREATED", "orderId": 17})))
            .await;

        assert!(matches!(
            result,
            Err(ConsumerError::MalformedEvent(MalformedEvent::InvalidPayload { .. }))
        ));
    }

    #[tokio::test]
    async fn test_mistyped_optional_fields_still_reach_handler() {
        let mut handler = MockOrderDeliveryHandler::new();
        handler
            .expect_process_order_created()
            .withf(|e| {
                e.order_id == "order-009" && e.total_amount == Some(39.8) && e.items[0].quantity == 2
            })
            .times(1)
            .returning(|_| Ok(()));

        let router = EventRouter::new(handler);
        let outcome = router
            .dispatch(&message(json!({
                "eventType": "ORDER_CREATED",
                "orderId": "order-009",
                "customerId": "cust-001",
                "totalAmount": "39.80",
                "items": [{"productId": "sku-1", "quantity": 2.0}]
            })))
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Handled { .. }));
    }
}
