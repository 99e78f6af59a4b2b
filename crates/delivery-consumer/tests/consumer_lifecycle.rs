//! 消费者生命周期与调度的集成测试
//!
//! 使用暂停的 tokio 时钟驱动定时调度，所有断言与真实时间无关。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use delivery_consumer::{
    ConsumerError, ConsumerSettings, EventRouter, MessageOutcome, OrderDeliveryHandler,
    PollReport, QueueConsumer,
};
use delivery_shared::events::OrderCreatedEvent;
use delivery_shared::queue::InMemoryQueue;
use parking_lot::Mutex;
use serde_json::{Value, json};

const QUEUE: &str = "orders-queue.fifo";

// ==================== 测试辅助 ====================

/// 记录调用顺序的配送处理器，可配置首次失败的订单与处理耗时
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<String>>,
    fail_once: Mutex<HashSet<String>>,
    delay: Option<Duration>,
}

impl RecordingHandler {
    fn failing_once(order_ids: &[&str]) -> Self {
        Self {
            fail_once: Mutex::new(order_ids.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl OrderDeliveryHandler for RecordingHandler {
    async fn process_order_created(&self, event: &OrderCreatedEvent) -> Result<(), ConsumerError> {
        self.seen.lock().push(event.order_id.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_once.lock().remove(&event.order_id) {
            return Err(ConsumerError::handler("ORDER_CREATED", "配送系统暂不可用"));
        }
        Ok(())
    }
}

fn order(order_id: &str) -> Value {
    json!({
        "eventType": "ORDER_CREATED",
        "orderId": order_id,
        "customerId": "cust-001"
    })
}

fn setup(handler: RecordingHandler) -> (Arc<InMemoryQueue>, Arc<RecordingHandler>, QueueConsumer) {
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(30)).with_queue(QUEUE));
    let handler = Arc::new(handler);
    let consumer = QueueConsumer::new(
        queue.clone(),
        Arc::new(EventRouter::new(handler.clone())),
        ConsumerSettings::default(),
    );
    (queue, handler, consumer)
}

// ==================== 生命周期 ====================

#[tokio::test(start_paused = true)]
async fn test_start_twice_keeps_single_schedule() {
    let (queue, _handler, consumer) = setup(RecordingHandler::default());

    assert!(consumer.start().await.is_some());
    assert!(consumer.start().await.is_none());
    assert!(consumer.is_running());
    assert_eq!(queue.stats().receive_calls, 1);

    // 每个间隔恰好一轮
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    assert_eq!(queue.stats().receive_calls, 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(queue.stats().receive_calls, 3);

    consumer.stop();
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_schedule_and_is_idempotent() {
    let (queue, _handler, consumer) = setup(RecordingHandler::default());

    assert!(!consumer.stop());

    consumer.start().await;
    assert!(consumer.stop());
    assert!(!consumer.stop());
    assert!(!consumer.is_running());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(queue.stats().receive_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_leaves_single_schedule() {
    let (queue, _handler, consumer) = setup(RecordingHandler::default());

    consumer.start().await;
    consumer.stop();
    consumer.start().await;
    assert_eq!(queue.stats().receive_calls, 2);

    tokio::time::sleep(Duration::from_millis(5_100)).await;
    assert_eq!(queue.stats().receive_calls, 3);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(queue.stats().receive_calls, 4);

    consumer.stop();
}

#[tokio::test(start_paused = true)]
async fn test_overrunning_cycle_skips_ticks() {
    let (queue, handler, consumer) = setup(RecordingHandler::slow(Duration::from_secs(12)));
    queue.send(QUEUE, order("order-slow")).unwrap();

    // 首轮耗时 12 秒，期间 5s、10s 两次 tick 都应跳过
    let report = consumer.start().await;
    assert!(matches!(report, Some(PollReport::Completed(ref s)) if s.acknowledged() == 1));
    assert_eq!(queue.stats().receive_calls, 1);
    assert_eq!(handler.seen(), vec!["order-slow"]);

    tokio::time::sleep(Duration::from_millis(3_100)).await;
    assert_eq!(queue.stats().receive_calls, 2);

    consumer.stop();
}

// ==================== 轮询与分发 ====================

#[tokio::test(start_paused = true)]
async fn test_failed_message_retained_then_redelivered() {
    let (queue, handler, consumer) = setup(RecordingHandler::failing_once(&["order-2"]));
    for id in ["order-1", "order-2", "order-3"] {
        queue.send(QUEUE, order(id)).unwrap();
    }

    let Some(PollReport::Completed(summary)) = consumer.start().await else {
        panic!("首轮轮询应正常完成");
    };
    assert_eq!(handler.seen(), vec!["order-1", "order-2", "order-3"]);
    assert!(matches!(summary.messages[0].outcome, MessageOutcome::Acknowledged(_)));
    assert_eq!(summary.messages[1].outcome, MessageOutcome::Retained);
    assert!(matches!(summary.messages[2].outcome, MessageOutcome::Acknowledged(_)));
    assert_eq!(queue.stats().delete_calls, 2);

    // 可见性超时（30s）后 order-2 被重投并处理成功
    tokio::time::sleep(Duration::from_millis(35_100)).await;
    assert_eq!(handler.seen(), vec!["order-1", "order-2", "order-3", "order-2"]);
    assert_eq!(queue.stats().messages_deleted, 3);
    assert_eq!(queue.in_flight_len(QUEUE), 0);
    assert_eq!(queue.visible_len(QUEUE), 0);

    consumer.stop();
}

#[tokio::test]
async fn test_non_actionable_messages_are_deleted_without_handler() {
    let (queue, handler, consumer) = setup(RecordingHandler::default());
    queue.send(QUEUE, json!({"orderId": "order-1"})).unwrap();
    queue
        .send(QUEUE, json!({"eventType": "UNKNOWN_TYPE", "orderId": "order-2"}))
        .unwrap();

    let Some(PollReport::Completed(summary)) = consumer.start().await else {
        panic!("首轮轮询应正常完成");
    };

    assert_eq!(summary.acknowledged(), 2);
    assert!(handler.seen().is_empty());
    assert_eq!(queue.stats().messages_deleted, 2);

    consumer.stop();
}

#[tokio::test(start_paused = true)]
async fn test_receive_failure_recovers_on_next_tick() {
    let (queue, handler, consumer) = setup(RecordingHandler::default());
    queue.send(QUEUE, order("order-1")).unwrap();
    queue.fail_next_receives(1);

    let report = consumer.start().await;
    assert!(matches!(report, Some(PollReport::ReceiveFailed { .. })));
    assert!(consumer.is_running());
    assert!(handler.seen().is_empty());
    assert_eq!(queue.stats().delete_calls, 0);

    tokio::time::sleep(Duration::from_millis(5_100)).await;
    assert_eq!(handler.seen(), vec!["order-1"]);
    assert_eq!(queue.stats().messages_deleted, 1);

    consumer.stop();
}

#[tokio::test]
async fn test_orders_with_mistyped_optional_fields_are_delivered() {
    let (queue, handler, consumer) = setup(RecordingHandler::default());
    queue
        .send(
            QUEUE,
            json!({
                "eventType": "ORDER_CREATED",
                "orderId": "order-1",
                "customerId": "cust-001",
                "totalAmount": "39.80"
            }),
        )
        .unwrap();
    queue
        .send(
            QUEUE,
            json!({
                "eventType": "ORDER_CREATED",
                "orderId": "order-2",
                "customerId": "cust-001",
                "items": [{"productId": "sku-1", "quantity": 2.0}]
            }),
        )
        .unwrap();

    let Some(PollReport::Completed(summary)) = consumer.start().await else {
        panic!("首轮轮询应正常完成");
    };

    assert_eq!(handler.seen(), vec!["order-1", "order-2"]);
    assert_eq!(summary.acknowledged(), 2);
    assert_eq!(queue.stats().messages_deleted, 2);

    consumer.stop();
}

#[tokio::test]
async fn test_order_without_customer_is_retained() {
    let (queue, handler, consumer) = setup(RecordingHandler::default());
    queue
        .send(QUEUE, json!({"eventType": "ORDER_CREATED", "orderId": "order-1"}))
        .unwrap();

    let Some(PollReport::Completed(summary)) = consumer.start().await else {
        panic!("首轮轮询应正常完成");
    };

    assert_eq!(summary.messages[0].outcome, MessageOutcome::Retained);
    assert!(handler.seen().is_empty());
    assert_eq!(queue.stats().delete_calls, 0);
    assert_eq!(queue.in_flight_len(QUEUE), 1);

    consumer.stop();
}
