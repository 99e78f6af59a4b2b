//! 内存 FIFO 队列
//!
//! 模拟 FIFO 队列服务的核心语义：
//! - 单消息组严格有序：存在未确认消息时不再投递后续消息
//! - 可见性超时：已接收未删除的消息超时后按原顺序重新可见
//! - 回执句柄一次性有效：删除后或超时后失效
//!
//! 另外支持故障注入，便于验证消费者在通信失败时的行为。

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{QueueClient, QueueMessage};
use crate::config::MAX_BATCH_SIZE;
use crate::error::DeliveryError;

/// 调用统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub receive_calls: u64,
    pub delete_calls: u64,
    pub messages_deleted: u64,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: Value,
    receive_count: u32,
}

#[derive(Debug)]
struct InFlight {
    sequence: u64,
    message: StoredMessage,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueContents {
    next_sequence: u64,
    /// 按入队序号排序，保证重新可见的消息回到原位置
    visible: BTreeMap<u64, StoredMessage>,
    in_flight: HashMap<String, InFlight>,
}

impl QueueContents {
    /// 将可见性已超时的消息放回可见集合，旧回执句柄随之失效
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();

        for handle in expired {
            if let Some(flight) = self.in_flight.remove(&handle) {
                debug!(
                    message_id = %flight.message.message_id,
                    "消息可见性超时，重新可见"
                );
                self.visible.insert(flight.sequence, flight.message);
            }
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queues: HashMap<String, QueueContents>,
    pending_receive_failures: u32,
    pending_delete_failures: u32,
    stats: QueueStats,
}

/// 内存 FIFO 队列
#[derive(Debug)]
pub struct InMemoryQueue {
    visibility_timeout: Duration,
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// 创建命名队列（已存在时不做任何事）
    pub fn with_queue(self, name: &str) -> Self {
        self.state.lock().queues.entry(name.to_string()).or_default();
        self
    }

    /// 投递一条消息到队尾，返回消息 ID
    pub fn send(&self, queue: &str, body: Value) -> Result<String, DeliveryError> {
        let mut state = self.state.lock();
        let contents = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| DeliveryError::QueueNotFound {
                queue: queue.to_string(),
            })?;

        let message_id = Uuid::now_v7().to_string();
        let sequence = contents.next_sequence;
        contents.next_sequence += 1;
        contents.visible.insert(
            sequence,
            StoredMessage {
                message_id: message_id.clone(),
                body,
                receive_count: 0,
            },
        );
        Ok(message_id)
    }

    /// 接下来的 n 次 receive 调用返回通信错误
    pub fn fail_next_receives(&self, n: u32) {
        self.state.lock().pending_receive_failures = n;
    }

    /// 接下来的 n 次 delete 调用返回通信错误
    pub fn fail_next_deletes(&self, n: u32) {
        self.state.lock().pending_delete_failures = n;
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }

    /// 当前可被接收的消息数
    pub fn visible_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.visible.len())
    }

    /// 已接收但尚未删除的消息数
    pub fn in_flight_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.in_flight.len())
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> Result<Vec<QueueMessage>, DeliveryError> {
        let mut state = self.state.lock();
        state.stats.receive_calls += 1;

        if state.pending_receive_failures > 0 {
            state.pending_receive_failures -= 1;
            return Err(DeliveryError::transport("receive", "注入的接收故障"));
        }

        if max_messages == 0 || max_messages > MAX_BATCH_SIZE {
            return Err(DeliveryError::transport(
                "receive",
                format!("max_messages 必须在 1..={MAX_BATCH_SIZE} 之间，实际 {max_messages}"),
            ));
        }

        let contents = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| DeliveryError::QueueNotFound {
                queue: queue.to_string(),
            })?;

        let now = Instant::now();
        contents.release_expired(now);

        // 单消息组：前面的消息未确认前不投递后续消息
        if !contents.in_flight.is_empty() {
            return Ok(Vec::new());
        }

        let sequences: Vec<u64> = contents.visible.keys().take(max_messages).copied().collect();
        let mut batch = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            let Some(mut message) = contents.visible.remove(&sequence) else {
                continue;
            };
            message.receive_count += 1;

            let receipt_handle = Uuid::now_v7().to_string();
            batch.push(QueueMessage {
                message_id: message.message_id.clone(),
                receipt_handle: receipt_handle.clone(),
                body: message.body.clone(),
                receive_count: message.receive_count,
                received_at: Utc::now(),
            });
            contents.in_flight.insert(
                receipt_handle,
                InFlight {
                    sequence,
                    message,
                    visible_at: now + self.visibility_timeout,
                },
            );
        }

        Ok(batch)
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), DeliveryError> {
        let mut state = self.state.lock();
        state.stats.delete_calls += 1;

        if state.pending_delete_failures > 0 {
            state.pending_delete_failures -= 1;
            return Err(DeliveryError::transport("delete", "注入的删除故障"));
        }

        let contents = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| DeliveryError::QueueNotFound {
                queue: queue.to_string(),
            })?;

        contents.release_expired(Instant::now());

        if contents.in_flight.remove(receipt_handle).is_none() {
            return Err(DeliveryError::InvalidReceiptHandle {
                receipt_handle: receipt_handle.to_string(),
            });
        }

        state.stats.messages_deleted += 1;
        Ok(())
    }
}
