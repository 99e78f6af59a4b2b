//! 订单队列消费者
//!
//! 定时轮询 FIFO 队列，按接收顺序逐条分发消息，分发成功后才删除消息。
//!
//! 生命周期只有 Stopped / Running 两个状态：
//! - `start()` 在 Running 下是空操作；否则立即执行一轮轮询并按固定间隔调度后续轮询
//! - `stop()` 在 Stopped 下是空操作；否则取消后续调度，但不打断正在执行的那一轮
//!
//! 同一时刻最多只有一轮轮询在执行：上一轮未结束时到达的定时 tick 直接跳过。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use delivery_shared::config::QueueConfig;
use delivery_shared::error::DeliveryError;
use delivery_shared::queue::{QueueClient, QueueMessage};
use delivery_shared::retry::{RetryPolicy, retry_with_policy};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatchOutcome, EventDispatcher};
use crate::error::ConsumerError;

// ---------------------------------------------------------------------------
// 配置
// ---------------------------------------------------------------------------

/// 消费者运行参数
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub queue_name: String,
    pub max_messages: usize,
    pub poll_interval: Duration,
    /// 删除确认的重试策略，默认只尝试一次
    pub delete_retry: RetryPolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for ConsumerSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            queue_name: config.name.clone(),
            max_messages: config.max_messages,
            poll_interval: config.poll_interval(),
            delete_retry: RetryPolicy::with_max_retries(config.delete_max_retries),
        }
    }
}

// ---------------------------------------------------------------------------
// 轮询结果
// ---------------------------------------------------------------------------

/// 单条消息的最终去向
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// 分发成功且已删除
    Acknowledged(DispatchOutcome),
    /// 分发成功但删除失败，重投后会被再次处理
    DeleteFailed(DispatchOutcome),
    /// 分发失败，保留在队列中等待可见性超时后重投
    Retained,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedMessage {
    pub message_id: String,
    pub outcome: MessageOutcome,
}

/// 一轮轮询中各条消息的处理结果，按接收顺序排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub messages: Vec<ProcessedMessage>,
}

impl BatchSummary {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn acknowledged(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::Acknowledged(_)))
    }

    pub fn retained(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::Retained))
    }

    pub fn delete_failed(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::DeleteFailed(_)))
    }

    fn count(&self, pred: impl Fn(&MessageOutcome) -> bool) -> usize {
        self.messages.iter().filter(|m| pred(&m.outcome)).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotRunning,
    CycleInProgress,
}

/// 一轮轮询的结果
#[derive(Debug, Clone, PartialEq)]
pub enum PollReport {
    Skipped(SkipReason),
    /// 拉取失败，本轮不做任何处理，等待下一轮
    ReceiveFailed { error: String },
    Completed(BatchSummary),
}

// ---------------------------------------------------------------------------
// ConsumerCore — 轮询任务与外部调用共享的部分
// ---------------------------------------------------------------------------

struct ConsumerCore {
    queue: Arc<dyn QueueClient>,
    dispatcher: Arc<dyn EventDispatcher>,
    settings: ConsumerSettings,
    running: AtomicBool,
    /// 持有期间表示有一轮轮询正在执行
    cycle_lock: tokio::sync::Mutex<()>,
}

impl ConsumerCore {
    /// 定时触发的轮询：上一轮未结束时跳过
    async fn poll_if_idle(&self) -> PollReport {
        if !self.running.load(Ordering::SeqCst) {
            return PollReport::Skipped(SkipReason::NotRunning);
        }
        let Ok(_cycle) = self.cycle_lock.try_lock() else {
            warn!(
                queue = %self.settings.queue_name,
                "上一轮轮询尚未结束，跳过本次调度"
            );
            return PollReport::Skipped(SkipReason::CycleInProgress);
        };
        self.poll_messages().await
    }

    /// 启动时的首轮轮询：等待残留的上一轮结束后再执行
    async fn poll_after_in_flight(&self) -> PollReport {
        let _cycle = self.cycle_lock.lock().await;
        self.poll_messages().await
    }

    async fn poll_messages(&self) -> PollReport {
        // stop() 与已触发的调度之间存在竞争，这里再确认一次
        if !self.running.load(Ordering::SeqCst) {
            return PollReport::Skipped(SkipReason::NotRunning);
        }

        let queue = &self.settings.queue_name;
        let messages = match self.queue.receive(queue, self.settings.max_messages).await {
            Ok(messages) => messages,
            Err(e) => {
                error!(queue = %queue, error = %e, code = e.code(), "拉取队列消息失败");
                return PollReport::ReceiveFailed {
                    error: e.to_string(),
                };
            }
        };

        if messages.is_empty() {
            debug!(queue = %queue, "队列中没有新消息");
            return PollReport::Completed(BatchSummary::default());
        }

        info!(queue = %queue, count = messages.len(), "开始处理队列消息");

        // 逐条串行处理以保持 FIFO 顺序，单条失败不影响后续消息
        let mut summary = BatchSummary {
            messages: Vec::with_capacity(messages.len()),
        };
        for message in &messages {
            let outcome = self.process_message(message).await;
            summary.messages.push(ProcessedMessage {
                message_id: message.message_id.clone(),
                outcome,
            });
        }

        info!(
            queue = %queue,
            total = summary.len(),
            acknowledged = summary.acknowledged(),
            retained = summary.retained(),
            delete_failed = summary.delete_failed(),
            "本轮队列消息处理完成"
        );

        PollReport::Completed(summary)
    }

    async fn process_message(&self, message: &QueueMessage) -> MessageOutcome {
        let dispatched = match self.dispatcher.dispatch(message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    error = %e,
                    "处理消息失败，消息保留在队列中等待重投"
                );
                return MessageOutcome::Retained;
            }
        };

        match self.delete_message(message).await {
            Ok(()) => {
                debug!(message_id = %message.message_id, "消息已处理并删除");
                MessageOutcome::Acknowledged(dispatched)
            }
            Err(e) => {
                error!(
                    message_id = %message.message_id,
                    error = %e,
                    "消息已处理但删除失败，重投后将被重复处理"
                );
                MessageOutcome::DeleteFailed(dispatched)
            }
        }
    }

    async fn delete_message(&self, message: &QueueMessage) -> Result<(), DeliveryError> {
        let queue = self.settings.queue_name.as_str();
        let receipt_handle = message.receipt_handle.as_str();
        retry_with_policy(&self.settings.delete_retry, "delete", || {
            self.queue.delete(queue, receipt_handle)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// PollTimer — 定时调度句柄
// ---------------------------------------------------------------------------

struct PollTimer {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollTimer {
    fn spawn(core: Arc<ConsumerCore>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_schedule(core, shutdown_rx));
        Self { shutdown, handle }
    }

    /// 通知调度任务退出；正在执行的一轮会正常跑完
    fn cancel(self) {
        let _ = self.shutdown.send(true);
        drop(self.handle);
    }
}

/// 定时调度循环
///
/// 第一次 tick 在启动后一个间隔触发（首轮由 `start()` 直接执行）。
/// 轮询在 select 分支体内执行，关闭信号不会中断进行中的一轮。
async fn run_schedule(core: Arc<ConsumerCore>, mut shutdown: watch::Receiver<bool>) {
    let period = core.settings.poll_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(queue = %core.settings.queue_name, "轮询调度已取消");
                    break;
                }
            }

            _ = ticker.tick() => {
                core.poll_if_idle().await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// QueueConsumer
// ---------------------------------------------------------------------------

/// 订单队列消费者
///
/// `start`/`stop` 通过 `timer` 互斥串行化，保证任意时刻最多一个调度任务。
pub struct QueueConsumer {
    core: Arc<ConsumerCore>,
    timer: Mutex<Option<PollTimer>>,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        dispatcher: Arc<dyn EventDispatcher>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            core: Arc::new(ConsumerCore {
                queue,
                dispatcher,
                settings,
                running: AtomicBool::new(false),
                cycle_lock: tokio::sync::Mutex::new(()),
            }),
            timer: Mutex::new(None),
        }
    }

    /// 按队列配置构造，配置非法时返回错误
    pub fn from_config(
        config: &QueueConfig,
        queue: Arc<dyn QueueClient>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Result<Self, ConsumerError> {
        config.validate()?;
        Ok(Self::new(queue, dispatcher, ConsumerSettings::from(config)))
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.core.settings
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    /// 启动消费者
    ///
    /// 已在运行时返回 `None`。否则注册定时调度并执行首轮轮询，
    /// 首轮完成后返回其结果，后续轮询在后台继续。
    pub async fn start(&self) -> Option<PollReport> {
        {
            let mut timer = self.timer.lock();
            if self.core.running.load(Ordering::SeqCst) {
                warn!(queue = %self.core.settings.queue_name, "队列消费者已在运行");
                return None;
            }
            self.core.running.store(true, Ordering::SeqCst);

            if let Some(stale) = timer.take() {
                stale.cancel();
            }
            *timer = Some(PollTimer::spawn(self.core.clone()));
        }

        info!(
            queue = %self.core.settings.queue_name,
            max_messages = self.core.settings.max_messages,
            poll_interval_ms = self.core.settings.poll_interval.as_millis() as u64,
            "队列消费者已启动"
        );

        Some(self.core.poll_after_in_flight().await)
    }

    /// 停止消费者
    ///
    /// 未运行时返回 `false` 且不做任何事。不等待也不打断正在执行的轮询。
    pub fn stop(&self) -> bool {
        let mut timer = self.timer.lock();
        if !self.core.running.swap(false, Ordering::SeqCst) {
            return false;
        }

        if let Some(active) = timer.take() {
            active.cancel();
        }

        info!(queue = %self.core.settings.queue_name, "队列消费者已停止");
        true
    }

    /// 立即执行一轮轮询（与定时调度共用互斥，不会与其重叠）
    pub async fn poll_once(&self) -> PollReport {
        self.core.poll_if_idle().await
    }
}

impl Drop for QueueConsumer {
    fn drop(&mut self) {
        if let Some(active) = self.timer.get_mut().take() {
            active.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
