//! 重试策略与执行器
//!
//! 为删除确认等幂等的队列操作提供有界的指数退避重试。
//! 轮询本身不重试：receive 失败直接交给下一轮调度。

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::DeliveryError;

// ---------------------------------------------------------------------------
// RetryPolicy — 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// 第 N 次重试前等待 `initial_delay * multiplier^N`，不超过 `max_delay`。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次执行）
    pub max_retries: u32,
    /// 首次重试前的等待时间
    pub initial_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 以默认退避参数构造指定重试次数的策略，0 表示只执行一次
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// 计算第 N 次重试的等待时间（attempt 从 0 开始）
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 已失败 attempt 次后是否还应继续重试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// retry_with_policy
// ---------------------------------------------------------------------------

/// 按策略重复执行一个幂等的队列操作
///
/// 只有 [`DeliveryError::is_retryable`] 判定为通信故障时才会再试。
pub async fn retry_with_policy<F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<(), DeliveryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), DeliveryError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(()) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "队列操作在重试后成功");
                }
                return Ok(());
            }
            Err(err) => err,
        };

        let retryable = err.is_retryable();
        if !retryable || !policy.should_retry(attempt) {
            if policy.max_retries > 0 {
                warn!(
                    operation = operation_name,
                    attempt,
                    retryable,
                    error = %err,
                    "队列操作放弃重试"
                );
            }
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "队列操作失败，退避后重试"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
