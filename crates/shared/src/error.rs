//! 统一错误处理模块
//!
//! 定义队列访问与配置加载共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施层错误类型
#[derive(Debug, Error)]
pub enum DeliveryError {
    // ==================== 队列错误 ====================
    /// 与队列服务通信失败（连接中断、服务端错误等），下一轮轮询会自然重试
    #[error("队列通信失败: {operation} - {message}")]
    Transport { operation: String, message: String },

    #[error("队列不存在: {queue}")]
    QueueNotFound { queue: String },

    /// 回执句柄是一次性的，删除后或可见性超时后即失效
    #[error("回执句柄无效或已过期: {receipt_handle}")]
    InvalidReceiptHandle { receipt_handle: String },

    // ==================== 配置错误 ====================
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    #[error("无效的配置项: {field} - {message}")]
    InvalidConfig { field: String, message: String },
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, DeliveryError>;

impl DeliveryError {
    /// 构造队列通信错误
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::QueueNotFound { .. } => "QUEUE_NOT_FOUND",
            Self::InvalidReceiptHandle { .. } => "INVALID_RECEIPT_HANDLE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
        }
    }

    /// 是否为可重试错误
    ///
    /// 失效的回执句柄重试也不会成功，只有通信类故障值得再试一次。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
