//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{DeliveryError, Result};

/// 单次 receive 允许拉取的最大消息数（与 FIFO 队列服务端上限一致）
pub const MAX_BATCH_SIZE: usize = 10;

/// 队列消费配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 订单 FIFO 队列名
    pub name: String,
    /// 每轮轮询拉取的最大消息数
    pub max_messages: usize,
    /// 两轮轮询之间的间隔
    pub poll_interval_ms: u64,
    /// 已接收未删除的消息对其他消费者隐藏的时长（仅内存队列使用）
    pub visibility_timeout_secs: u64,
    /// 处理成功后删除失败时的额外重试次数，0 表示只尝试一次
    pub delete_max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "orders-queue.fifo".to_string(),
            max_messages: MAX_BATCH_SIZE,
            poll_interval_ms: 5_000,
            visibility_timeout_secs: 30,
            delete_max_retries: 0,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// 校验配置项取值范围
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DeliveryError::InvalidConfig {
                field: "queue.name".to_string(),
                message: "队列名不能为空".to_string(),
            });
        }
        if self.max_messages == 0 || self.max_messages > MAX_BATCH_SIZE {
            return Err(DeliveryError::InvalidConfig {
                field: "queue.max_messages".to_string(),
                message: format!("取值必须在 1..={MAX_BATCH_SIZE} 之间"),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(DeliveryError::InvalidConfig {
                field: "queue.poll_interval_ms".to_string(),
                message: "轮询间隔必须大于 0".to_string(),
            });
        }
        Ok(())
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub queue: QueueConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（DELIVERY_ 前缀，层级用双下划线，如 DELIVERY_QUEUE__MAX_MESSAGES -> queue.max_messages）
    pub fn load(service_name: &str) -> Result<Self> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::load_from(Path::new(&config_dir), service_name)
    }

    /// 从指定目录加载配置，文件层与环境变量层的顺序同 [`AppConfig::load`]
    pub fn load_from(config_dir: &Path, service_name: &str) -> Result<Self> {
        let env = std::env::var("DELIVERY_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            // 字段名本身含下划线，层级分隔符改用双下划线
            .add_source(
                Environment::with_prefix("DELIVERY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
