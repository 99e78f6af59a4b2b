//! 共享库
//!
//! 包含配送服务共用的配置、错误处理、日志初始化、事件模型和队列客户端等基础设施代码。

pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod queue;
pub mod retry;
