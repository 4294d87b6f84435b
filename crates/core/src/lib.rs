//! # scheduler-core
//!
//! 任务调度引擎的核心抽象：错误类型、配置、日志初始化、领域模型、
//! 5 字段 cron 适配以及仓储和处理器接口。

pub mod config;
pub mod cron_utils;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use cron_utils::CronScheduler;
pub use errors::*;
pub use logging::init_logging;
