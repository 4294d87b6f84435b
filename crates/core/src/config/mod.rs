//! 配置管理
//!
//! 配置按以下顺序合并，后者覆盖前者：
//!
//! 1. 内置默认值（每个键都有）
//! 2. TOML 配置文件
//! 3. `SCHEDULER__` 前缀的环境变量，层级之间用 `__` 分隔
//!
//! ```toml
//! [database]
//! url = "sqlite://scheduler.db?mode=rwc"
//!
//! [runner]
//! max_execution_seconds = 180
//! execution_bias_percent = 75
//! stuck_threshold_minutes = 3
//!
//! [handlers]
//! log_dir = "log"
//!
//! [api]
//! bind_address = "127.0.0.1:8080"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

pub mod models;

pub use models::*;
