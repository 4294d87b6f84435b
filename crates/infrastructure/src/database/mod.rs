//! 数据库访问层
//!
//! SQLite 与 PostgreSQL 两套仓储实现，通过 [`DatabaseManager`] 按URL选择。

pub mod manager;
pub mod mapping;
pub mod postgres;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::{PostgresQueueRepository, PostgresTaskRepository};
pub use sqlite::{SqliteQueueRepository, SqliteTaskRepository};
