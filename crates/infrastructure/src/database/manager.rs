use std::{str::FromStr, sync::Arc, time::Duration};

use scheduler_core::{
    config::DatabaseConfig,
    traits::{QueueRepository, TaskRepository},
    SchedulerError, SchedulerResult,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

use super::postgres::{self, PostgresQueueRepository, PostgresTaskRepository};
use super::sqlite::{self, SqliteQueueRepository, SqliteTaskRepository};

/// 数据库类型，按URL前缀识别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else {
            DatabaseType::SQLite
        }
    }
}

/// 连接池
#[derive(Clone)]
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

fn is_sqlite_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

impl DatabasePool {
    /// 按配置建立连接池
    ///
    /// 内存SQLite库只在单个连接内可见，所以强制使用一个永不过期的连接。
    pub async fn connect(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let acquire_timeout = Duration::from_secs(config.connection_timeout_seconds);

        match DatabaseType::from_url(&config.url) {
            DatabaseType::PostgreSQL => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.url)
                    .await?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let memory = is_sqlite_memory(&config.url);
                let mut options = SqliteConnectOptions::from_str(&config.url)?
                    .create_if_missing(true)
                    .busy_timeout(Duration::from_secs(5));
                if !memory {
                    options = options.journal_mode(SqliteJournalMode::Wal);
                }

                let pool_options = if memory {
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .min_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None)
                } else {
                    SqlitePoolOptions::new()
                        .max_connections(config.max_connections)
                        .min_connections(config.min_connections)
                };

                let pool = pool_options
                    .acquire_timeout(acquire_timeout)
                    .connect_with(options)
                    .await?;
                Ok(DatabasePool::SQLite(pool))
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn run_migrations(&self) -> SchedulerResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => postgres::run_migrations(pool).await,
            DatabasePool::SQLite(pool) => sqlite::run_migrations(pool).await,
        }
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }
}

/// 统一的数据库入口：建立连接、执行迁移并构造仓储
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    /// 连接数据库并执行迁移
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        config
            .validate()
            .map_err(|e| SchedulerError::Configuration(e.to_string()))?;

        let pool = DatabasePool::connect(config).await?;
        pool.run_migrations().await?;
        info!("数据库连接就绪: {:?}", pool.database_type());

        Ok(Self { pool })
    }

    /// 便捷构造：只给出URL，其余使用默认配置
    pub async fn from_url(url: &str) -> SchedulerResult<Self> {
        let config = DatabaseConfig {
            url: url.to_string(),
            ..DatabaseConfig::default()
        };
        Self::new(&config).await
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresTaskRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteTaskRepository::new(pool.clone())),
        }
    }

    pub fn queue_repository(&self) -> Arc<dyn QueueRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresQueueRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteQueueRepository::new(pool.clone())),
        }
    }
}
