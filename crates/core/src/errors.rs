use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("无效的任务类型: '{0}'")]
    InvalidTaskType(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的队列数据: {0}")]
    InvalidQueuePayload(String),

    #[error("任务处理器发现失败: {0}")]
    HandlerDiscovery(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn invalid_cron<E: std::fmt::Display>(expr: &str, err: E) -> Self {
        Self::InvalidCron {
            expr: expr.to_string(),
            message: err.to_string(),
        }
    }

    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }

    pub fn task_execution<S: Into<String>>(msg: S) -> Self {
        Self::TaskExecution(msg.into())
    }

    /// 致命错误：当前进程内无法恢复，应终止本次调度调用
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::HandlerDiscovery(_)
                | SchedulerError::Configuration(_)
                | SchedulerError::Internal(_)
        )
    }

    /// 可重试错误：下一次调度调用时通常可以成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_) | SchedulerError::DatabaseOperation(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
