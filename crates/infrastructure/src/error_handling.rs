//! 仓储操作的错误处理
//!
//! 为每一次数据库操作附带操作类型和实体信息，统一生成错误消息并记录结构化日志。

use chrono::{DateTime, Utc};
use scheduler_core::SchedulerError;
use sqlx::Error as SqlxError;
use std::fmt;
use tracing::{debug, error, instrument};

/// Operation context for repository operations
#[derive(Debug, Clone)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Claim,
    Complete,
    Push,
    Pop,
    Clear,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Query => write!(f, "查询"),
            RepositoryOperation::Claim => write!(f, "认领"),
            RepositoryOperation::Complete => write!(f, "完成"),
            RepositoryOperation::Push => write!(f, "入队"),
            RepositoryOperation::Pop => write!(f, "出队"),
            RepositoryOperation::Clear => write!(f, "清空"),
        }
    }
}

/// Context information for task repository operations
#[derive(Debug, Clone)]
pub struct TaskOperationContext {
    pub operation: RepositoryOperation,
    pub task_id: Option<i64>,
    pub task_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub additional_info: Option<String>,
}

impl TaskOperationContext {
    pub fn new(operation: RepositoryOperation) -> Self {
        Self {
            operation,
            task_id: None,
            task_type: None,
            timestamp: Utc::now(),
            additional_info: None,
        }
    }

    pub fn with_task_id(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_task_type(mut self, task_type: String) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_additional_info(mut self, info: String) -> Self {
        self.additional_info = Some(info);
        self
    }

    pub fn entity_description(&self) -> String {
        match (&self.task_id, &self.task_type) {
            (Some(id), Some(task_type)) => format!("任务 #{id} ({task_type})"),
            (Some(id), None) => format!("任务 #{id}"),
            (None, Some(task_type)) => format!("{task_type} 类型的任务"),
            (None, None) => "任务".to_string(),
        }
    }
}

/// Context information for work queue operations
#[derive(Debug, Clone)]
pub struct QueueOperationContext {
    pub operation: RepositoryOperation,
    pub queue_identifier: String,
    pub queue_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl QueueOperationContext {
    pub fn new(operation: RepositoryOperation, queue_identifier: &str) -> Self {
        Self {
            operation,
            queue_identifier: queue_identifier.to_string(),
            queue_type: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_queue_type(mut self, queue_type: String) -> Self {
        self.queue_type = Some(queue_type);
        self
    }

    pub fn entity_description(&self) -> String {
        match &self.queue_type {
            Some(queue_type) => format!("队列 '{}' ({})", self.queue_identifier, queue_type),
            None => format!("队列 '{}'", self.queue_identifier),
        }
    }
}

/// Enhanced error helpers for repository operations
pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    fn describe_sqlx_error(operation_desc: &str, entity_desc: &str, error: &SqlxError) -> String {
        match error {
            SqlxError::Database(db_error) => match db_error.constraint() {
                Some(constraint) => {
                    format!("{operation_desc}{entity_desc}时发生数据库约束冲突: {constraint}")
                }
                None => format!("{operation_desc}{entity_desc}时发生数据库错误: {db_error}"),
            },
            SqlxError::PoolClosed => format!("{operation_desc}{entity_desc}时数据库连接池已关闭"),
            SqlxError::PoolTimedOut => format!("{operation_desc}{entity_desc}时数据库连接池超时"),
            SqlxError::Io(io_error) => {
                format!("{operation_desc}{entity_desc}时发生I/O错误: {io_error}")
            }
            _ => format!("{operation_desc}{entity_desc}时发生未知数据库错误: {error}"),
        }
    }

    /// Create a database error with task context
    #[instrument(skip_all, fields(
        operation = %context.operation,
        task_id = ?context.task_id,
        task_type = ?context.task_type,
        timestamp = %context.timestamp,
    ))]
    pub fn task_database_error(context: TaskOperationContext, error: SqlxError) -> SchedulerError {
        let error_msg = Self::describe_sqlx_error(
            &context.operation.to_string(),
            &context.entity_description(),
            &error,
        );

        error!(error = %error, "{}", error_msg);
        SchedulerError::DatabaseOperation(error_msg)
    }

    /// Create a database error with queue context
    #[instrument(skip_all, fields(
        operation = %context.operation,
        queue = %context.queue_identifier,
        queue_type = ?context.queue_type,
    ))]
    pub fn queue_database_error(context: QueueOperationContext, error: SqlxError) -> SchedulerError {
        let error_msg = Self::describe_sqlx_error(
            &context.operation.to_string(),
            &context.entity_description(),
            &error,
        );

        error!(error = %error, "{}", error_msg);
        SchedulerError::DatabaseOperation(error_msg)
    }

    /// Create a serialization error with task context
    pub fn task_serialization_error(
        context: TaskOperationContext,
        error: impl fmt::Display,
    ) -> SchedulerError {
        let error_msg = format!(
            "{}{}时序列化失败: {}",
            context.operation,
            context.entity_description(),
            error
        );

        error!("{}", error_msg);
        SchedulerError::Serialization(error_msg)
    }

    /// Create a task not found error with context
    pub fn task_not_found(context: TaskOperationContext) -> SchedulerError {
        let entity_desc = context.entity_description();
        debug!("{}{}时未找到: {} 不存在", context.operation, entity_desc, entity_desc);
        SchedulerError::TaskNotFound {
            id: context.task_id.unwrap_or(0),
        }
    }

    /// Log a successful repository operation
    pub fn log_operation_success(
        context: TaskOperationContext,
        entity_description: &str,
        details: Option<&str>,
    ) {
        match details {
            Some(details) => debug!(
                "{}{}成功: {}",
                context.operation, entity_description, details
            ),
            None => debug!("{}{}成功", context.operation, entity_description),
        }
    }
}

/// Macro for creating task operation context easily
#[macro_export]
macro_rules! task_context {
    ($operation:expr) => {
        $crate::error_handling::TaskOperationContext::new($operation)
    };
    ($operation:expr, task_id = $task_id:expr) => {
        $crate::error_handling::TaskOperationContext::new($operation).with_task_id($task_id)
    };
    ($operation:expr, task_id = $task_id:expr, task_type = $task_type:expr) => {
        $crate::error_handling::TaskOperationContext::new($operation)
            .with_task_id($task_id)
            .with_task_type($task_type.to_string())
    };
}

/// Macro for creating queue operation context easily
#[macro_export]
macro_rules! queue_context {
    ($operation:expr, queue = $queue:expr) => {
        $crate::error_handling::QueueOperationContext::new($operation, $queue)
    };
    ($operation:expr, queue = $queue:expr, queue_type = $queue_type:expr) => {
        $crate::error_handling::QueueOperationContext::new($operation, $queue)
            .with_queue_type($queue_type.to_string())
    };
}
