use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use scheduler_core::{
    models::{Task, TaskStatus, TaskStorage},
    traits::{HandlerSource, TaskHandler},
    SchedulerError, SchedulerResult,
};

/// 固定返回某个状态的处理器
pub struct StaticHandler {
    task_type: String,
    description: String,
    status: TaskStatus,
}

impl StaticHandler {
    pub fn arc(task_type: &str, status: TaskStatus) -> Arc<dyn TaskHandler> {
        Arc::new(Self {
            task_type: task_type.to_string(),
            description: format!("static handler returning {status}"),
            status,
        })
    }
}

#[async_trait]
impl TaskHandler for StaticHandler {
    fn task_type(&self) -> &str {
        &self.task_type
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, _task: &Task, _storage: &mut TaskStorage) -> SchedulerResult<TaskStatus> {
        Ok(self.status)
    }
}

/// 返回固定处理器列表并记录扫描次数
pub struct StaticSource {
    handlers: Vec<Arc<dyn TaskHandler>>,
    pub scans: AtomicUsize,
}

impl StaticSource {
    pub fn new(handlers: Vec<Arc<dyn TaskHandler>>) -> Self {
        Self {
            handlers,
            scans: AtomicUsize::new(0),
        }
    }
}

impl HandlerSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    fn discover(&self) -> SchedulerResult<Vec<Arc<dyn TaskHandler>>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(self.handlers.clone())
    }
}

pub struct FailingSource;

impl HandlerSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    fn discover(&self) -> SchedulerResult<Vec<Arc<dyn TaskHandler>>> {
        Err(SchedulerError::Configuration("missing handler directory".to_string()))
    }
}
