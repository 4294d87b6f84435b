use std::sync::Arc;

use scheduler_core::{
    config::HandlersConfig,
    traits::{HandlerSource, QueueRepository, TaskHandler},
    SchedulerError, SchedulerResult,
};

use crate::file_cleanup::FileCleanupHandler;
use crate::log_rotate::LogRotateHandler;

/// 内置处理器来源，注册表首次使用时构造全部内置处理器
pub struct BuiltinHandlers {
    config: HandlersConfig,
    queue_repo: Arc<dyn QueueRepository>,
}

impl BuiltinHandlers {
    pub fn new(config: HandlersConfig, queue_repo: Arc<dyn QueueRepository>) -> Self {
        Self { config, queue_repo }
    }
}

impl HandlerSource for BuiltinHandlers {
    fn name(&self) -> &str {
        "builtin"
    }

    fn discover(&self) -> SchedulerResult<Vec<Arc<dyn TaskHandler>>> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::HandlerDiscovery(format!("内置处理器配置无效: {e}")))?;

        Ok(vec![
            Arc::new(LogRotateHandler::new(self.config.clone())),
            Arc::new(FileCleanupHandler::new(
                self.queue_repo.clone(),
                self.config.cleanup_batch_size,
            )),
        ])
    }
}
