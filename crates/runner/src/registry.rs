use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

use scheduler_core::{
    traits::{HandlerSource, TaskHandler},
    SchedulerError, SchedulerResult,
};

/// 注册表中一个处理器的展示信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInfo {
    pub task_type: String,
    pub description: String,
}

/// 任务类型到处理器的映射
///
/// 每个进程构造一次并注入到 `Runner` 和各个入口中。第一次调用任何查找方法时
/// 扫描所有 [`HandlerSource`]；某个来源构造失败或者两个处理器报告了同一个类型时，
/// 扫描以 `HandlerDiscovery` 错误失败，下一次调用会重新尝试。
pub struct CallbackRegistry {
    sources: Vec<Arc<dyn HandlerSource>>,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    discovered: OnceCell<()>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            handlers: RwLock::new(HashMap::new()),
            discovered: OnceCell::new(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn HandlerSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// 触发处理器扫描；已经扫描成功时什么也不做
    pub async fn discover(&self) -> SchedulerResult<()> {
        self.discovered
            .get_or_try_init(|| async {
                let mut found: HashMap<String, Arc<dyn TaskHandler>> = HashMap::new();

                for source in &self.sources {
                    let handlers = source.discover().map_err(|e| match e {
                        SchedulerError::HandlerDiscovery(_) => e,
                        other => SchedulerError::HandlerDiscovery(format!(
                            "处理器来源 '{}' 扫描失败: {other}",
                            source.name()
                        )),
                    })?;

                    for handler in handlers {
                        let task_type = handler.task_type().trim().to_string();
                        if task_type.is_empty() {
                            return Err(SchedulerError::HandlerDiscovery(format!(
                                "处理器来源 '{}' 提供了一个没有任务类型的处理器",
                                source.name()
                            )));
                        }
                        if found.contains_key(&task_type) {
                            return Err(SchedulerError::HandlerDiscovery(format!(
                                "任务类型 '{task_type}' 被重复注册"
                            )));
                        }
                        debug!("发现处理器: {} ({})", task_type, source.name());
                        found.insert(task_type, handler);
                    }
                }

                let mut handlers = self.handlers.write().await;
                let count = found.len();
                for (task_type, handler) in found {
                    handlers.entry(task_type).or_insert(handler);
                }
                info!("处理器扫描完成，共发现 {} 个处理器", count);
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// 按类型查找处理器，类型为空或未注册时返回 `InvalidTaskType`
    pub async fn get(&self, task_type: &str) -> SchedulerResult<Arc<dyn TaskHandler>> {
        self.discover().await?;

        if task_type.trim().is_empty() {
            return Err(SchedulerError::InvalidTaskType(task_type.to_string()));
        }

        let handlers = self.handlers.read().await;
        handlers
            .get(task_type)
            .cloned()
            .ok_or_else(|| SchedulerError::InvalidTaskType(task_type.to_string()))
    }

    pub async fn has(&self, task_type: &str) -> SchedulerResult<bool> {
        self.discover().await?;
        Ok(self.handlers.read().await.contains_key(task_type))
    }

    /// 手动注册处理器，覆盖同名的已有处理器
    pub async fn add(
        &self,
        task_type: &str,
        handler: Arc<dyn TaskHandler>,
    ) -> SchedulerResult<()> {
        self.discover().await?;

        let task_type = task_type.trim();
        if task_type.is_empty() {
            return Err(SchedulerError::InvalidTaskType(task_type.to_string()));
        }

        self.handlers
            .write()
            .await
            .insert(task_type.to_string(), handler);
        Ok(())
    }

    /// 不存在时什么也不做
    pub async fn remove(&self, task_type: &str) -> SchedulerResult<()> {
        self.discover().await?;
        self.handlers.write().await.remove(task_type);
        Ok(())
    }

    /// 按类型排序的处理器列表
    pub async fn list(&self) -> SchedulerResult<Vec<HandlerInfo>> {
        self.discover().await?;

        let handlers = self.handlers.read().await;
        let mut infos: Vec<HandlerInfo> = handlers
            .iter()
            .map(|(task_type, handler)| HandlerInfo {
                task_type: task_type.clone(),
                description: handler.description().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.task_type.cmp(&b.task_type));
        Ok(infos)
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}
