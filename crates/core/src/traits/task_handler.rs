//! 任务处理器接口
//!
//! 处理器通过 `task_type()` 报告自己的类型键，由注册表在首次查找时统一发现并注册。

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{Task, TaskStatus, TaskStorage};
use crate::SchedulerResult;

/// 任务处理器
///
/// `invoke` 可以自由读写 `storage`，引擎会在运行结束后原样持久化。
/// 返回 `Err` 或发生 panic 都会被记录为 `EXCEPTION`；返回 `RUNNING` 或
/// `INITIAL_SCHEDULE` 会被记录为 `INVALID_EXIT`。
///
/// 需要跨多次调度调用完成的工作应把进度写入 `storage` 并返回 `WILL_RESUME`。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &str;

    /// 仅用于展示
    fn description(&self) -> &str;

    async fn invoke(&self, task: &Task, storage: &mut TaskStorage) -> SchedulerResult<TaskStatus>;
}

/// 处理器来源，注册表首次使用时扫描一次
pub trait HandlerSource: Send + Sync {
    fn name(&self) -> &str;

    /// 构造所有处理器；任何一个无法构造时返回 `HandlerDiscovery` 错误
    fn discover(&self) -> SchedulerResult<Vec<Arc<dyn TaskHandler>>>;
}
