//! 数据仓储层接口定义
//!
//! - `TaskRepository` - 任务的CRUD以及调度引擎需要的认领/完成原语
//! - `QueueRepository` - 按队列标识划分的持久化工作队列
//!
//! 所有实现都必须保证跨进程安全：同一个任务在任意时刻最多被一个进程认领，
//! 同一个队列项最多被一个调用方弹出。协调只通过共享数据库完成，不依赖进程内的锁。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::{QueueFilter, QueueItem, Task, TaskFilter, TaskStatus, TaskStorage};
use crate::{SchedulerError, SchedulerResult};

/// 操作员强制解锁时写入 `storage.error` 的信息
pub const FORCE_UNLOCK_MESSAGE: &str = "forcibly unlocked by operator";

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建任务；未指定 `next_execution` 时按 cron 表达式从当前时间计算
    async fn create(&self, task: &Task) -> SchedulerResult<Task>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>>;

    /// 只写入操作员可编辑的字段，cron 表达式变化时从 `now` 重新计算下次执行时间
    ///
    /// 锁字段、计数器和 `storage` 永远不会被这里修改。
    async fn update(&self, task: &Task, now: DateTime<Utc>) -> SchedulerResult<Task>;

    async fn delete(&self, id: i64) -> SchedulerResult<()>;

    /// 认领下一个到期任务
    ///
    /// 在一个原子操作内选出 `enabled`、未加锁、`next_execution <= now` 的任务
    /// （按 `priority DESC, next_execution ASC, id ASC` 排序），写入
    /// `locked = now`、`locked_by`、`last_exit_code = RUNNING`、`last_execution = now`
    /// 并返回。没有可认领的任务时返回 `Ok(None)`，这不是错误。
    async fn find_next_due_task(
        &self,
        now: DateTime<Utc>,
        locked_by: &str,
    ) -> SchedulerResult<Option<Task>>;

    /// 持久化一次运行的结果并释放锁
    ///
    /// 字段的计算见 [`CompletionPlan`](crate::models::CompletionPlan)。只有当行上的
    /// `locked`/`locked_by` 仍与 `task` 认领时的值相同才会写入；任务行已经消失、
    /// 已被解锁或被其他进程重新认领时返回 `Ok(false)`。
    async fn complete_task(
        &self,
        task: &Task,
        status: TaskStatus,
        storage: &TaskStorage,
        finished_at: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    /// 只读：列出加锁超过阈值且仍处于 RUNNING 的任务
    async fn find_stuck_tasks(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> SchedulerResult<Vec<Task>>;

    /// 将未加锁的任务的 `next_execution` 设为 `now`，使其立即到期
    ///
    /// 任务不存在时返回 `TaskNotFound`，任务正被执行时返回 `Ok(false)`。
    async fn schedule_now(&self, id: i64, now: DateTime<Utc>) -> SchedulerResult<bool>;

    /// 操作员强制解锁
    ///
    /// 以 `TIMEOUT` 结束当前运行（计为一次失败），在 `storage.error` 中留下记录，
    /// 然后按正常规则重新调度。任务没有被锁定时返回 `Ok(false)`。
    async fn force_unlock(&self, id: i64, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let task = self
            .get_by_id(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id })?;

        if !task.is_locked() {
            return Ok(false);
        }

        let mut storage = task.storage.clone();
        storage.set_error(FORCE_UNLOCK_MESSAGE, None);
        self.complete_task(&task, TaskStatus::Timeout, &storage, now)
            .await
    }
}

/// 工作队列仓储接口
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// 写入一项，`available_at` 之前不可被弹出；返回新行的ID
    async fn push(
        &self,
        queue_identifier: &str,
        item: &QueueItem,
        available_at: DateTime<Utc>,
    ) -> SchedulerResult<i64>;

    /// 原子地选出并删除最早可用的一项
    async fn pop(
        &self,
        queue_identifier: &str,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<QueueItem>>;

    /// 批量删除匹配的项，返回删除的行数
    async fn clear(&self, queue_identifier: &str, filter: &QueueFilter) -> SchedulerResult<u64>;

    async fn count(&self, queue_identifier: &str, filter: &QueueFilter) -> SchedulerResult<i64>;
}
