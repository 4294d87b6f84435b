use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinError;
use tracing::{debug, error, info, instrument, warn};

use scheduler_core::{
    config::RunnerConfig,
    models::{Task, TaskStatus, TaskStorage},
    traits::{TaskHandler, TaskRepository},
    SchedulerError, SchedulerResult,
};

use crate::registry::CallbackRegistry;

/// 一次 `Runner::run` 的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// 认领并执行的任务数
    pub executed: usize,
    /// 以失败状态结束的任务数
    pub failed: usize,
    /// 返回 `WILL_RESUME` 的任务数
    pub resumed: usize,
    /// 完成时任务行已经消失的任务数，这些运行记为 `NO_TASK`
    pub vanished: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
}

impl RunSummary {
    fn record(&mut self, status: TaskStatus) {
        self.executed += 1;
        if status.is_failure() {
            self.failed += 1;
        }
        if status == TaskStatus::WillResume {
            self.resumed += 1;
        }
        *self.by_status.entry(status).or_insert(0) += 1;
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// 单次处理器调用的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub status: TaskStatus,
    pub storage: TaskStorage,
    pub duration: Duration,
}

/// 在执行预算内循环认领、执行、完成到期任务
///
/// 每次调度调用（web-cron、CLI、手动触发）构造一个 `Runner` 并调用一次 [`Runner::run`]。
/// 多个进程可以同时运行，互斥完全由仓储的认领语义保证。
pub struct Runner {
    repo: Arc<dyn TaskRepository>,
    registry: Arc<CallbackRegistry>,
    config: RunnerConfig,
    instance_id: String,
}

impl Runner {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        registry: Arc<CallbackRegistry>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            repo,
            registry,
            config,
            instance_id: default_instance_id(),
        }
    }

    /// 覆盖写入 `locked_by` 的实例标识
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// 运行直到没有到期任务或者预算耗尽
    ///
    /// 任务级别的失败只记录在任务行上；仓储错误和处理器扫描失败会中止本次调用。
    #[instrument(skip(self), fields(instance = %self.instance_id))]
    pub async fn run(&self) -> SchedulerResult<RunSummary> {
        let started = Instant::now();
        let budget = self.config.budget();
        let epsilon = self.config.epsilon();
        let hard_limit = Duration::from_secs(self.config.max_execution_seconds);
        let mut summary = RunSummary::default();

        self.registry.discover().await?;
        info!("调度开始，执行预算 {:?}", budget);

        loop {
            let elapsed = started.elapsed();
            if budget.saturating_sub(elapsed) <= epsilon {
                debug!("执行预算即将耗尽，停止认领新任务");
                break;
            }

            let Some(task) = self
                .repo
                .find_next_due_task(Utc::now(), &self.instance_id)
                .await?
            else {
                debug!("没有到期任务");
                break;
            };

            let remaining = hard_limit.saturating_sub(started.elapsed());
            let execution = self.execute(&task, remaining).await?;
            let status = execution.status;

            let completed = self
                .repo
                .complete_task(&task, status, &execution.storage, Utc::now())
                .await?;

            if completed {
                summary.record(status);
                record_metrics(status, execution.duration);
            } else {
                warn!("{} 在完成前消失或已被重新认领", task.entity_description());
                summary.vanished += 1;
                summary.record(TaskStatus::NoTask);
                record_metrics(TaskStatus::NoTask, execution.duration);
            }
        }

        info!(
            "调度结束: 执行 {} 个任务，失败 {}，续跑 {}，耗时 {:?}",
            summary.executed,
            summary.failed,
            summary.resumed,
            started.elapsed()
        );
        Ok(summary)
    }

    /// 在调度循环之外直接执行一个处理器，使用内存中的临时任务
    ///
    /// 类型未注册时返回 `InvalidTaskType`。
    #[instrument(skip(self, params))]
    pub async fn run_task_directly(
        &self,
        handler_type: &str,
        params: Value,
    ) -> SchedulerResult<Execution> {
        let handler = self.registry.get(handler_type).await?;
        let task = Task::new(handler_type, "@daily").with_params(params);
        task.validate()?;

        let limit = Duration::from_secs(self.config.max_execution_seconds);
        let execution = invoke_handler(handler, &task, limit).await;
        record_metrics(execution.status, execution.duration);
        info!("直接执行 {} 结束: {}", handler_type, execution.status);
        Ok(execution)
    }

    /// 查找处理器并在异常边界内执行；只有处理器扫描失败会返回错误
    async fn execute(&self, task: &Task, limit: Duration) -> SchedulerResult<Execution> {
        let handler = match self.registry.get(&task.task_type).await {
            Ok(handler) => handler,
            Err(SchedulerError::InvalidTaskType(task_type)) => {
                error!("{} 没有对应的处理器", task.entity_description());
                let mut storage = task.storage.clone();
                storage.set_error(format!("未注册的任务类型: '{task_type}'"), None);
                return Ok(Execution {
                    status: TaskStatus::NoRoutine,
                    storage,
                    duration: Duration::ZERO,
                });
            }
            Err(e) => return Err(e),
        };

        Ok(invoke_handler(handler, task, limit).await)
    }
}

async fn invoke_handler(handler: Arc<dyn TaskHandler>, task: &Task, limit: Duration) -> Execution {
    let started = Instant::now();
    let owned_task = task.clone();
    let mut storage = task.storage.clone();

    let join = tokio::spawn(async move {
        let result = handler.invoke(&owned_task, &mut storage).await;
        (result, storage)
    });
    let abort = join.abort_handle();

    let (status, storage) = match tokio::time::timeout(limit, join).await {
        Ok(Ok((Ok(status), mut storage))) if status.is_valid_handler_exit() => {
            // 成功的运行不保留上一次失败留下的错误
            if status == TaskStatus::Ok {
                storage.clear_error();
            }
            (status, storage)
        }
        Ok(Ok((Ok(status), mut storage))) => {
            warn!("{} 返回了保留状态 {}", task.entity_description(), status);
            storage.set_error(format!("处理器返回了无效的状态: {status}"), None);
            (TaskStatus::InvalidExit, storage)
        }
        Ok(Ok((Err(e), mut storage))) => {
            warn!("{} 执行失败: {}", task.entity_description(), e);
            storage.set_error(
                e.to_string(),
                Some(format!("{}: {e:?}", task.entity_description())),
            );
            (TaskStatus::Exception, storage)
        }
        Ok(Err(join_error)) => join_failure(task, join_error),
        Err(_) => {
            abort.abort();
            warn!("{} 超出执行时间 {:?}", task.entity_description(), limit);
            let mut storage = task.storage.clone();
            storage.set_error(format!("处理器在 {limit:?} 内没有结束"), None);
            (TaskStatus::Timeout, storage)
        }
    };

    Execution {
        status,
        storage,
        duration: started.elapsed(),
    }
}

fn join_failure(task: &Task, join_error: JoinError) -> (TaskStatus, TaskStorage) {
    let mut storage = task.storage.clone();

    if join_error.is_panic() {
        let message = panic_message(join_error.into_panic());
        error!("{} panic: {}", task.entity_description(), message);
        storage.set_error(
            format!("处理器panic: {message}"),
            Some(format!("{} panicked: {message}", task.entity_description())),
        );
        (TaskStatus::Exception, storage)
    } else {
        warn!("{} 被取消", task.entity_description());
        storage.set_error("处理器在返回状态之前被取消", None);
        (TaskStatus::NoExit, storage)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn record_metrics(status: TaskStatus, duration: Duration) {
    counter!("scheduler_task_runs_total", "status" => status.as_str()).increment(1);
    if status.is_failure() {
        counter!("scheduler_task_failures_total").increment(1);
    }
    histogram!("scheduler_task_run_duration_seconds").record(duration.as_secs_f64());
}

/// `主机名:进程号`
fn default_instance_id() -> String {
    let host = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{host}:{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        summary.record(TaskStatus::Ok);
        summary.record(TaskStatus::WillResume);
        summary.record(TaskStatus::Exception);
        summary.record(TaskStatus::Exception);

        assert_eq!(summary.executed, 4);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.resumed, 1);
        assert_eq!(summary.count(TaskStatus::Exception), 2);
        assert_eq!(summary.count(TaskStatus::Timeout), 0);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("boom".to_string())), "boom");
        assert_eq!(panic_message(Box::new(42)), "unknown panic payload");
    }

    #[test]
    fn test_default_instance_id() {
        let id = default_instance_id();
        assert!(id.ends_with(&format!(":{}", std::process::id())));
    }
}
