use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{RunOnce, TaskStatus, TaskStorage};
use crate::cron_utils::CronScheduler;
use crate::{SchedulerError, SchedulerResult};

/// 任务定义
///
/// 表示一个可被调度的持久化工作单元，每个任务对应 `tasks` 表中的一行。
///
/// # 字段说明
///
/// - `id`: 任务的唯一标识符，创建前为 0
/// - `site_id`: 所属站点，`None` 表示系统级任务；只用于分组，不参与加锁逻辑
/// - `task_type`: 通过处理器注册表解析的类型键
/// - `cron_expression`: 5 字段 cron 表达式（分 时 日 月 周）
/// - `enabled`: 禁用的任务永远不会被认领
/// - `priority`: 多个任务同时到期时的排序依据，数值越大越优先
/// - `params`: 创建时提供的处理器参数，引擎不会修改
/// - `storage`: 处理器在多次调用之间保存状态的键值存储，引擎负责持久化
/// - `locked`: 被某个进程认领的时间，`None` 表示未加锁
/// - `locked_by`: 认领进程的标识（`主机名:pid`），仅用于诊断
/// - `last_exit_code`: 最近一次运行的结果状态
/// - `times_executed` / `times_failed`: 单调递增的计数器，只由引擎修改
///
/// # 使用示例
///
/// ```rust
/// use scheduler_core::models::{RunOnce, Task};
/// use serde_json::json;
///
/// let task = Task::new("log_rotate", "*/5 * * * *")
///     .with_priority(10)
///     .with_params(json!({"log_dir": "/var/log/console"}))
///     .with_run_once(RunOnce::None);
/// assert!(task.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub site_id: Option<i64>,
    pub task_type: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub priority: i32,
    pub params: serde_json::Value,
    pub storage: TaskStorage,
    pub locked: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_exit_code: TaskStatus,
    pub last_execution: Option<DateTime<Utc>>,
    pub last_run_end: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub times_executed: i64,
    pub times_failed: i64,
    pub run_once: RunOnce,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// 创建新任务，状态为 `InitialSchedule`
    pub fn new(task_type: impl Into<String>, cron_expression: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            site_id: None,
            task_type: task_type.into(),
            cron_expression: cron_expression.into(),
            enabled: true,
            priority: 0,
            params: serde_json::Value::Object(serde_json::Map::new()),
            storage: TaskStorage::new(),
            locked: None,
            locked_by: None,
            last_exit_code: TaskStatus::InitialSchedule,
            last_execution: None,
            last_run_end: None,
            next_execution: None,
            times_executed: 0,
            times_failed: 0,
            run_once: RunOnce::None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_site(mut self, site_id: i64) -> Self {
        self.site_id = Some(site_id);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_run_once(mut self, run_once: RunOnce) -> Self {
        self.run_once = run_once;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 显式指定首次执行时间；不指定时由仓储按 cron 表达式计算
    pub fn with_next_execution(mut self, next_execution: DateTime<Utc>) -> Self {
        self.next_execution = Some(next_execution);
        self
    }

    /// 校验操作员可编辑的字段
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.task_type.trim().is_empty() {
            return Err(SchedulerError::InvalidTaskType(self.task_type.clone()));
        }
        if !self.params.is_object() {
            return Err(SchedulerError::invalid_params("任务参数必须是JSON对象"));
        }
        CronScheduler::validate_cron_expression(&self.cron_expression)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    /// 任务是否在 `now` 时刻可以被认领
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && !self.is_locked()
            && self.next_execution.is_some_and(|next| next <= now)
    }

    /// 卡死检测：加锁时间超过阈值且记录的状态仍为 `Running`
    ///
    /// 只读判断，不会释放锁。
    pub fn is_stuck(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.locked {
            Some(locked_at) => {
                self.last_exit_code == TaskStatus::Running && now - locked_at > threshold
            }
            None => false,
        }
    }

    /// 读取并反序列化某个参数
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.params
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn entity_description(&self) -> String {
        format!("任务 #{} ({})", self.id, self.task_type)
    }
}

/// 任务过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub site_id: Option<i64>,
    pub task_type: Option<String>,
    pub enabled: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
