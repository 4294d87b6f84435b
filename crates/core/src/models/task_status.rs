use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// 任务运行结果状态
///
/// 每个值的含义是固定且完备的，报表层依赖这一点渲染状态。持久化时使用
/// `as_str()` 返回的大写名称，对外报告时可以使用 `code()` 的整数值。
///
/// | 值 | 含义 |
/// |---|---|
/// | `Ok` | 执行成功，按 cron 正常重新调度 |
/// | `Running` | 保留标记：正在执行（处理器不应返回） |
/// | `WillResume` | 处理器主动让出，尽快重新认领 |
/// | `NoLock` | 无法获取行锁 |
/// | `NoRun` | 处理器未能启动 |
/// | `NoRelease` | 无法持久化完成状态 |
/// | `Exception` | 执行期间出现未处理的错误或 panic |
/// | `Timeout` | 宿主进程的执行预算在处理器运行中耗尽 |
/// | `NoTask` | 认领之后任务行消失 |
/// | `NoRoutine` | 任务类型在处理器注册表中不存在 |
/// | `InvalidExit` / `NoExit` | 处理器没有给出有效的结果状态 |
/// | `InitialSchedule` | 哨兵：任务从未完成过一次运行 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Ok,
    Running,
    WillResume,
    NoLock,
    NoRun,
    NoRelease,
    Exception,
    Timeout,
    NoTask,
    NoRoutine,
    InvalidExit,
    NoExit,
    InitialSchedule,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 13] = [
        TaskStatus::Ok,
        TaskStatus::Running,
        TaskStatus::WillResume,
        TaskStatus::NoLock,
        TaskStatus::NoRun,
        TaskStatus::NoRelease,
        TaskStatus::Exception,
        TaskStatus::Timeout,
        TaskStatus::NoTask,
        TaskStatus::NoRoutine,
        TaskStatus::InvalidExit,
        TaskStatus::NoExit,
        TaskStatus::InitialSchedule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Ok => "OK",
            TaskStatus::Running => "RUNNING",
            TaskStatus::WillResume => "WILL_RESUME",
            TaskStatus::NoLock => "NO_LOCK",
            TaskStatus::NoRun => "NO_RUN",
            TaskStatus::NoRelease => "NO_RELEASE",
            TaskStatus::Exception => "EXCEPTION",
            TaskStatus::Timeout => "TIMEOUT",
            TaskStatus::NoTask => "NO_TASK",
            TaskStatus::NoRoutine => "NO_ROUTINE",
            TaskStatus::InvalidExit => "INVALID_EXIT",
            TaskStatus::NoExit => "NO_EXIT",
            TaskStatus::InitialSchedule => "INITIAL_SCHEDULE",
        }
    }

    /// 报告用的固定整数编码
    pub fn code(&self) -> i32 {
        match self {
            TaskStatus::InitialSchedule => -1,
            TaskStatus::Ok => 0,
            TaskStatus::Running => 1,
            TaskStatus::WillResume => 2,
            TaskStatus::NoLock => 100,
            TaskStatus::NoRun => 101,
            TaskStatus::NoRelease => 102,
            TaskStatus::Exception => 103,
            TaskStatus::Timeout => 104,
            TaskStatus::NoTask => 105,
            TaskStatus::NoRoutine => 106,
            TaskStatus::InvalidExit => 107,
            TaskStatus::NoExit => 108,
        }
    }

    /// 是否计入 `times_failed`
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            TaskStatus::Ok | TaskStatus::WillResume | TaskStatus::InitialSchedule
        )
    }

    /// 处理器可以合法返回的状态；`Running` 和 `InitialSchedule` 是引擎保留的标记
    pub fn is_valid_handler_exit(&self) -> bool {
        !matches!(self, TaskStatus::Running | TaskStatus::InitialSchedule)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| SchedulerError::Serialization(format!("无效的任务状态: {s}")))
    }
}
