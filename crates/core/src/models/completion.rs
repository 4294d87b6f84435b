use chrono::{DateTime, Utc};

use super::{RunOnce, Task, TaskStatus, TaskStorage};
use crate::cron_utils::CronScheduler;

/// 完成之后任务行的处置方式
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// 保留任务行，写入新的下次执行时间；`None` 表示 cron 表达式无效，需要人工修正
    Reschedule {
        next_execution: Option<DateTime<Utc>>,
        enabled: bool,
    },
    /// `RunOnce::Delete` 的终态运行之后删除任务行
    Delete,
}

/// 一次运行结束后需要持久化的全部字段
///
/// 纯计算，不访问数据库；各个仓储实现都基于它生成完成语句，保证不同后端的语义一致。
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionPlan {
    pub last_exit_code: TaskStatus,
    pub last_run_end: DateTime<Utc>,
    pub times_executed: i64,
    pub times_failed: i64,
    pub storage: TaskStorage,
    pub disposition: Disposition,
}

impl CompletionPlan {
    pub fn for_task(
        task: &Task,
        status: TaskStatus,
        storage: &TaskStorage,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let mut storage = storage.clone();
        let times_executed = task.times_executed + 1;
        let times_failed = task.times_failed + i64::from(status.is_failure());

        let disposition = if status == TaskStatus::WillResume {
            // 续跑：立即重新可被认领，不应用一次性策略
            Disposition::Reschedule {
                next_execution: Some(finished_at),
                enabled: task.enabled,
            }
        } else if task.run_once == RunOnce::Delete {
            Disposition::Delete
        } else {
            let next_execution = match CronScheduler::new(&task.cron_expression) {
                Ok(cron) => cron.next_execution_time(finished_at),
                Err(e) => {
                    storage.set_error(e.to_string(), None);
                    None
                }
            };
            Disposition::Reschedule {
                next_execution,
                enabled: task.enabled && task.run_once != RunOnce::Disable,
            }
        };

        Self {
            last_exit_code: status,
            last_run_end: finished_at,
            times_executed,
            times_failed,
            storage,
            disposition,
        }
    }

    pub fn deletes_task(&self) -> bool {
        self.disposition == Disposition::Delete
    }

    /// 删除任务时返回 `None`
    pub fn next_execution(&self) -> Option<DateTime<Utc>> {
        match &self.disposition {
            Disposition::Reschedule { next_execution, .. } => *next_execution,
            Disposition::Delete => None,
        }
    }

    pub fn enabled(&self) -> bool {
        match &self.disposition {
            Disposition::Reschedule { enabled, .. } => *enabled,
            Disposition::Delete => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    fn claimed_task(cron: &str, run_once: RunOnce) -> Task {
        let mut task = Task::new("report", cron).with_run_once(run_once);
        task.id = 7;
        task.next_execution = Some(at(10, 0));
        task.locked = Some(at(10, 0));
        task.last_exit_code = TaskStatus::Running;
        task.times_executed = 4;
        task.times_failed = 1;
        task
    }

    #[test]
    fn test_ok_reschedules_from_completion_time() {
        let task = claimed_task("*/5 * * * *", RunOnce::None);
        let plan = CompletionPlan::for_task(&task, TaskStatus::Ok, &TaskStorage::new(), at(10, 2));

        assert_eq!(plan.next_execution(), Some(at(10, 5)));
        assert!(plan.enabled());
        assert_eq!(plan.times_executed, 5);
        assert_eq!(plan.times_failed, 1);
        assert_eq!(plan.last_run_end, at(10, 2));
    }

    #[test]
    fn test_missed_ticks_do_not_catch_up() {
        // 计划在 10:00 的任务到 10:17 才完成，下一次是 10:20，而不是 10:05
        let task = claimed_task("*/5 * * * *", RunOnce::None);
        let plan = CompletionPlan::for_task(&task, TaskStatus::Ok, &TaskStorage::new(), at(10, 17));
        assert_eq!(plan.next_execution(), Some(at(10, 20)));
    }

    #[test]
    fn test_failure_counting() {
        let task = claimed_task("*/5 * * * *", RunOnce::None);
        for status in TaskStatus::ALL {
            let plan = CompletionPlan::for_task(&task, status, &TaskStorage::new(), at(10, 2));
            assert_eq!(plan.times_executed, 5);
            let expected = if status.is_failure() { 2 } else { 1 };
            assert_eq!(plan.times_failed, expected, "状态 {status}");
        }
    }

    #[test]
    fn test_will_resume_is_immediately_eligible() {
        for run_once in [RunOnce::None, RunOnce::Disable, RunOnce::Delete] {
            let task = claimed_task("0 0 * * *", run_once);
            let plan =
                CompletionPlan::for_task(&task, TaskStatus::WillResume, &TaskStorage::new(), at(10, 2));
            assert_eq!(
                plan.disposition,
                Disposition::Reschedule {
                    next_execution: Some(at(10, 2)),
                    enabled: true,
                }
            );
        }
    }

    #[test]
    fn test_run_once_dispositions() {
        let delete = claimed_task("*/5 * * * *", RunOnce::Delete);
        let plan = CompletionPlan::for_task(&delete, TaskStatus::Ok, &TaskStorage::new(), at(10, 2));
        assert!(plan.deletes_task());

        let failed = CompletionPlan::for_task(&delete, TaskStatus::Exception, &TaskStorage::new(), at(10, 2));
        assert!(failed.deletes_task());

        let disable = claimed_task("*/5 * * * *", RunOnce::Disable);
        let plan = CompletionPlan::for_task(&disable, TaskStatus::Ok, &TaskStorage::new(), at(10, 2));
        assert!(!plan.deletes_task());
        assert!(!plan.enabled());
        assert_eq!(plan.next_execution(), Some(at(10, 5)));
    }

    #[test]
    fn test_invalid_cron_parks_task() {
        let task = claimed_task("not a cron", RunOnce::None);
        let mut storage = TaskStorage::new();
        storage.set("offset", 3).unwrap();

        let plan = CompletionPlan::for_task(&task, TaskStatus::Ok, &storage, at(10, 2));
        assert_eq!(plan.next_execution(), None);
        assert_eq!(plan.last_exit_code, TaskStatus::Ok);
        assert!(plan.storage.error().is_some());
        assert_eq!(plan.storage.get_as::<i32>("offset"), Some(3));
    }
}
