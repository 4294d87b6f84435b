use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use scheduler_core::models::{
    CompletionPlan, Disposition, RunOnce, Task, TaskFilter, TaskStatus, TaskStorage,
};
use scheduler_core::traits::{TaskRepository, FORCE_UNLOCK_MESSAGE};
use scheduler_core::{CronScheduler, SchedulerError, SchedulerResult};

/// 只实现调度原语的内存仓储，用来验证接口的默认方法
#[derive(Default)]
struct MemoryTaskRepository {
    tasks: Mutex<HashMap<i64, Task>>,
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut created = task.clone();
        created.id = tasks.len() as i64 + 1;
        if created.next_execution.is_none() {
            created.next_execution =
                CronScheduler::new(&created.cron_expression)?.next_execution_time(Utc::now());
        }
        tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self, _filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        Ok(self.tasks.lock().unwrap().values().cloned().collect())
    }

    async fn update(&self, task: &Task, _now: DateTime<Utc>) -> SchedulerResult<Task> {
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn delete(&self, id: i64) -> SchedulerResult<()> {
        self.tasks
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(SchedulerError::TaskNotFound { id })
    }

    async fn find_next_due_task(
        &self,
        now: DateTime<Utc>,
        locked_by: &str,
    ) -> SchedulerResult<Option<Task>> {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.values_mut().find(|task| task.is_due(now)) else {
            return Ok(None);
        };
        task.locked = Some(now);
        task.locked_by = Some(locked_by.to_string());
        task.last_exit_code = TaskStatus::Running;
        task.last_execution = Some(now);
        Ok(Some(task.clone()))
    }

    async fn complete_task(
        &self,
        task: &Task,
        status: TaskStatus,
        storage: &TaskStorage,
        finished_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        let plan = match tasks.get(&task.id) {
            Some(row) if row.is_locked() && row.locked == task.locked && row.locked_by == task.locked_by => {
                CompletionPlan::for_task(row, status, storage, finished_at)
            }
            _ => return Ok(false),
        };

        match plan.disposition {
            Disposition::Delete => {
                tasks.remove(&task.id);
            }
            Disposition::Reschedule {
                next_execution,
                enabled,
            } => {
                if let Some(row) = tasks.get_mut(&task.id) {
                    row.locked = None;
                    row.locked_by = None;
                    row.last_exit_code = plan.last_exit_code;
                    row.last_run_end = Some(plan.last_run_end);
                    row.times_executed = plan.times_executed;
                    row.times_failed = plan.times_failed;
                    row.storage = plan.storage;
                    row.next_execution = next_execution;
                    row.enabled = enabled;
                }
            }
        }
        Ok(true)
    }

    async fn find_stuck_tasks(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> SchedulerResult<Vec<Task>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| task.is_stuck(now, threshold))
            .cloned()
            .collect())
    }

    async fn schedule_now(&self, id: i64, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound { id })?;
        if task.is_locked() {
            return Ok(false);
        }
        task.next_execution = Some(now);
        Ok(true)
    }
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}

#[tokio::test]
async fn test_force_unlock_records_timeout_and_reschedules() {
    let repo = MemoryTaskRepository::default();
    let task = repo
        .create(&Task::new("report", "*/5 * * * *").with_next_execution(at(10, 0)))
        .await
        .unwrap();

    let claimed = repo.find_next_due_task(at(10, 0), "host:1").await.unwrap();
    assert!(claimed.is_some());

    let stuck = repo
        .find_stuck_tasks(at(10, 10), Duration::minutes(3))
        .await
        .unwrap();
    assert_eq!(stuck.len(), 1);

    assert!(repo.force_unlock(task.id, at(10, 11)).await.unwrap());

    let after = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert!(!after.is_locked());
    assert_eq!(after.last_exit_code, TaskStatus::Timeout);
    assert_eq!(after.times_executed, 1);
    assert_eq!(after.times_failed, 1);
    assert_eq!(after.storage.error(), Some(FORCE_UNLOCK_MESSAGE));
    assert_eq!(after.next_execution, Some(at(10, 15)));

    // 没有加锁的任务不需要解锁
    assert!(!repo.force_unlock(task.id, at(10, 12)).await.unwrap());
}

#[tokio::test]
async fn test_force_unlock_missing_task() {
    let repo = MemoryTaskRepository::default();
    let result = repo.force_unlock(42, at(10, 0)).await;
    assert!(matches!(result, Err(SchedulerError::TaskNotFound { id: 42 })));
}

#[tokio::test]
async fn test_run_once_delete_through_repository_contract() {
    let repo = MemoryTaskRepository::default();
    let task = repo
        .create(
            &Task::new("report", "0 * * * *")
                .with_run_once(RunOnce::Delete)
                .with_next_execution(at(9, 0)),
        )
        .await
        .unwrap();

    let claimed = repo
        .find_next_due_task(at(10, 0), "host:1")
        .await
        .unwrap()
        .unwrap();
    assert!(repo
        .complete_task(&claimed, TaskStatus::Ok, &TaskStorage::new(), at(10, 1))
        .await
        .unwrap());
    assert!(repo.get_by_id(task.id).await.unwrap().is_none());

    // 任务行已经消失，再次完成是无操作
    assert!(!repo
        .complete_task(&claimed, TaskStatus::Ok, &TaskStorage::new(), at(10, 2))
        .await
        .unwrap());
}
