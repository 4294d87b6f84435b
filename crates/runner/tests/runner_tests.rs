use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

use scheduler_core::{
    config::{DatabaseConfig, RunnerConfig},
    models::{RunOnce, Task, TaskStatus, TaskStorage},
    traits::{HandlerSource, TaskHandler, TaskRepository},
    CronScheduler, SchedulerError, SchedulerResult,
};
use scheduler_infrastructure::database::DatabaseManager;
use scheduler_runner::{CallbackRegistry, Runner};

/// 按闭包行为执行的测试处理器
struct FnHandler<F> {
    task_type: &'static str,
    behavior: F,
}

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(&Task, &mut TaskStorage) -> SchedulerResult<TaskStatus> + Send + Sync,
{
    fn task_type(&self) -> &str {
        self.task_type
    }

    fn description(&self) -> &str {
        "test handler"
    }

    async fn invoke(&self, task: &Task, storage: &mut TaskStorage) -> SchedulerResult<TaskStatus> {
        (self.behavior)(task, storage)
    }
}

fn handler<F>(task_type: &'static str, behavior: F) -> Arc<dyn TaskHandler>
where
    F: Fn(&Task, &mut TaskStorage) -> SchedulerResult<TaskStatus> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        task_type,
        behavior,
    })
}

struct SleepyHandler;

#[async_trait]
impl TaskHandler for SleepyHandler {
    fn task_type(&self) -> &str {
        "sleepy"
    }

    fn description(&self) -> &str {
        "sleeps longer than any budget"
    }

    async fn invoke(&self, _task: &Task, _storage: &mut TaskStorage) -> SchedulerResult<TaskStatus> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(TaskStatus::Ok)
    }
}

/// 执行期间删除自己的任务行
struct VanishingHandler {
    repo: Arc<dyn TaskRepository>,
}

#[async_trait]
impl TaskHandler for VanishingHandler {
    fn task_type(&self) -> &str {
        "vanishing"
    }

    fn description(&self) -> &str {
        "deletes its own row"
    }

    async fn invoke(&self, task: &Task, _storage: &mut TaskStorage) -> SchedulerResult<TaskStatus> {
        self.repo.delete(task.id).await?;
        Ok(TaskStatus::Ok)
    }
}

struct ListSource(Vec<Arc<dyn TaskHandler>>);

impl HandlerSource for ListSource {
    fn name(&self) -> &str {
        "test"
    }

    fn discover(&self) -> SchedulerResult<Vec<Arc<dyn TaskHandler>>> {
        Ok(self.0.clone())
    }
}

struct BrokenSource;

impl HandlerSource for BrokenSource {
    fn name(&self) -> &str {
        "broken"
    }

    fn discover(&self) -> SchedulerResult<Vec<Arc<dyn TaskHandler>>> {
        Err(SchedulerError::HandlerDiscovery("handler failed to construct".to_string()))
    }
}

fn standard_handlers() -> Vec<Arc<dyn TaskHandler>> {
    vec![
        handler("ok", |_, storage| {
            let runs = storage.get_as::<i64>("runs").unwrap_or(0);
            storage.set("runs", runs + 1)?;
            Ok(TaskStatus::Ok)
        }),
        handler("failing", |_, _| {
            Err(SchedulerError::task_execution("remote site unreachable"))
        }),
        handler("panicking", |_, _| panic!("handler exploded")),
        handler("reserved", |_, _| Ok(TaskStatus::Running)),
        handler("resumable", |task, storage| {
            let step = storage.get_as::<i64>("step").unwrap_or(0) + 1;
            storage.set("step", step)?;
            let total = task.param::<i64>("steps").unwrap_or(1);
            if step < total {
                Ok(TaskStatus::WillResume)
            } else {
                storage.set("step", 0)?;
                Ok(TaskStatus::Ok)
            }
        }),
        Arc::new(SleepyHandler),
    ]
}

async fn setup() -> (DatabaseManager, Arc<dyn TaskRepository>) {
    let manager = DatabaseManager::from_url("sqlite::memory:").await.unwrap();
    let repo = manager.task_repository();
    (manager, repo)
}

fn runner(repo: Arc<dyn TaskRepository>, handlers: Vec<Arc<dyn TaskHandler>>) -> Runner {
    let registry = Arc::new(CallbackRegistry::new().with_source(Arc::new(ListSource(handlers))));
    Runner::new(repo, registry, RunnerConfig::default()).with_instance_id("test:1")
}

async fn create_due(repo: &Arc<dyn TaskRepository>, task: Task) -> Task {
    let due = Utc::now() - chrono::Duration::minutes(1);
    repo.create(&task.with_next_execution(due)).await.unwrap()
}

#[tokio::test]
async fn test_successful_run_reschedules_from_completion() {
    let (_manager, repo) = setup().await;
    let task = create_due(&repo, Task::new("ok", "*/5 * * * *")).await;

    let summary = runner(repo.clone(), standard_handlers()).run().await.unwrap();
    assert_eq!(summary.executed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.count(TaskStatus::Ok), 1);

    let after = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(after.last_exit_code, TaskStatus::Ok);
    assert_eq!(after.times_executed, 1);
    assert_eq!(after.storage.get_as::<i64>("runs"), Some(1));
    assert!(!after.is_locked());

    let finished = after.last_run_end.unwrap();
    let expected = CronScheduler::new("*/5 * * * *")
        .unwrap()
        .next_execution_time(finished);
    assert_eq!(after.next_execution, expected);
    assert!(after.next_execution.unwrap() > finished);
}

#[tokio::test]
async fn test_unknown_type_records_no_routine_and_continues() {
    let (_manager, repo) = setup().await;
    let missing = create_due(&repo, Task::new("no-such-task", "0 * * * *").with_priority(5)).await;
    let ok = create_due(&repo, Task::new("ok", "0 * * * *")).await;

    let summary = runner(repo.clone(), standard_handlers()).run().await.unwrap();
    assert_eq!(summary.executed, 2);
    assert_eq!(summary.count(TaskStatus::NoRoutine), 1);
    assert_eq!(summary.count(TaskStatus::Ok), 1);

    let after = repo.get_by_id(missing.id).await.unwrap().unwrap();
    assert_eq!(after.last_exit_code, TaskStatus::NoRoutine);
    assert_eq!(after.times_failed, 1);
    assert!(after.storage.error().unwrap().contains("no-such-task"));
    assert!(after.enabled);

    let after = repo.get_by_id(ok.id).await.unwrap().unwrap();
    assert_eq!(after.last_exit_code, TaskStatus::Ok);
}

#[tokio::test]
async fn test_errors_and_panics_become_exception() {
    let (_manager, repo) = setup().await;
    let failing = create_due(&repo, Task::new("failing", "0 * * * *")).await;
    let panicking = create_due(&repo, Task::new("panicking", "0 * * * *")).await;

    let summary = runner(repo.clone(), standard_handlers()).run().await.unwrap();
    assert_eq!(summary.count(TaskStatus::Exception), 2);
    assert_eq!(summary.failed, 2);

    let after = repo.get_by_id(failing.id).await.unwrap().unwrap();
    assert_eq!(after.last_exit_code, TaskStatus::Exception);
    assert!(after.storage.error().unwrap().contains("remote site unreachable"));
    assert!(after.storage.trace().is_some());

    let after = repo.get_by_id(panicking.id).await.unwrap().unwrap();
    assert_eq!(after.last_exit_code, TaskStatus::Exception);
    assert!(after.storage.error().unwrap().contains("handler exploded"));
    assert!(after.storage.trace().unwrap().contains(&format!("#{}", panicking.id)));
    assert_eq!(after.times_failed, 1);
    // 失败的周期任务不会被自动禁用
    assert!(after.enabled);
}

#[tokio::test]
async fn test_success_clears_previous_error() {
    let (_manager, repo) = setup().await;
    let task = create_due(&repo, Task::new("flaky", "0 * * * *")).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let flaky = handler("flaky", move |_, storage| {
        storage.set("seen", true)?;
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(SchedulerError::task_execution("first attempt failed"))
        } else {
            Ok(TaskStatus::Ok)
        }
    });

    runner(repo.clone(), vec![flaky.clone()]).run().await.unwrap();
    let failed = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(failed.last_exit_code, TaskStatus::Exception);
    assert!(failed.storage.error().unwrap().contains("first attempt failed"));
    assert!(failed.storage.trace().is_some());

    assert!(repo.schedule_now(task.id, Utc::now()).await.unwrap());
    runner(repo.clone(), vec![flaky]).run().await.unwrap();

    let after = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(after.last_exit_code, TaskStatus::Ok);
    assert_eq!(after.storage.error(), None);
    assert_eq!(after.storage.trace(), None);
    assert_eq!(after.storage.get_as::<bool>("seen"), Some(true));
}

#[tokio::test]
async fn test_reserved_status_is_invalid_exit() {
    let (_manager, repo) = setup().await;
    let task = create_due(&repo, Task::new("reserved", "0 * * * *")).await;

    runner(repo.clone(), standard_handlers()).run().await.unwrap();
    let after = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(after.last_exit_code, TaskStatus::InvalidExit);
    assert_eq!(after.times_failed, 1);
}

#[tokio::test]
async fn test_will_resume_is_reclaimed_immediately() {
    let (_manager, repo) = setup().await;
    let task = create_due(
        &repo,
        Task::new("resumable", "0 0 1 1 *").with_params(json!({"steps": 3})),
    )
    .await;

    let summary = runner(repo.clone(), standard_handlers()).run().await.unwrap();
    assert_eq!(summary.executed, 3);
    assert_eq!(summary.resumed, 2);
    assert_eq!(summary.failed, 0);

    let after = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(after.last_exit_code, TaskStatus::Ok);
    assert_eq!(after.times_executed, 3);
    assert_eq!(after.times_failed, 0);
    assert_eq!(after.storage.get_as::<i64>("step"), Some(0));
    assert!(after.next_execution.unwrap() > Utc::now());
}

#[tokio::test]
async fn test_run_once_policies() {
    let (_manager, repo) = setup().await;
    let deleted = create_due(&repo, Task::new("ok", "* * * * *").with_run_once(RunOnce::Delete)).await;
    let disabled =
        create_due(&repo, Task::new("ok", "* * * * *").with_run_once(RunOnce::Disable)).await;

    let summary = runner(repo.clone(), standard_handlers()).run().await.unwrap();
    assert_eq!(summary.executed, 2);

    assert!(repo.get_by_id(deleted.id).await.unwrap().is_none());
    let after = repo.get_by_id(disabled.id).await.unwrap().unwrap();
    assert!(!after.enabled);

    // 被禁用之后不再被认领
    let summary = runner(repo.clone(), standard_handlers()).run().await.unwrap();
    assert_eq!(summary.executed, 0);
}

#[tokio::test]
async fn test_handler_exceeding_limit_times_out() {
    let (_manager, repo) = setup().await;
    let task = create_due(&repo, Task::new("sleepy", "0 * * * *")).await;

    let registry = Arc::new(
        CallbackRegistry::new().with_source(Arc::new(ListSource(standard_handlers()))),
    );
    let config = RunnerConfig {
        max_execution_seconds: 1,
        execution_bias_percent: 100,
        epsilon_millis: 100,
        ..RunnerConfig::default()
    };
    let summary = Runner::new(repo.clone(), registry, config).run().await.unwrap();
    assert_eq!(summary.count(TaskStatus::Timeout), 1);

    let after = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(after.last_exit_code, TaskStatus::Timeout);
    assert_eq!(after.times_failed, 1);
    assert!(!after.is_locked());
}

#[tokio::test]
async fn test_exhausted_budget_claims_nothing() {
    let (_manager, repo) = setup().await;
    let task = create_due(&repo, Task::new("ok", "0 * * * *")).await;

    let registry = Arc::new(
        CallbackRegistry::new().with_source(Arc::new(ListSource(standard_handlers()))),
    );
    let config = RunnerConfig {
        max_execution_seconds: 1,
        execution_bias_percent: 1,
        epsilon_millis: 500,
        ..RunnerConfig::default()
    };
    let summary = Runner::new(repo.clone(), registry, config).run().await.unwrap();
    assert_eq!(summary.executed, 0);

    let after = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(after.last_exit_code, TaskStatus::InitialSchedule);
    assert!(!after.is_locked());
}

#[tokio::test]
async fn test_discovery_failure_propagates_before_claiming() {
    let (_manager, repo) = setup().await;
    let task = create_due(&repo, Task::new("ok", "0 * * * *")).await;

    let registry = Arc::new(CallbackRegistry::new().with_source(Arc::new(BrokenSource)));
    let result = Runner::new(repo.clone(), registry, RunnerConfig::default())
        .run()
        .await;
    assert!(matches!(result, Err(SchedulerError::HandlerDiscovery(_))));

    let after = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert!(!after.is_locked());
}

#[tokio::test]
async fn test_vanished_task_is_counted_as_no_task() {
    let (_manager, repo) = setup().await;
    create_due(&repo, Task::new("vanishing", "0 * * * *")).await;

    let handlers: Vec<Arc<dyn TaskHandler>> = vec![Arc::new(VanishingHandler { repo: repo.clone() })];
    let summary = runner(repo.clone(), handlers).run().await.unwrap();
    assert_eq!(summary.vanished, 1);
    assert_eq!(summary.count(TaskStatus::NoTask), 1);
}

#[tokio::test]
async fn test_run_task_directly() {
    let (_manager, repo) = setup().await;
    let runner = runner(repo.clone(), standard_handlers());

    let execution = runner
        .run_task_directly("resumable", json!({"steps": 1}))
        .await
        .unwrap();
    assert_eq!(execution.status, TaskStatus::Ok);

    let execution = runner.run_task_directly("panicking", json!({})).await.unwrap();
    assert_eq!(execution.status, TaskStatus::Exception);

    assert!(matches!(
        runner.run_task_directly("no-such-task", json!({})).await,
        Err(SchedulerError::InvalidTaskType(_))
    ));

    // 直接执行不会写入任务表
    assert!(repo.list(&Default::default()).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runners_execute_each_task_once() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("runner.db").display()),
        max_connections: 2,
        ..DatabaseConfig::default()
    };

    let invocations: Arc<Mutex<HashMap<i64, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let total = Arc::new(AtomicUsize::new(0));

    let setup_manager = DatabaseManager::new(&config).await.unwrap();
    let repo = setup_manager.task_repository();
    for _ in 0..12 {
        create_due(&repo, Task::new("counted", "0 0 1 1 *")).await;
    }

    let mut runs = Vec::new();
    for index in 0..3 {
        let manager = DatabaseManager::new(&config).await.unwrap();
        let invocations = invocations.clone();
        let total = total.clone();
        let counted = handler("counted", move |task, _| {
            *invocations.lock().unwrap().entry(task.id).or_insert(0) += 1;
            total.fetch_add(1, Ordering::SeqCst);
            Ok(TaskStatus::Ok)
        });
        let runner = runner(manager.task_repository(), vec![counted])
            .with_instance_id(format!("process:{index}"));
        runs.push(tokio::spawn(async move {
            let summary = runner.run().await.unwrap();
            drop(manager);
            summary.executed
        }));
    }

    let mut executed = 0;
    for run in runs {
        executed += run.await.unwrap();
    }

    assert_eq!(executed, 12);
    assert_eq!(total.load(Ordering::SeqCst), 12);
    let invocations = invocations.lock().unwrap();
    assert_eq!(invocations.len(), 12);
    assert!(invocations.values().all(|count| *count == 1));
}
