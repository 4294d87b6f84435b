use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use scheduler_core::{
    models::{RunOnce, Task, TaskFilter},
    SchedulerError,
};
use scheduler_runner::RunSummary;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success, success_with_message},
    routes::AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

/// 任务创建请求
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub site_id: Option<i64>,
    pub task_type: String,
    pub cron_expression: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    pub params: Option<Value>,
    #[serde(default)]
    pub run_once: RunOnce,
}

fn default_enabled() -> bool {
    true
}

/// 任务更新请求，未提供的字段保持不变
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    /// 缺省时不变；显式的 `null` 把任务改为系统级任务
    #[serde(default, deserialize_with = "present")]
    pub site_id: Option<Option<i64>>,
    pub task_type: Option<String>,
    pub cron_expression: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
    pub params: Option<Value>,
    pub run_once: Option<RunOnce>,
}

/// 区分“字段缺省”和“字段为 null”：只要字段出现就包一层 `Some`
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct TaskQueryParams {
    pub site_id: Option<i64>,
    pub task_type: Option<String>,
    pub enabled: Option<bool>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl TaskQueryParams {
    fn into_filter(self) -> ApiResult<TaskFilter> {
        let page = self.page.unwrap_or(1);
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page < 1 {
            return Err(ApiError::BadRequest("page 必须从 1 开始".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ApiError::BadRequest(format!(
                "page_size 必须在 1 到 {MAX_PAGE_SIZE} 之间"
            )));
        }

        Ok(TaskFilter {
            site_id: self.site_id,
            task_type: self.task_type,
            enabled: self.enabled,
            limit: Some(page_size),
            offset: Some((page - 1) * page_size),
        })
    }
}

/// 手动触发的结果；任务按 RunOnce 策略被删除时 `task` 为空
#[derive(Debug, Serialize)]
pub struct RunNowResponse {
    pub summary: RunSummary,
    pub task: Option<Task>,
}

async fn ensure_handler_exists(state: &AppState, task_type: &str) -> ApiResult<()> {
    if !state.registry.has(task_type).await? {
        return Err(SchedulerError::InvalidTaskType(task_type.to_string()).into());
    }
    Ok(())
}

async fn load_task(state: &AppState, id: i64) -> ApiResult<Task> {
    state
        .task_repo
        .get_by_id(id)
        .await?
        .ok_or_else(|| SchedulerError::TaskNotFound { id }.into())
}

/// 创建任务
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    ensure_handler_exists(&state, &request.task_type).await?;

    let mut task = Task::new(request.task_type, request.cron_expression)
        .with_enabled(request.enabled)
        .with_priority(request.priority)
        .with_run_once(request.run_once);
    task.site_id = request.site_id;
    if let Some(params) = request.params {
        task = task.with_params(params);
    }

    let task = state.task_repo.create(&task).await?;
    info!("通过API创建{}", task.entity_description());
    Ok(created(task))
}

/// 获取任务列表
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let filter = params.into_filter()?;
    let tasks = state.task_repo.list(&filter).await?;
    Ok(success(tasks))
}

/// 获取单个任务
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(load_task(&state, id).await?))
}

/// 更新任务
pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateTaskRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let mut task = load_task(&state, id).await?;

    if let Some(task_type) = request.task_type {
        if task_type != task.task_type {
            ensure_handler_exists(&state, &task_type).await?;
        }
        task.task_type = task_type;
    }
    if let Some(site_id) = request.site_id {
        task.site_id = site_id;
    }
    if let Some(cron_expression) = request.cron_expression {
        task.cron_expression = cron_expression;
    }
    if let Some(enabled) = request.enabled {
        task.enabled = enabled;
    }
    if let Some(priority) = request.priority {
        task.priority = priority;
    }
    if let Some(params) = request.params {
        task.params = params;
    }
    if let Some(run_once) = request.run_once {
        task.run_once = run_once;
    }

    let task = state.task_repo.update(&task, Utc::now()).await?;
    info!("通过API更新{}", task.entity_description());
    Ok(success(task))
}

/// 删除任务
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    state.task_repo.delete(id).await?;
    info!("通过API删除任务 #{}", id);
    Ok(success_with_message(id, "任务已删除"))
}

/// 立即执行
///
/// 把任务标记为立即到期，然后执行一轮正常的调度，任务仍然经过认领流程。
pub async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if !state.task_repo.schedule_now(id, Utc::now()).await? {
        return Err(ApiError::Conflict(format!("任务 #{id} 正在执行")));
    }

    let summary = state.runner().run().await?;
    let task = state.task_repo.get_by_id(id).await?;
    info!("手动触发任务 #{} 完成，本轮执行 {} 个任务", id, summary.executed);

    Ok(success(RunNowResponse { summary, task }))
}

/// 强制解锁卡死的任务
pub async fn unlock_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if !state.task_repo.force_unlock(id, Utc::now()).await? {
        return Err(ApiError::Conflict(format!("任务 #{id} 没有被锁定")));
    }

    let task = state.task_repo.get_by_id(id).await?;
    info!("操作员通过API强制解锁任务 #{}", id);
    Ok(success_with_message(task, "任务已解锁"))
}

/// 列出卡死的任务
pub async fn list_stuck_tasks(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let tasks = state
        .task_repo
        .find_stuck_tasks(Utc::now(), state.runner_config.stuck_threshold())
        .await?;
    Ok(success(tasks))
}
