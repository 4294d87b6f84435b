use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use scheduler_core::{config::RunnerConfig, traits::TaskRepository};
use scheduler_runner::{CallbackRegistry, Runner};

use crate::handlers::{
    cron::web_cron,
    health::health_check,
    tasks::{
        create_task, delete_task, get_task, list_stuck_tasks, list_tasks, run_task, unlock_task,
        update_task,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub task_repo: Arc<dyn TaskRepository>,
    pub registry: Arc<CallbackRegistry>,
    pub runner_config: RunnerConfig,
    /// 设置后 `/cron` 必须携带相同的 `?key=`
    pub webcron_key: Option<String>,
}

impl AppState {
    /// 每次触发构造一个新的 `Runner`，注册表在多次触发之间共享
    pub fn runner(&self) -> Runner {
        Runner::new(
            self.task_repo.clone(),
            self.registry.clone(),
            self.runner_config.clone(),
        )
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // web-cron 触发入口
        .route("/cron", get(web_cron).post(web_cron))
        // 任务管理API
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/stuck", get(list_stuck_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/update", post(update_task))
        .route("/api/tasks/{id}/delete", post(delete_task))
        .route("/api/tasks/{id}/run", post(run_task))
        .route("/api/tasks/{id}/unlock", post(unlock_task))
        .with_state(state)
}
