//! # Scheduler API
//!
//! 任务调度引擎的HTTP接口，基于Axum构建。
//!
//! ## API 端点
//!
//! ### 触发
//! - `GET|POST /cron?key=` - web-cron 入口，执行一轮调度
//! - `POST /api/tasks/{id}/run` - 立即执行指定任务
//!
//! ### 任务管理
//! - `GET /api/tasks` - 任务列表（`site_id`、`task_type`、`enabled`、`page`、`page_size`）
//! - `POST /api/tasks` - 创建任务
//! - `GET /api/tasks/{id}` - 任务详情
//! - `POST /api/tasks/{id}/update` - 更新可编辑字段
//! - `POST /api/tasks/{id}/delete` - 删除任务
//!
//! ### 运维
//! - `GET /api/tasks/stuck` - 卡死的任务
//! - `POST /api/tasks/{id}/unlock` - 操作员强制解锁
//! - `GET /health` - 健康检查
//!
//! ## 响应格式
//!
//! ```json
//! {
//!   "success": true,
//!   "data": { "id": 1, "task_type": "log_rotate", "last_exit_code": "OK" },
//!   "message": null,
//!   "timestamp": "2026-01-01T00:00:00Z"
//! }
//! ```
//!
//! 错误响应使用同样的外层结构，`success` 为 false，并附带 `error_type`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
use routes::create_routes;
use scheduler_core::{
    config::{ApiConfig, RunnerConfig},
    traits::TaskRepository,
};
use scheduler_runner::CallbackRegistry;

pub use routes::AppState;

/// 创建完整的API应用
pub fn create_app(
    task_repo: Arc<dyn TaskRepository>,
    registry: Arc<CallbackRegistry>,
    runner_config: RunnerConfig,
    api_config: &ApiConfig,
) -> Router {
    let state = AppState {
        task_repo,
        registry,
        runner_config,
        webcron_key: api_config.webcron_key.clone(),
    };

    create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(cors_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
