use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scheduler_core::SchedulerError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("请求冲突: {0}")]
    Conflict(String),

    #[error("web-cron 密钥不匹配")]
    Forbidden,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Scheduler(SchedulerError::TaskNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "TASK_NOT_FOUND")
            }
            ApiError::Scheduler(SchedulerError::InvalidCron { .. }) => {
                (StatusCode::BAD_REQUEST, "INVALID_CRON_EXPRESSION")
            }
            ApiError::Scheduler(SchedulerError::InvalidTaskType(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_TASK_TYPE")
            }
            ApiError::Scheduler(SchedulerError::InvalidTaskParams(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_TASK_PARAMS")
            }
            ApiError::Scheduler(SchedulerError::InvalidQueuePayload(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_QUEUE_PAYLOAD")
            }
            ApiError::Scheduler(SchedulerError::Serialization(_)) => {
                (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR")
            }
            ApiError::Scheduler(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();

        // 内部错误只记录日志，不把细节暴露给调用方
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("请求处理失败: {}", self);
            "系统内部错误".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "success": false,
            "data": null,
            "message": message,
            "error_type": error_type,
            "timestamp": chrono::Utc::now(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
