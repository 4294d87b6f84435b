use axum::extract::{Query, State};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct WebCronQuery {
    pub key: Option<String>,
}

/// web-cron 触发入口
///
/// 外部定时器（系统 cron、监控服务）周期性请求此地址，每次请求执行一轮调度。
/// 单个任务失败不影响响应状态，只有基础设施错误返回 500。
pub async fn web_cron(
    State(state): State<AppState>,
    Query(query): Query<WebCronQuery>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if let Some(expected) = state.webcron_key.as_deref() {
        if query.key.as_deref() != Some(expected) {
            warn!("web-cron 请求的密钥不匹配，已拒绝");
            return Err(ApiError::Forbidden);
        }
    }

    let summary = state.runner().run().await?;
    info!(
        "web-cron 调度完成: 执行 {} 个任务，失败 {} 个，待续 {} 个",
        summary.executed, summary.failed, summary.resumed
    );

    Ok(success(summary))
}
