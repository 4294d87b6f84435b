use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::debug;

use scheduler_core::{
    models::{QueueFilter, QueueItem},
    traits::QueueRepository,
    SchedulerError, SchedulerResult,
};

/// 绑定到单个队列标识的工作队列
///
/// 处理器用它把大批量工作拆分到多次调度调用中。队列标识与任务类型无关，
/// 通常由处理器按任务ID拼出，例如 `file_cleanup.42`。
#[derive(Clone)]
pub struct WorkQueue {
    identifier: String,
    repo: Arc<dyn QueueRepository>,
}

impl WorkQueue {
    pub fn new(identifier: impl Into<String>, repo: Arc<dyn QueueRepository>) -> SchedulerResult<Self> {
        let identifier = identifier.into();
        if identifier.trim().is_empty() {
            return Err(SchedulerError::InvalidQueuePayload(
                "队列标识不能为空".to_string(),
            ));
        }
        Ok(Self { identifier, repo })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// 入队，`not_before` 缺省为当前时间
    pub async fn push(
        &self,
        item: &QueueItem,
        not_before: Option<DateTime<Utc>>,
    ) -> SchedulerResult<i64> {
        let available_at = not_before.unwrap_or_else(Utc::now);
        let id = self.repo.push(&self.identifier, item, available_at).await?;
        counter!("scheduler_queue_push_total", "queue" => self.identifier.clone()).increment(1);
        Ok(id)
    }

    /// 构造队列项并入队
    pub async fn push_data<T: Serialize>(
        &self,
        queue_type: &str,
        data: &T,
        site_id: Option<i64>,
        not_before: Option<DateTime<Utc>>,
    ) -> SchedulerResult<i64> {
        let item = QueueItem::new(queue_type, data, site_id)?;
        self.push(&item, not_before).await
    }

    pub async fn pop(&self, now: DateTime<Utc>) -> SchedulerResult<Option<QueueItem>> {
        let item = self.repo.pop(&self.identifier, now).await?;
        if let Some(item) = &item {
            counter!("scheduler_queue_pop_total", "queue" => self.identifier.clone()).increment(1);
            debug!("队列 '{}' 弹出 #{}", self.identifier, item.id);
        }
        Ok(item)
    }

    pub async fn clear(&self, filter: &QueueFilter) -> SchedulerResult<u64> {
        self.repo.clear(&self.identifier, filter).await
    }

    pub async fn count(&self) -> SchedulerResult<i64> {
        self.repo.count(&self.identifier, &QueueFilter::new()).await
    }

    pub async fn count_by(&self, filter: &QueueFilter) -> SchedulerResult<i64> {
        self.repo.count(&self.identifier, filter).await
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("identifier", &self.identifier)
            .finish()
    }
}
