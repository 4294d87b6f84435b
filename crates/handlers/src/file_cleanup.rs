use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info, warn};

use scheduler_core::{
    models::{QueueFilter, Task, TaskStatus, TaskStorage},
    traits::{QueueRepository, TaskHandler},
    SchedulerError, SchedulerResult,
};
use scheduler_runner::WorkQueue;

pub const FILE_CLEANUP_TYPE: &str = "file_cleanup";

const PHASE_KEY: &str = "phase";
const DELETED_KEY: &str = "deleted";
const PHASE_SCAN: &str = "scan";
const PHASE_DELETE: &str = "delete";

#[derive(Debug, Clone, Deserialize)]
struct CleanupParams {
    directory: String,
    #[serde(default = "default_max_age_days")]
    max_age_days: u64,
    #[serde(default)]
    pattern: Option<String>,
}

fn default_max_age_days() -> u64 {
    30
}

/// 过期文件清理
///
/// 第一次调用扫描目录，把每个过期文件作为一个队列项写入 `file_cleanup.<任务ID>`；
/// 之后每次调用最多删除 `batch_size` 个文件。队列未清空时在 `storage` 中记录进度
/// 并返回 `WILL_RESUME`，清空后重置阶段并返回 `OK`。
pub struct FileCleanupHandler {
    queue_repo: Arc<dyn QueueRepository>,
    batch_size: usize,
}

impl FileCleanupHandler {
    pub fn new(queue_repo: Arc<dyn QueueRepository>, batch_size: usize) -> Self {
        Self {
            queue_repo,
            batch_size: batch_size.max(1),
        }
    }

    pub fn queue_identifier(task_id: i64) -> String {
        format!("{FILE_CLEANUP_TYPE}.{task_id}")
    }

    /// 列出目录（不递归）下修改时间早于截止时间且匹配后缀的文件
    async fn expired_files(params: &CleanupParams) -> SchedulerResult<Vec<PathBuf>> {
        let dir = Path::new(&params.directory);
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(params.max_age_days.saturating_mul(86_400)))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut entries = fs::read_dir(dir).await.map_err(|e| {
            SchedulerError::task_execution(format!("无法读取目录 {}: {e}", dir.display()))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SchedulerError::task_execution(e.to_string()))?
        {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            if let Some(pattern) = &params.pattern {
                let matches = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(pattern.as_str()));
                if !matches {
                    continue;
                }
            }
            let expired = metadata.modified().map(|m| m <= cutoff).unwrap_or(false);
            if expired {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl TaskHandler for FileCleanupHandler {
    fn task_type(&self) -> &str {
        FILE_CLEANUP_TYPE
    }

    fn description(&self) -> &str {
        "分批删除目录中的过期文件"
    }

    async fn invoke(&self, task: &Task, storage: &mut TaskStorage) -> SchedulerResult<TaskStatus> {
        let params: CleanupParams = serde_json::from_value(task.params.clone())
            .map_err(|e| SchedulerError::invalid_params(format!("清理任务参数无效: {e}")))?;

        let queue = WorkQueue::new(Self::queue_identifier(task.id), self.queue_repo.clone())?;
        let phase = storage
            .get_as::<String>(PHASE_KEY)
            .unwrap_or_else(|| PHASE_SCAN.to_string());

        let mut deleted = if phase == PHASE_DELETE {
            storage.get_as::<u64>(DELETED_KEY).unwrap_or(0)
        } else {
            // 上一次扫描后进程可能中途退出，丢弃残留的项后重新入队
            let stale = queue.clear(&QueueFilter::new()).await?;
            if stale > 0 {
                debug!("{} 丢弃上次扫描残留的 {} 项", task.entity_description(), stale);
            }
            let files = Self::expired_files(&params).await?;
            for file in &files {
                queue
                    .push_data("file", &file.to_string_lossy(), task.site_id, None)
                    .await?;
            }
            info!("{} 发现 {} 个过期文件", task.entity_description(), files.len());
            0
        };

        for _ in 0..self.batch_size {
            let Some(item) = queue.pop(Utc::now()).await? else {
                break;
            };
            let path = item.data_as::<String>()?;
            match fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("文件已不存在: {}", path);
                }
                Err(e) => warn!("删除文件失败 {}: {}", path, e),
            }
        }

        let remaining = queue.count().await?;
        if remaining > 0 {
            storage.set(PHASE_KEY, PHASE_DELETE)?;
            storage.set(DELETED_KEY, deleted)?;
            debug!("{} 还剩 {} 个文件，稍后继续", task.entity_description(), remaining);
            return Ok(TaskStatus::WillResume);
        }

        storage.set(PHASE_KEY, PHASE_SCAN)?;
        storage.set(DELETED_KEY, deleted)?;
        info!("{} 清理完成，共删除 {} 个文件", task.entity_description(), deleted);
        Ok(TaskStatus::Ok)
    }
}
