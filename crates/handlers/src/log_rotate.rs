use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use scheduler_core::{
    config::HandlersConfig,
    models::{Task, TaskStatus, TaskStorage},
    traits::TaskHandler,
    SchedulerError, SchedulerResult,
};

pub const LOG_ROTATE_TYPE: &str = "log_rotate";

/// 日志轮转
///
/// 目录中每个超过大小上限的 `*.log` 文件依次后移历史文件
/// （`name.log.N` → `name.log.N+1`，超出保留数量的被删除），再把当前文件移动为 `name.log.1`。
/// 参数 `log_dir` 可以覆盖配置中的目录。
pub struct LogRotateHandler {
    config: HandlersConfig,
}

impl LogRotateHandler {
    pub fn new(config: HandlersConfig) -> Self {
        Self { config }
    }

    /// 轮转目录下所有超限的日志文件，返回轮转的文件数
    pub async fn rotate_dir(&self, dir: &Path) -> SchedulerResult<usize> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("日志目录不存在，跳过轮转: {}", dir.display());
                return Ok(0);
            }
            Err(e) => return Err(io_error(dir, e)),
        };

        let mut rotated = 0;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
                continue;
            }

            let metadata = entry.metadata().await.map_err(|e| io_error(&path, e))?;
            if !metadata.is_file() || metadata.len() <= self.config.log_max_bytes {
                continue;
            }

            self.rotate_file(&path).await?;
            info!("日志已轮转: {} ({} 字节)", path.display(), metadata.len());
            rotated += 1;
        }

        Ok(rotated)
    }

    async fn rotate_file(&self, path: &Path) -> SchedulerResult<()> {
        let keep = self.config.log_keep_files.max(1);

        let oldest = numbered(path, keep);
        if fs::try_exists(&oldest).await.map_err(|e| io_error(&oldest, e))? {
            fs::remove_file(&oldest).await.map_err(|e| io_error(&oldest, e))?;
        }

        for n in (1..keep).rev() {
            let from = numbered(path, n);
            if fs::try_exists(&from).await.map_err(|e| io_error(&from, e))? {
                let to = numbered(path, n + 1);
                fs::rename(&from, &to).await.map_err(|e| io_error(&from, e))?;
            }
        }

        let first = numbered(path, 1);
        fs::rename(path, &first).await.map_err(|e| io_error(path, e))?;
        Ok(())
    }
}

/// `name.log` → `name.log.N`
fn numbered(path: &Path, n: u32) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

fn io_error(path: &Path, e: std::io::Error) -> SchedulerError {
    SchedulerError::task_execution(format!("{}: {e}", path.display()))
}

#[async_trait]
impl TaskHandler for LogRotateHandler {
    fn task_type(&self) -> &str {
        LOG_ROTATE_TYPE
    }

    fn description(&self) -> &str {
        "轮转超过大小上限的日志文件"
    }

    async fn invoke(&self, task: &Task, storage: &mut TaskStorage) -> SchedulerResult<TaskStatus> {
        let dir = task
            .param::<String>("log_dir")
            .unwrap_or_else(|| self.config.log_dir.clone());

        let rotated = self.rotate_dir(Path::new(&dir)).await?;
        storage.set("rotated", rotated)?;
        storage.clear_error();
        Ok(TaskStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn handler(max_bytes: u64, keep: u32) -> LogRotateHandler {
        LogRotateHandler::new(HandlersConfig {
            log_max_bytes: max_bytes,
            log_keep_files: keep,
            ..HandlersConfig::default()
        })
    }

    #[test]
    fn test_numbered_path() {
        assert_eq!(
            numbered(Path::new("/var/log/app.log"), 3),
            PathBuf::from("/var/log/app.log.3")
        );
    }

    #[tokio::test]
    async fn test_rotates_only_oversized_logs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.log"), vec![b'x'; 64]).unwrap();
        std::fs::write(dir.path().join("small.log"), b"ok").unwrap();
        std::fs::write(dir.path().join("big.txt"), vec![b'x'; 64]).unwrap();

        let rotated = handler(16, 3).rotate_dir(dir.path()).await.unwrap();
        assert_eq!(rotated, 1);
        assert!(!dir.path().join("big.log").exists());
        assert!(dir.path().join("big.log.1").exists());
        assert!(dir.path().join("small.log").exists());
        assert!(dir.path().join("big.txt").exists());
    }

    #[tokio::test]
    async fn test_shifts_history_and_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");
        std::fs::write(dir.path().join("app.log.1"), b"one").unwrap();
        std::fs::write(dir.path().join("app.log.2"), b"two").unwrap();

        std::fs::write(&log, vec![b'n'; 32]).unwrap();
        handler(8, 2).rotate_dir(dir.path()).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("app.log.1")).unwrap(), vec![b'n'; 32]);
        assert_eq!(std::fs::read(dir.path().join("app.log.2")).unwrap(), b"one");
        assert!(!dir.path().join("app.log.3").exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(handler(8, 2).rotate_dir(&missing).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invoke_uses_param_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("web.log"), vec![b'x'; 64]).unwrap();

        let task = Task::new(LOG_ROTATE_TYPE, "@daily")
            .with_params(json!({ "log_dir": dir.path().to_string_lossy() }));
        let mut storage = TaskStorage::new();
        let status = handler(16, 5).invoke(&task, &mut storage).await.unwrap();

        assert_eq!(status, TaskStatus::Ok);
        assert_eq!(storage.get_as::<usize>("rotated"), Some(1));
        assert!(dir.path().join("web.log.1").exists());
    }
}
