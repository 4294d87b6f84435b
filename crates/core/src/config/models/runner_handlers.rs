use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 调度执行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// 一次调度调用允许占用的最长时间
    pub max_execution_seconds: u64,
    /// 实际使用的预算比例（百分比），为宿主进程的收尾留出余量
    pub execution_bias_percent: u8,
    /// 加锁超过该时长且仍为 RUNNING 的任务视为卡死
    pub stuck_threshold_minutes: u64,
    /// 剩余预算小于该值时不再认领新任务
    pub epsilon_millis: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_execution_seconds: 180,
            execution_bias_percent: 75,
            stuck_threshold_minutes: 3,
            epsilon_millis: 500,
        }
    }
}

impl RunnerConfig {
    /// 本次调用的执行预算：`max_execution_seconds * execution_bias_percent / 100`
    pub fn budget(&self) -> Duration {
        let millis = u128::from(self.max_execution_seconds) * 1000
            * u128::from(self.execution_bias_percent)
            / 100;
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    pub fn epsilon(&self) -> Duration {
        Duration::from_millis(self.epsilon_millis)
    }

    pub fn stuck_threshold(&self) -> chrono::Duration {
        i64::try_from(self.stuck_threshold_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_execution_seconds == 0 {
            return Err(anyhow::anyhow!("最长执行时间必须大于0"));
        }

        if !(1..=100).contains(&self.execution_bias_percent) {
            return Err(anyhow::anyhow!(
                "执行时间比例必须在1到100之间: {}",
                self.execution_bias_percent
            ));
        }

        if self.stuck_threshold_minutes == 0 {
            return Err(anyhow::anyhow!("卡死阈值必须大于0"));
        }

        Ok(())
    }
}

/// 内置处理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlersConfig {
    pub log_dir: String,
    pub log_max_bytes: u64,
    pub log_keep_files: u32,
    pub cleanup_batch_size: usize,
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            log_dir: "log".to_string(),
            log_max_bytes: 1024 * 1024,
            log_keep_files: 5,
            cleanup_batch_size: 50,
        }
    }
}

impl HandlersConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.log_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("日志目录不能为空"));
        }

        if self.log_keep_files == 0 {
            return Err(anyhow::anyhow!("保留的日志文件数必须大于0"));
        }

        if self.cleanup_batch_size == 0 {
            return Err(anyhow::anyhow!("清理批次大小必须大于0"));
        }

        Ok(())
    }
}
