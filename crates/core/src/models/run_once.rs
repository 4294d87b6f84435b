use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// 一次性运行策略：任务完成一次终态运行之后如何处置
///
/// 只在非 `WillResume` 的终态结果之后生效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOnce {
    /// 按 cron 正常重新计算下次执行时间
    #[default]
    None,
    /// 将 `enabled` 置为 false，保留任务行
    Disable,
    /// 删除任务行
    Delete,
}

impl RunOnce {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOnce::None => "NONE",
            RunOnce::Disable => "DISABLE",
            RunOnce::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RunOnce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunOnce {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(RunOnce::None),
            "DISABLE" => Ok(RunOnce::Disable),
            "DELETE" => Ok(RunOnce::Delete),
            _ => Err(SchedulerError::Serialization(format!(
                "无效的一次性运行策略: {s}"
            ))),
        }
    }
}
