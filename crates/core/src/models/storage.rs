use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::SchedulerResult;

/// 错误信息在 storage 中的键
pub const STORAGE_ERROR_KEY: &str = "error";
/// 错误追踪信息在 storage 中的键
pub const STORAGE_TRACE_KEY: &str = "trace";

/// 任务的不透明键值存储
///
/// 这是处理器在同一任务的多次调用之间保存状态的唯一通道（多轮续跑的进度、
/// 上一次的错误详情等）。引擎只负责原样往返，除 `error`/`trace` 两个键以外
/// 不解释其中的内容。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskStorage(Map<String, Value>);

impl TaskStorage {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// 从数据库中的JSON文本恢复；空字符串视为空存储
    pub fn from_json_str(raw: &str) -> SchedulerResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json_string(&self) -> SchedulerResult<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// 读取并反序列化某个键；键不存在或类型不匹配时返回 None
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> SchedulerResult<()> {
        self.0.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 记录最近一次失败的信息，供运维人员查看
    pub fn set_error(&mut self, message: impl Into<String>, trace: Option<String>) {
        self.0
            .insert(STORAGE_ERROR_KEY.to_string(), Value::String(message.into()));
        match trace {
            Some(trace) => {
                self.0
                    .insert(STORAGE_TRACE_KEY.to_string(), Value::String(trace));
            }
            None => {
                self.0.remove(STORAGE_TRACE_KEY);
            }
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.0.get(STORAGE_ERROR_KEY).and_then(Value::as_str)
    }

    pub fn trace(&self) -> Option<&str> {
        self.0.get(STORAGE_TRACE_KEY).and_then(Value::as_str)
    }

    pub fn clear_error(&mut self) {
        self.0.remove(STORAGE_ERROR_KEY);
        self.0.remove(STORAGE_TRACE_KEY);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}
