use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{SchedulerError, SchedulerResult};

/// 序列化后的队列项所携带的标记键；负载中同时出现这三个键即视为嵌套队列项
const QUEUE_ITEM_MARKER_KEYS: [&str; 3] = ["queue_type", "data", "data_type"];

/// 工作队列中的一项
///
/// `queue_identifier` 由 [`push`](crate::traits::QueueRepository::push) 填写，
/// `available_at` 之前该项不会被弹出。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub queue_identifier: String,
    pub queue_type: String,
    pub site_id: Option<i64>,
    pub data_type: String,
    pub data: Value,
    pub available_at: DateTime<Utc>,
}

impl QueueItem {
    /// 创建队列项，`data_type` 记录负载的JSON类别
    ///
    /// 负载本身是一个序列化的队列项，或者顶层直接包含队列项时返回
    /// `InvalidQueuePayload`。
    pub fn new<T: Serialize>(
        queue_type: impl Into<String>,
        data: &T,
        site_id: Option<i64>,
    ) -> SchedulerResult<Self> {
        let data = serde_json::to_value(data)?;
        let data_type = json_kind(&data).to_string();
        Self::build(queue_type.into(), data, data_type, site_id)
    }

    /// 创建队列项，并使用调用方给出的类型名作为 `data_type`
    pub fn typed<T: Serialize>(
        queue_type: impl Into<String>,
        type_name: impl Into<String>,
        data: &T,
        site_id: Option<i64>,
    ) -> SchedulerResult<Self> {
        let type_name = type_name.into();
        if type_name.trim().is_empty() {
            return Err(SchedulerError::InvalidQueuePayload(
                "类型名不能为空".to_string(),
            ));
        }
        let data = serde_json::to_value(data)?;
        Self::build(queue_type.into(), data, type_name, site_id)
    }

    fn build(
        queue_type: String,
        data: Value,
        data_type: String,
        site_id: Option<i64>,
    ) -> SchedulerResult<Self> {
        if queue_type.trim().is_empty() {
            return Err(SchedulerError::InvalidQueuePayload(
                "队列类型不能为空".to_string(),
            ));
        }
        check_not_recursive(&data)?;

        Ok(Self {
            id: 0,
            queue_identifier: String::new(),
            queue_type,
            site_id,
            data_type,
            data,
            available_at: Utc::now(),
        })
    }

    /// 将负载反序列化为调用方期望的类型
    pub fn data_as<T: DeserializeOwned>(&self) -> SchedulerResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            SchedulerError::InvalidQueuePayload(format!(
                "无法将 {} 类型的负载反序列化: {e}",
                self.data_type
            ))
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn looks_like_queue_item(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| QUEUE_ITEM_MARKER_KEYS.iter().all(|key| map.contains_key(*key)))
}

fn check_not_recursive(data: &Value) -> SchedulerResult<()> {
    if looks_like_queue_item(data) {
        return Err(SchedulerError::InvalidQueuePayload(
            "负载本身是一个队列项".to_string(),
        ));
    }

    let nested = match data {
        Value::Object(map) => map.values().any(looks_like_queue_item),
        Value::Array(items) => items.iter().any(looks_like_queue_item),
        _ => false,
    };
    if nested {
        return Err(SchedulerError::InvalidQueuePayload(
            "负载中包含嵌套的队列项".to_string(),
        ));
    }
    Ok(())
}

/// 队列批量操作的过滤条件（相等匹配）
///
/// `data` 中的键只匹配负载对象的顶层字段，值必须是标量。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueFilter {
    pub site_id: Option<i64>,
    pub queue_type: Option<String>,
    pub data: BTreeMap<String, Value>,
}

impl QueueFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn site(mut self, site_id: i64) -> Self {
        self.site_id = Some(site_id);
        self
    }

    pub fn queue_type(mut self, queue_type: impl Into<String>) -> Self {
        self.queue_type = Some(queue_type.into());
        self
    }

    pub fn data_eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.site_id.is_none() && self.queue_type.is_none() && self.data.is_empty()
    }

    /// 负载字段名只允许字母、数字和下划线，值只允许标量
    ///
    /// 仓储会把字段名拼接进JSON路径表达式，调用前必须先校验。
    pub fn validate(&self) -> SchedulerResult<()> {
        for (key, value) in &self.data {
            let valid_key =
                !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid_key {
                return Err(SchedulerError::InvalidQueuePayload(format!(
                    "无效的过滤字段名: '{key}'"
                )));
            }
            if value.is_array() || value.is_object() {
                return Err(SchedulerError::InvalidQueuePayload(format!(
                    "过滤字段 '{key}' 的值必须是标量"
                )));
            }
        }
        Ok(())
    }

    /// 内存中的匹配判断，与仓储的SQL过滤语义保持一致
    pub fn matches(&self, item: &QueueItem) -> bool {
        if self.site_id.is_some() && self.site_id != item.site_id {
            return false;
        }
        if let Some(queue_type) = &self.queue_type {
            if queue_type != &item.queue_type {
                return false;
            }
        }
        self.data
            .iter()
            .all(|(key, expected)| item.data.get(key) == Some(expected))
    }
}
