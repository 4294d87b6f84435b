//! Shared database mapping utilities
//!
//! SQLite 把 JSON 字段存成文本，PostgreSQL 使用 JSONB；状态和一次性运行策略在两个后端
//! 都以大写名称存储。这里集中处理这些差异以及队列过滤条件的SQL拼接。

use scheduler_core::models::{QueueFilter, RunOnce, TaskStatus, TaskStorage};
use scheduler_core::{SchedulerError, SchedulerResult};
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder, Sqlite};

/// `tasks` 表的完整列清单，所有返回任务的查询都使用同一个顺序
pub const TASK_COLUMNS: &str = "id, site_id, task_type, cron_expression, enabled, priority, \
     params, storage, locked, locked_by, last_exit_code, last_execution, last_run_end, \
     next_execution, times_executed, times_failed, run_once, created_at, updated_at";

/// `queue_items` 表的完整列清单
pub const QUEUE_COLUMNS: &str =
    "id, queue_identifier, queue_type, site_id, data_type, data, available_at";

/// Helper functions for parsing database fields across different database types
pub struct MappingHelpers;

impl MappingHelpers {
    pub fn parse_status(raw: &str) -> SchedulerResult<TaskStatus> {
        raw.parse()
    }

    pub fn parse_run_once(raw: &str) -> SchedulerResult<RunOnce> {
        raw.parse()
    }

    /// Parse a JSON text column (SQLite)
    pub fn parse_json_text(raw: &str, field_name: &str) -> SchedulerResult<Value> {
        if raw.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(raw)
            .map_err(|e| SchedulerError::Serialization(format!("解析字段 {field_name} 失败: {e}")))
    }

    /// 任务存储在两个后端都必须是JSON对象
    pub fn storage_from_value(value: Value) -> SchedulerResult<TaskStorage> {
        match value {
            Value::Object(map) => Ok(TaskStorage::from_map(map)),
            Value::Null => Ok(TaskStorage::new()),
            other => Err(SchedulerError::Serialization(format!(
                "任务存储必须是JSON对象，实际为: {other}"
            ))),
        }
    }

    /// 追加 SQLite 的队列过滤条件，负载字段通过 `json_extract` 匹配
    pub fn push_sqlite_queue_filter(
        builder: &mut QueryBuilder<'_, Sqlite>,
        filter: &QueueFilter,
    ) -> SchedulerResult<()> {
        filter.validate()?;

        if let Some(site_id) = filter.site_id {
            builder.push(" AND site_id = ").push_bind(site_id);
        }
        if let Some(queue_type) = &filter.queue_type {
            builder.push(" AND queue_type = ").push_bind(queue_type.clone());
        }
        for (key, value) in &filter.data {
            builder.push(format!(" AND json_extract(data, '$.{key}')"));
            match value {
                Value::Null => {
                    builder.push(" IS NULL");
                }
                Value::Bool(flag) => {
                    builder.push(" = ").push_bind(i64::from(*flag));
                }
                Value::Number(number) => {
                    if let Some(int) = number.as_i64() {
                        builder.push(" = ").push_bind(int);
                    } else {
                        builder
                            .push(" = ")
                            .push_bind(number.as_f64().unwrap_or_default());
                    }
                }
                Value::String(text) => {
                    builder.push(" = ").push_bind(text.clone());
                }
                Value::Array(_) | Value::Object(_) => {
                    return Err(SchedulerError::InvalidQueuePayload(format!(
                        "过滤字段 '{key}' 的值必须是标量"
                    )));
                }
            }
        }
        Ok(())
    }

    /// 追加 PostgreSQL 的队列过滤条件，负载字段通过 `->>` 按文本匹配
    pub fn push_postgres_queue_filter(
        builder: &mut QueryBuilder<'_, Postgres>,
        filter: &QueueFilter,
    ) -> SchedulerResult<()> {
        filter.validate()?;

        if let Some(site_id) = filter.site_id {
            builder.push(" AND site_id = ").push_bind(site_id);
        }
        if let Some(queue_type) = &filter.queue_type {
            builder.push(" AND queue_type = ").push_bind(queue_type.clone());
        }
        for (key, value) in &filter.data {
            builder.push(format!(" AND data ->> '{key}'"));
            let text = match value {
                Value::Null => {
                    builder.push(" IS NULL");
                    continue;
                }
                Value::Bool(flag) => flag.to_string(),
                Value::Number(number) => number.to_string(),
                Value::String(text) => text.clone(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(SchedulerError::InvalidQueuePayload(format!(
                        "过滤字段 '{key}' 的值必须是标量"
                    )));
                }
            };
            builder.push(" = ").push_bind(text);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_enums() {
        assert_eq!(
            MappingHelpers::parse_status("WILL_RESUME").unwrap(),
            TaskStatus::WillResume
        );
        assert_eq!(
            MappingHelpers::parse_run_once("DELETE").unwrap(),
            RunOnce::Delete
        );
        assert!(MappingHelpers::parse_status("DONE").is_err());
    }

    #[test]
    fn test_storage_from_value() {
        let storage = MappingHelpers::storage_from_value(json!({"phase": "delete"})).unwrap();
        assert_eq!(
            storage.get_as::<String>("phase").as_deref(),
            Some("delete")
        );
        assert!(MappingHelpers::storage_from_value(Value::Null)
            .unwrap()
            .is_empty());
        assert!(MappingHelpers::storage_from_value(json!([1])).is_err());
    }

    #[test]
    fn test_sqlite_queue_filter_sql() {
        let filter = QueueFilter::new()
            .site(3)
            .queue_type("mail")
            .data_eq("to", "ops")
            .data_eq("gone", Value::Null);
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM queue_items WHERE 1=1");
        MappingHelpers::push_sqlite_queue_filter(&mut builder, &filter).unwrap();
        let sql = builder.sql();
        assert!(sql.contains("site_id = ?"));
        assert!(sql.contains("queue_type = ?"));
        assert!(sql.contains("json_extract(data, '$.gone') IS NULL"));
        assert!(sql.contains("json_extract(data, '$.to') = ?"));
    }

    #[test]
    fn test_postgres_queue_filter_rejects_bad_keys() {
        let filter = QueueFilter::new().data_eq("x'; DROP TABLE tasks; --", 1);
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 WHERE 1=1");
        assert!(MappingHelpers::push_postgres_queue_filter(&mut builder, &filter).is_err());
    }
}
