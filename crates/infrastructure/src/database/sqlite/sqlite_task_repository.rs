use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use scheduler_core::{
    models::{CompletionPlan, Disposition, Task, TaskFilter, TaskStatus, TaskStorage},
    traits::TaskRepository,
    CronScheduler, SchedulerResult,
};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use crate::{
    database::mapping::{MappingHelpers, TASK_COLUMNS},
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    task_context,
};

/// SQLite 任务仓储
///
/// SQLite 没有行锁，认领使用单条 `UPDATE … WHERE id = (SELECT …) AND locked IS NULL RETURNING`
/// 语句完成：数据库写锁保证同一时刻只有一个连接执行写语句，`locked IS NULL`
/// 条件保证已经被认领的行不会被再次认领。
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        let params: String = row.try_get("params")?;
        let storage: String = row.try_get("storage")?;
        let last_exit_code: String = row.try_get("last_exit_code")?;
        let run_once: String = row.try_get("run_once")?;

        Ok(Task {
            id: row.try_get("id")?,
            site_id: row.try_get("site_id")?,
            task_type: row.try_get("task_type")?,
            cron_expression: row.try_get("cron_expression")?,
            enabled: row.try_get("enabled")?,
            priority: row.try_get("priority")?,
            params: MappingHelpers::parse_json_text(&params, "params")?,
            storage: MappingHelpers::storage_from_value(MappingHelpers::parse_json_text(
                &storage, "storage",
            )?)?,
            locked: row.try_get("locked")?,
            locked_by: row.try_get("locked_by")?,
            last_exit_code: MappingHelpers::parse_status(&last_exit_code)?,
            last_execution: row.try_get("last_execution")?,
            last_run_end: row.try_get("last_run_end")?,
            next_execution: row.try_get("next_execution")?,
            times_executed: row.try_get("times_executed")?,
            times_failed: row.try_get("times_failed")?,
            run_once: MappingHelpers::parse_run_once(&run_once)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn exists(&self, id: i64) -> SchedulerResult<bool> {
        let context = task_context!(RepositoryOperation::Read, task_id = id);
        let row = sqlx::query("SELECT 1 FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_database_error(context, e))?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_type = %task.task_type))]
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let context = task_context!(RepositoryOperation::Create).with_task_type(task.task_type.clone());

        task.validate()?;
        let next_execution = match task.next_execution {
            Some(next) => Some(next),
            None => CronScheduler::new(&task.cron_expression)?.next_execution_time(Utc::now()),
        };

        let params_json = serde_json::to_string(&task.params)
            .map_err(|e| RepositoryErrorHelpers::task_serialization_error(context.clone(), e))?;
        let storage_json = task.storage.to_json_string()?;

        let sql = format!(
            r#"
            INSERT INTO tasks (site_id, task_type, cron_expression, enabled, priority, params, storage,
                               last_exit_code, next_execution, run_once, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            RETURNING {TASK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(task.site_id)
            .bind(&task.task_type)
            .bind(task.cron_expression.trim())
            .bind(task.enabled)
            .bind(task.priority)
            .bind(params_json)
            .bind(storage_json)
            .bind(TaskStatus::InitialSchedule.as_str())
            .bind(next_execution)
            .bind(task.run_once.as_str())
            .bind(task.created_at)
            .bind(task.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))?;

        let created_task = Self::row_to_task(&row)?;
        RepositoryErrorHelpers::log_operation_success(
            context,
            &created_task.entity_description(),
            Some(&format!("下次执行: {:?}", created_task.next_execution)),
        );
        Ok(created_task)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let context = task_context!(RepositoryOperation::Read, task_id = id);

        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_database_error(context, e))?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, filter))]
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let context = task_context!(RepositoryOperation::Query);

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1"));
        if let Some(site_id) = filter.site_id {
            builder.push(" AND site_id = ").push_bind(site_id);
        }
        if let Some(task_type) = &filter.task_type {
            builder.push(" AND task_type = ").push_bind(task_type.clone());
        }
        if let Some(enabled) = filter.enabled {
            builder.push(" AND enabled = ").push_bind(enabled);
        }
        builder.push(" ORDER BY id ASC");
        match (filter.limit, filter.offset) {
            (Some(limit), offset) => {
                builder.push(" LIMIT ").push_bind(limit);
                if let Some(offset) = offset {
                    builder.push(" OFFSET ").push_bind(offset);
                }
            }
            (None, Some(offset)) => {
                builder.push(" LIMIT -1 OFFSET ").push_bind(offset);
            }
            (None, None) => {}
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_database_error(context, e))?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    async fn update(&self, task: &Task, now: DateTime<Utc>) -> SchedulerResult<Task> {
        let context = task_context!(
            RepositoryOperation::Update,
            task_id = task.id,
            task_type = &task.task_type
        );

        task.validate()?;
        let current = self
            .get_by_id(task.id)
            .await?
            .ok_or_else(|| RepositoryErrorHelpers::task_not_found(context.clone()))?;

        // cron 表达式变化，或者之前因表达式无效被搁置时，从当前时间重新计算
        let cron_changed = current.cron_expression != task.cron_expression.trim();
        let recompute = cron_changed || current.next_execution.is_none();
        let next_execution = if recompute {
            CronScheduler::new(&task.cron_expression)?.next_execution_time(now)
        } else {
            None
        };

        let params_json = serde_json::to_string(&task.params)
            .map_err(|e| RepositoryErrorHelpers::task_serialization_error(context.clone(), e))?;

        let sql = format!(
            r#"
            UPDATE tasks
            SET site_id = ?2, task_type = ?3, cron_expression = ?4, enabled = ?5, priority = ?6,
                params = ?7, run_once = ?8,
                next_execution = CASE WHEN ?9 THEN ?10 ELSE next_execution END,
                updated_at = ?11
            WHERE id = ?1
            RETURNING {TASK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(task.id)
            .bind(task.site_id)
            .bind(&task.task_type)
            .bind(task.cron_expression.trim())
            .bind(task.enabled)
            .bind(task.priority)
            .bind(params_json)
            .bind(task.run_once.as_str())
            .bind(recompute)
            .bind(next_execution)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))?
            .ok_or_else(|| RepositoryErrorHelpers::task_not_found(context.clone()))?;

        let updated = Self::row_to_task(&row)?;
        RepositoryErrorHelpers::log_operation_success(context, &updated.entity_description(), None);
        Ok(updated)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn delete(&self, id: i64) -> SchedulerResult<()> {
        let context = task_context!(RepositoryOperation::Delete, task_id = id);

        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryErrorHelpers::task_not_found(context));
        }

        debug!("删除任务成功: ID {}", id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_next_due_task(
        &self,
        now: DateTime<Utc>,
        locked_by: &str,
    ) -> SchedulerResult<Option<Task>> {
        let context = task_context!(RepositoryOperation::Claim);

        let sql = format!(
            r#"
            UPDATE tasks
            SET locked = ?1, locked_by = ?2, last_exit_code = ?3, last_execution = ?1, updated_at = ?1
            WHERE id = (
                SELECT id FROM tasks
                WHERE enabled = 1
                  AND locked IS NULL
                  AND next_execution IS NOT NULL
                  AND next_execution <= ?1
                ORDER BY priority DESC, next_execution ASC, id ASC
                LIMIT 1
            )
            AND locked IS NULL
            RETURNING {TASK_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(now)
            .bind(locked_by)
            .bind(TaskStatus::Running.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_database_error(context, e))?;

        match row {
            Some(row) => {
                let task = Self::row_to_task(&row)?;
                debug!("认领任务: {} (加锁者: {})", task.entity_description(), locked_by);
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, task, storage), fields(task_id = %task.id, task_type = %task.task_type, status = %status))]
    async fn complete_task(
        &self,
        task: &Task,
        status: TaskStatus,
        storage: &TaskStorage,
        finished_at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let context = task_context!(
            RepositoryOperation::Complete,
            task_id = task.id,
            task_type = &task.task_type
        );
        let plan = CompletionPlan::for_task(task, status, storage, finished_at);

        let result = match &plan.disposition {
            Disposition::Delete => {
                sqlx::query("DELETE FROM tasks WHERE id = ?1 AND locked = ?2 AND locked_by IS ?3")
                    .bind(task.id)
                    .bind(task.locked)
                    .bind(task.locked_by.as_deref())
                    .execute(&self.pool)
                    .await
            }
            Disposition::Reschedule {
                next_execution,
                enabled,
            } => {
                let storage_json = plan.storage.to_json_string()?;
                sqlx::query(
                    r#"
                    UPDATE tasks
                    SET locked = NULL, locked_by = NULL, last_exit_code = ?2, last_run_end = ?3,
                        times_executed = times_executed + 1, times_failed = times_failed + ?4,
                        storage = ?5, next_execution = ?6, enabled = (enabled AND ?7),
                        updated_at = ?3
                    WHERE id = ?1 AND locked = ?8 AND locked_by IS ?9
                    "#,
                )
                .bind(task.id)
                .bind(plan.last_exit_code.as_str())
                .bind(plan.last_run_end)
                .bind(i64::from(status.is_failure()))
                .bind(storage_json)
                .bind(*next_execution)
                .bind(*enabled)
                .bind(task.locked)
                .bind(task.locked_by.as_deref())
                .execute(&self.pool)
                .await
            }
        }
        .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))?;

        let completed = result.rows_affected() > 0;
        if completed {
            RepositoryErrorHelpers::log_operation_success(
                context,
                &task.entity_description(),
                Some(&format!("状态: {}, 下次执行: {:?}", status, plan.next_execution())),
            );
        } else {
            debug!("任务已消失或锁已不属于本次认领: {}", task.entity_description());
        }
        Ok(completed)
    }

    #[instrument(skip(self))]
    async fn find_stuck_tasks(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> SchedulerResult<Vec<Task>> {
        let context = task_context!(RepositoryOperation::Query);

        let sql = format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE locked IS NOT NULL AND locked < ?1 AND last_exit_code = ?2
            ORDER BY locked ASC, id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(now - threshold)
            .bind(TaskStatus::Running.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::task_database_error(context, e))?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn schedule_now(&self, id: i64, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let context = task_context!(RepositoryOperation::Update, task_id = id);

        let result = sqlx::query(
            "UPDATE tasks SET next_execution = ?2, updated_at = ?2 WHERE id = ?1 AND locked IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::task_database_error(context.clone(), e))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.exists(id).await? {
            debug!("任务 #{} 正在执行，无法立即调度", id);
            Ok(false)
        } else {
            Err(RepositoryErrorHelpers::task_not_found(context))
        }
    }
}
