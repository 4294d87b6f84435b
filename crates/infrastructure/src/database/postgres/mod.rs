pub mod postgres_queue_repository;
pub mod postgres_task_repository;

pub use postgres_queue_repository::PostgresQueueRepository;
pub use postgres_task_repository::PostgresTaskRepository;

use scheduler_core::SchedulerResult;
use sqlx::PgPool;
use tracing::debug;

/// 运行 PostgreSQL 数据库迁移，可重复执行
pub async fn run_migrations(pool: &PgPool) -> SchedulerResult<()> {
    debug!("Running PostgreSQL database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id BIGSERIAL PRIMARY KEY,
            site_id BIGINT,
            task_type VARCHAR(255) NOT NULL,
            cron_expression VARCHAR(255) NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            priority INTEGER NOT NULL DEFAULT 0,
            params JSONB NOT NULL DEFAULT '{}',
            storage JSONB NOT NULL DEFAULT '{}',
            locked TIMESTAMPTZ,
            locked_by VARCHAR(255),
            last_exit_code VARCHAR(32) NOT NULL DEFAULT 'INITIAL_SCHEDULE',
            last_execution TIMESTAMPTZ,
            last_run_end TIMESTAMPTZ,
            next_execution TIMESTAMPTZ,
            times_executed BIGINT NOT NULL DEFAULT 0,
            times_failed BIGINT NOT NULL DEFAULT 0,
            run_once VARCHAR(16) NOT NULL DEFAULT 'NONE',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_items (
            id BIGSERIAL PRIMARY KEY,
            queue_identifier VARCHAR(255) NOT NULL,
            queue_type VARCHAR(255) NOT NULL,
            site_id BIGINT,
            data_type VARCHAR(255) NOT NULL,
            data JSONB NOT NULL,
            available_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(next_execution) WHERE enabled AND locked IS NULL",
        "CREATE INDEX IF NOT EXISTS idx_tasks_site_id ON tasks(site_id)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_task_type ON tasks(task_type)",
        "CREATE INDEX IF NOT EXISTS idx_queue_items_pop ON queue_items(queue_identifier, available_at, id)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed PostgreSQL database migrations");
    Ok(())
}
