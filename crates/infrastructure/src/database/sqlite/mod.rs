pub mod sqlite_queue_repository;
pub mod sqlite_task_repository;

pub use sqlite_queue_repository::SqliteQueueRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

use scheduler_core::SchedulerResult;
use sqlx::SqlitePool;
use tracing::debug;

/// 运行 SQLite 数据库迁移，可重复执行
pub async fn run_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
    debug!("Running SQLite database migrations");

    // 时间字段以 RFC3339 文本存储（UTC），文本比较与时间顺序一致
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_id INTEGER,
            task_type TEXT NOT NULL,
            cron_expression TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT 1,
            priority INTEGER NOT NULL DEFAULT 0,
            params TEXT NOT NULL DEFAULT '{}',
            storage TEXT NOT NULL DEFAULT '{}',
            locked DATETIME,
            locked_by TEXT,
            last_exit_code TEXT NOT NULL DEFAULT 'INITIAL_SCHEDULE',
            last_execution DATETIME,
            last_run_end DATETIME,
            next_execution DATETIME,
            times_executed INTEGER NOT NULL DEFAULT 0,
            times_failed INTEGER NOT NULL DEFAULT 0,
            run_once TEXT NOT NULL DEFAULT 'NONE',
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            queue_identifier TEXT NOT NULL,
            queue_type TEXT NOT NULL,
            site_id INTEGER,
            data_type TEXT NOT NULL,
            data TEXT NOT NULL,
            available_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(enabled, locked, next_execution)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_site_id ON tasks(site_id)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_task_type ON tasks(task_type)",
        "CREATE INDEX IF NOT EXISTS idx_queue_items_pop ON queue_items(queue_identifier, available_at, id)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
