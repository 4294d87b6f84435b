use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{QueueFilter, QueueItem},
    traits::QueueRepository,
    SchedulerResult,
};
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};

use crate::{
    database::mapping::{MappingHelpers, QUEUE_COLUMNS},
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    queue_context,
};

/// PostgreSQL 工作队列仓储
///
/// 出队在一个事务内选出并锁定最早的一项（`FOR UPDATE SKIP LOCKED`），删除后提交。
pub struct PostgresQueueRepository {
    pool: PgPool,
}

impl PostgresQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_item(row: &PgRow) -> SchedulerResult<QueueItem> {
        Ok(QueueItem {
            id: row.try_get("id")?,
            queue_identifier: row.try_get("queue_identifier")?,
            queue_type: row.try_get("queue_type")?,
            site_id: row.try_get("site_id")?,
            data_type: row.try_get("data_type")?,
            data: row.try_get("data")?,
            available_at: row.try_get("available_at")?,
        })
    }
}

#[async_trait]
impl QueueRepository for PostgresQueueRepository {
    #[instrument(skip(self, item), fields(queue = %queue_identifier, queue_type = %item.queue_type))]
    async fn push(
        &self,
        queue_identifier: &str,
        item: &QueueItem,
        available_at: DateTime<Utc>,
    ) -> SchedulerResult<i64> {
        let context = queue_context!(
            RepositoryOperation::Push,
            queue = queue_identifier,
            queue_type = &item.queue_type
        );

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO queue_items (queue_identifier, queue_type, site_id, data_type, data, available_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(queue_identifier)
        .bind(&item.queue_type)
        .bind(item.site_id)
        .bind(&item.data_type)
        .bind(&item.data)
        .bind(available_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::queue_database_error(context, e))?;

        debug!("队列项入队: ID {}", id);
        Ok(id)
    }

    #[instrument(skip(self), fields(queue = %queue_identifier))]
    async fn pop(
        &self,
        queue_identifier: &str,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<QueueItem>> {
        let context = queue_context!(RepositoryOperation::Pop, queue = queue_identifier);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryErrorHelpers::queue_database_error(context.clone(), e))?;

        let candidate: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM queue_items
            WHERE queue_identifier = $1 AND available_at <= $2
            ORDER BY available_at ASC, id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(queue_identifier)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RepositoryErrorHelpers::queue_database_error(context.clone(), e))?;

        let Some(id) = candidate else {
            tx.commit()
                .await
                .map_err(|e| RepositoryErrorHelpers::queue_database_error(context.clone(), e))?;
            return Ok(None);
        };

        let sql = format!("DELETE FROM queue_items WHERE id = $1 RETURNING {QUEUE_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| RepositoryErrorHelpers::queue_database_error(context.clone(), e))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryErrorHelpers::queue_database_error(context, e))?;

        Self::row_to_item(&row).map(Some)
    }

    #[instrument(skip(self, filter), fields(queue = %queue_identifier))]
    async fn clear(&self, queue_identifier: &str, filter: &QueueFilter) -> SchedulerResult<u64> {
        let context = queue_context!(RepositoryOperation::Clear, queue = queue_identifier);

        let mut builder =
            QueryBuilder::<Postgres>::new("DELETE FROM queue_items WHERE queue_identifier = ");
        builder.push_bind(queue_identifier.to_string());
        MappingHelpers::push_postgres_queue_filter(&mut builder, filter)?;

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::queue_database_error(context, e))?;

        debug!("清空队列项: {} 条", result.rows_affected());
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, filter), fields(queue = %queue_identifier))]
    async fn count(&self, queue_identifier: &str, filter: &QueueFilter) -> SchedulerResult<i64> {
        let context = queue_context!(RepositoryOperation::Query, queue = queue_identifier);

        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM queue_items WHERE queue_identifier = ",
        );
        builder.push_bind(queue_identifier.to_string());
        MappingHelpers::push_postgres_queue_filter(&mut builder, filter)?;

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::queue_database_error(context, e))?;

        Ok(count)
    }
}
