use async_trait::async_trait;
use sqlx::PgPool;

use crate::{Offset, OffsetKey, Result, offset::OffsetStore};

/// PostgreSQL-backed offset store.
///
/// One row per (consumer, topic, partition); the upsert keeps the greater of
/// the stored and the proposed position.
#[derive(Clone)]
pub struct PostgresOffsetStore {
    pool: PgPool,
}

impl PostgresOffsetStore {
    /// Creates a new PostgreSQL offset store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl OffsetStore for PostgresOffsetStore {
    async fn load(&self, key: &OffsetKey) -> Result<Option<Offset>> {
        let position: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT position
            FROM consumer_offsets
            WHERE consumer = $1 AND topic = $2 AND partition = $3
            "#,
        )
        .bind(&key.consumer)
        .bind(&key.partition.topic)
        .bind(key.partition.partition)
        .fetch_optional(&self.pool)
        .await?;

        Ok(position.map(Offset::new))
    }

    async fn advance(&self, key: &OffsetKey, to: Offset) -> Result<Offset> {
        let stored: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO consumer_offsets (consumer, topic, partition, position, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (consumer, topic, partition) DO UPDATE
            SET position = GREATEST(consumer_offsets.position, EXCLUDED.position),
                updated_at = NOW()
            RETURNING position
            "#,
        )
        .bind(&key.consumer)
        .bind(&key.partition.topic)
        .bind(key.partition.partition)
        .bind(to.as_i64())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(%key, offset = stored, "offset upserted");
        Ok(Offset::new(stored))
    }
}
