//! PostgreSQL implementation of MessageQueue
//!
//! A single table holds every queue:
//! - FIFO order by an insert sequence (requeued messages keep their slot)
//! - Leasing with `FOR UPDATE SKIP LOCKED` so concurrent consumers never share a message
//! - Per-consumer prefetch enforced inside the claiming statement

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::store::*;

/// Advisory lock key serializing schema creation across processes
const SCHEMA_LOCK_KEY: i64 = 0x5245_4C41_595F_5131; // "RELAY_Q1" in ASCII

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS relay_queue_messages (
        id UUID PRIMARY KEY,
        seq BIGSERIAL NOT NULL,
        queue_name TEXT NOT NULL,
        body BYTEA NOT NULL,
        content_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'ready',
        delivery_count INTEGER NOT NULL DEFAULT 0,
        consumer_id TEXT,
        delivered_at TIMESTAMPTZ,
        lease_expires_at TIMESTAMPTZ,
        enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_relay_queue_messages_ready
        ON relay_queue_messages (queue_name, seq)
        WHERE status = 'ready'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_relay_queue_messages_leases
        ON relay_queue_messages (queue_name, lease_expires_at)
        WHERE status = 'delivered'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS relay_dead_letters (
        message_id UUID PRIMARY KEY,
        queue_name TEXT NOT NULL,
        body BYTEA NOT NULL,
        content_type TEXT NOT NULL,
        delivery_count INTEGER NOT NULL,
        reason TEXT NOT NULL,
        dead_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// PostgreSQL implementation of MessageQueue
///
/// # Example
///
/// ```ignore
/// use relay_durable::{MessageQueue, PostgresMessageQueue};
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/broker").await?;
/// let queue = PostgresMessageQueue::new(pool);
/// queue.declare().await?;
/// ```
#[derive(Clone)]
pub struct PostgresMessageQueue {
    pool: PgPool,
}

impl PostgresMessageQueue {
    /// Create a new queue over the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MessageQueue for PostgresMessageQueue {
    #[instrument(skip(self))]
    async fn declare(&self) -> Result<(), QueueError> {
        // Concurrent CREATE ... IF NOT EXISTS can still collide on the type
        // catalog, so every declarer waits on the same transaction lock.
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin declare transaction: {}", e);
            QueueError::Database(e.to_string())
        })?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to acquire schema lock: {}", e);
                QueueError::Database(e.to_string())
            })?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Failed to declare queue tables: {}", e);
                    QueueError::Database(e.to_string())
                })?;
        }

        tx.commit()
            .await
            .map_err(|e| QueueError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, message), fields(bytes = message.body.len()))]
    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<Uuid, QueueError> {
        let id = Uuid::now_v7();

        sqlx::query(
            r#"
            INSERT INTO relay_queue_messages (id, queue_name, body, content_type)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(&message.body)
        .bind(&message.content_type)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to publish message: {}", e);
            QueueError::Database(e.to_string())
        })?;

        Ok(id)
    }

    #[instrument(skip(self))]
    async fn fetch(
        &self,
        queue: &str,
        consumer_id: &str,
        prefetch: u32,
        lease: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        // The held count and the claim run in one statement so a consumer
        // cannot exceed its prefetch by racing itself.
        let row = sqlx::query(
            r#"
            WITH held AS (
                SELECT COUNT(*) AS n
                FROM relay_queue_messages
                WHERE queue_name = $1
                  AND status = 'delivered'
                  AND consumer_id = $2
            ),
            next AS (
                SELECT id
                FROM relay_queue_messages
                WHERE queue_name = $1
                  AND status = 'ready'
                  AND (SELECT n FROM held) < $3
                ORDER BY seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE relay_queue_messages m
            SET status = 'delivered',
                consumer_id = $2,
                delivered_at = NOW(),
                lease_expires_at = NOW() + make_interval(secs => $4),
                delivery_count = m.delivery_count + 1
            FROM next
            WHERE m.id = next.id
            RETURNING m.id, m.queue_name, m.consumer_id, m.body, m.content_type,
                      m.delivery_count, m.enqueued_at
            "#,
        )
        .bind(queue)
        .bind(consumer_id)
        .bind(prefetch as i64)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch message: {}", e);
            QueueError::Database(e.to_string())
        })?;

        Ok(row.map(|row| {
            let delivery = Delivery {
                id: row.get("id"),
                queue_name: row.get("queue_name"),
                consumer_id: row.get("consumer_id"),
                body: row.get("body"),
                content_type: row.get("content_type"),
                delivery_count: row.get::<i32, _>("delivery_count") as u32,
                enqueued_at: row.get("enqueued_at"),
            };
            debug!(delivery_id = %delivery.id, delivery_count = delivery.delivery_count, "leased message");
            delivery
        }))
    }

    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id))]
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            DELETE FROM relay_queue_messages
            WHERE id = $1
              AND status = 'delivered'
              AND consumer_id = $2
              AND delivery_count = $3
            "#,
        )
        .bind(delivery.id)
        .bind(&delivery.consumer_id)
        .bind(delivery.delivery_count as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to ack message: {}", e);
            QueueError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(QueueError::DeliveryNotFound(delivery.id));
        }
        Ok(())
    }

    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id))]
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let query = if requeue {
            r#"
            UPDATE relay_queue_messages
            SET status = 'ready',
                consumer_id = NULL,
                lease_expires_at = NULL
            WHERE id = $1
              AND status = 'delivered'
              AND consumer_id = $2
              AND delivery_count = $3
            "#
        } else {
            r#"
            DELETE FROM relay_queue_messages
            WHERE id = $1
              AND status = 'delivered'
              AND consumer_id = $2
              AND delivery_count = $3
            "#
        };

        let result = sqlx::query(query)
            .bind(delivery.id)
            .bind(&delivery.consumer_id)
            .bind(delivery.delivery_count as i32)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to nack message: {}", e);
                QueueError::Database(e.to_string())
            })?;

        if result.rows_affected() == 0 {
            return Err(QueueError::DeliveryNotFound(delivery.id));
        }
        Ok(())
    }

    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id))]
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            WITH moved AS (
                DELETE FROM relay_queue_messages
                WHERE id = $1
                  AND status = 'delivered'
                  AND consumer_id = $2
                  AND delivery_count = $3
                RETURNING id, queue_name, body, content_type, delivery_count
            )
            INSERT INTO relay_dead_letters
                (message_id, queue_name, body, content_type, delivery_count, reason)
            SELECT id, queue_name, body, content_type, delivery_count, $4
            FROM moved
            "#,
        )
        .bind(delivery.id)
        .bind(&delivery.consumer_id)
        .bind(delivery.delivery_count as i32)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to dead-letter message: {}", e);
            QueueError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(QueueError::DeliveryNotFound(delivery.id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reclaim_expired(&self, queue: &str) -> Result<Vec<Uuid>, QueueError> {
        let rows = sqlx::query(
            r#"
            UPDATE relay_queue_messages
            SET status = 'ready',
                consumer_id = NULL,
                lease_expires_at = NULL
            WHERE queue_name = $1
              AND status = 'delivered'
              AND lease_expires_at <= NOW()
            RETURNING id
            "#,
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to reclaim expired leases: {}", e);
            QueueError::Database(e.to_string())
        })?;

        let reclaimed: Vec<Uuid> = rows.iter().map(|row| row.get("id")).collect();
        if !reclaimed.is_empty() {
            warn!(count = reclaimed.len(), "reclaimed messages with expired leases");
        }
        Ok(reclaimed)
    }

    #[instrument(skip(self))]
    async fn release_held(&self, queue: &str, consumer_id: &str) -> Result<Vec<Uuid>, QueueError> {
        let rows = sqlx::query(
            r#"
            UPDATE relay_queue_messages
            SET status = 'ready',
                consumer_id = NULL,
                lease_expires_at = NULL
            WHERE queue_name = $1
              AND status = 'delivered'
              AND consumer_id = $2
            RETURNING id
            "#,
        )
        .bind(queue)
        .bind(consumer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to release held deliveries: {}", e);
            QueueError::Database(e.to_string())
        })?;

        let released: Vec<Uuid> = rows.iter().map(|row| row.get("id")).collect();
        if !released.is_empty() {
            warn!(count = released.len(), "released deliveries left by a previous run");
        }
        Ok(released)
    }
}
