use crate::database::error::DatabaseError;
use crate::queue::{
    encode, DeadLetter, Delivery, DeliveryStatus, EventQueue, QueueDepth, QueueError, QueueMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct ClaimedRow {
    id: Uuid,
    name: String,
    payload: serde_json::Value,
    attempts: i32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct DeadRow {
    id: Uuid,
    name: String,
    payload: serde_json::Value,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Postgres-backed fulfillment queue on the `fulfillment_events` table.
/// Consumers claim rows with `FOR UPDATE SKIP LOCKED`, so any number of
/// workers across processes can poll the same table.
pub struct EventQueueRepository {
    pool: PgPool,
}

impl EventQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_status(
        &self,
        id: Uuid,
        attempt: u32,
        status: DeliveryStatus,
        delay: Option<Duration>,
        error: Option<&str>,
    ) -> Result<bool, QueueError> {
        // A consumer whose lock lapsed must not overwrite a newer claim.
        let result = sqlx::query(
            "UPDATE fulfillment_events
             SET status = $2,
                 available_at = NOW() + make_interval(secs => $3),
                 locked_until = NULL,
                 last_error = COALESCE($4, last_error),
                 updated_at = NOW()
             WHERE id = $1 AND status = 'processing' AND attempts = $5",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(delay.unwrap_or_default().as_secs_f64())
        .bind(error)
        .bind(i32::try_from(attempt).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl EventQueue for EventQueueRepository {
    async fn enqueue(&self, message: &QueueMessage) -> Result<Uuid, QueueError> {
        let payload = encode(message)?;
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO fulfillment_events (id, name, idempotency_key, payload, status)
             VALUES ($1, $2, $3, $4, 'pending')
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(&message.name)
        .bind(&message.data.order_id)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(id)
    }

    async fn claim(&self, limit: i64, visibility: Duration) -> Result<Vec<Delivery>, QueueError> {
        // Expired processing rows belong to consumers that died mid-delivery.
        let rows = sqlx::query_as::<_, ClaimedRow>(
            "UPDATE fulfillment_events e
             SET status = 'processing',
                 attempts = e.attempts + 1,
                 locked_until = NOW() + make_interval(secs => $2),
                 updated_at = NOW()
             FROM (
                 SELECT id FROM fulfillment_events
                 WHERE (status = 'pending' AND available_at <= NOW())
                    OR (status = 'processing' AND locked_until <= NOW())
                 ORDER BY available_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             ) due
             WHERE e.id = due.id
             RETURNING e.id, e.name, e.payload, e.attempts, e.created_at",
        )
        .bind(limit)
        .bind(visibility.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|row| Delivery {
                id: row.id,
                name: row.name,
                payload: row.payload,
                attempts: row.attempts.max(0) as u32,
                enqueued_at: row.created_at,
            })
            .collect())
    }

    async fn ack(&self, id: Uuid, attempt: u32) -> Result<bool, QueueError> {
        self.set_status(id, attempt, DeliveryStatus::Completed, None, None)
            .await
    }

    async fn retry_later(
        &self,
        id: Uuid,
        attempt: u32,
        delay: Duration,
        error: &str,
    ) -> Result<bool, QueueError> {
        self.set_status(id, attempt, DeliveryStatus::Pending, Some(delay), Some(error))
            .await
    }

    async fn dead_letter(&self, id: Uuid, attempt: u32, error: &str) -> Result<bool, QueueError> {
        self.set_status(id, attempt, DeliveryStatus::Dead, None, Some(error))
            .await
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError> {
        let rows = sqlx::query_as::<_, DeadRow>(
            "SELECT id, name, payload, attempts, last_error, created_at, updated_at
             FROM fulfillment_events
             WHERE status = 'dead'
             ORDER BY updated_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|row| DeadLetter {
                id: row.id,
                name: row.name,
                payload: row.payload,
                attempts: row.attempts.max(0) as u32,
                last_error: row.last_error,
                enqueued_at: row.created_at,
                failed_at: row.updated_at,
            })
            .collect())
    }

    async fn requeue(&self, id: Uuid) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE fulfillment_events
             SET status = 'pending', attempts = 0, available_at = NOW(),
                 locked_until = NULL, updated_at = NOW()
             WHERE id = $1 AND status = 'dead'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let (pending, processing, dead): (i64, i64, i64) = sqlx::query_as(
            "SELECT
                 COUNT(*) FILTER (WHERE status = 'pending'),
                 COUNT(*) FILTER (WHERE status = 'processing'),
                 COUNT(*) FILTER (WHERE status = 'dead')
             FROM fulfillment_events",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(QueueDepth {
            pending,
            processing,
            dead,
        })
    }
}
