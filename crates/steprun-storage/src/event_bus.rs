// PostgreSQL implementation of EventBus
//
// Events are rows in agent_runtime_events; the BIGSERIAL id is the cursor.
// Each operation has one agent_runtime_streams row that owns the TTL, so
// dropping it drops the stream. Length is capped after every publish.
//
// Tail subscriptions poll: every 100ms while events keep arriving, backing
// off to once per second when the stream is idle, and pausing one second
// after a database error before retrying.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use steprun_core::events::parse_cursor;
use steprun_core::{
    EventBus, EventBusLimits, Result, RuntimeError, StreamEvent, StreamEventInput,
    StreamEventType,
};
use tokio::sync::watch;
use tracing::{debug, error, instrument, trace, warn};

/// Events fetched per poll
pub const SUBSCRIBE_BATCH_SIZE: i64 = 100;

/// Poll interval while the stream is busy
pub const SUBSCRIBE_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Longest wait between polls of an idle stream
pub const SUBSCRIBE_MAX_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a failed poll
pub const SUBSCRIBE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

fn db_error(action: &'static str) -> impl FnOnce(sqlx::Error) -> RuntimeError {
    move |e| {
        error!("Failed to {}: {}", action, e);
        RuntimeError::event_bus(format!("Failed to {action}: {e}"))
    }
}

fn to_i64(value: impl TryInto<i64>) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

fn event_from_row(operation_id: &str, row: &PgRow) -> Result<StreamEvent> {
    let column = |e: sqlx::Error| RuntimeError::event_bus(format!("Malformed event row: {e}"));

    let id: i64 = row.try_get("id").map_err(column)?;
    let event_type: String = row.try_get("event_type").map_err(column)?;
    let event_type = StreamEventType::parse(&event_type)
        .ok_or_else(|| RuntimeError::event_bus(format!("Unknown event type: {event_type}")))?;
    let step_index: i32 = row.try_get("step_index").map_err(column)?;
    let data: Value = row.try_get("data").map_err(column)?;

    Ok(StreamEvent {
        operation_id: operation_id.to_string(),
        step_index: u32::try_from(step_index).unwrap_or_default(),
        event_type,
        data,
        timestamp: row.try_get("timestamp_ms").map_err(column)?,
        id: Some(id.to_string()),
    })
}

/// PostgreSQL event bus
#[derive(Clone)]
pub struct PostgresEventBus {
    pool: PgPool,
    limits: EventBusLimits,
}

impl PostgresEventBus {
    pub fn new(pool: PgPool, limits: EventBusLimits) -> Self {
        Self { pool, limits }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Live events after `cursor`, oldest first
    async fn events_after(
        &self,
        operation_id: &str,
        cursor: u64,
        limit: i64,
    ) -> Result<Vec<StreamEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.step_index, e.event_type, e.data, e.timestamp_ms
            FROM agent_runtime_events e
            JOIN agent_runtime_streams s ON s.operation_id = e.operation_id
            WHERE e.operation_id = $1 AND e.id > $2 AND s.expires_at > now()
            ORDER BY e.id ASC
            LIMIT $3
            "#,
        )
        .bind(operation_id)
        .bind(to_i64(cursor))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("read stream events"))?;

        rows.iter()
            .map(|row| event_from_row(operation_id, row))
            .collect()
    }
}

#[async_trait]
impl EventBus for PostgresEventBus {
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    async fn publish_stream_event(
        &self,
        operation_id: &str,
        event: StreamEventInput,
    ) -> Result<String> {
        let event = event.into_event(operation_id, None);
        let ttl_secs = self.limits.ttl.as_secs_f64();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("begin publish transaction"))?;

        // A lapsed stream starts over rather than growing the old one
        sqlx::query(
            "DELETE FROM agent_runtime_streams WHERE operation_id = $1 AND expires_at <= now()",
        )
        .bind(operation_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("drop expired stream"))?;

        sqlx::query(
            r#"
            INSERT INTO agent_runtime_streams (operation_id, expires_at)
            VALUES ($1, now() + make_interval(secs => $2))
            ON CONFLICT (operation_id) DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(operation_id)
        .bind(ttl_secs)
        .execute(&mut *tx)
        .await
        .map_err(db_error("refresh stream"))?;

        let row = sqlx::query(
            r#"
            INSERT INTO agent_runtime_events (operation_id, step_index, event_type, data, timestamp_ms)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(operation_id)
        .bind(i32::try_from(event.step_index).unwrap_or(i32::MAX))
        .bind(event.event_type.as_str())
        .bind(&event.data)
        .bind(event.timestamp)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("append stream event"))?;
        let id: i64 = row.try_get("id").map_err(db_error("read event id"))?;

        sqlx::query(
            r#"
            DELETE FROM agent_runtime_events
            WHERE operation_id = $1
              AND id <= (
                SELECT id FROM agent_runtime_events
                WHERE operation_id = $1
                ORDER BY id DESC
                OFFSET $2 LIMIT 1
              )
            "#,
        )
        .bind(operation_id)
        .bind(to_i64(self.limits.max_len))
        .execute(&mut *tx)
        .await
        .map_err(db_error("trim stream"))?;

        tx.commit().await.map_err(db_error("commit publish"))?;

        trace!(operation_id = %operation_id, id, "Published stream event");
        Ok(id.to_string())
    }

    async fn subscribe_stream_events(
        &self,
        operation_id: &str,
        from_cursor: &str,
        on_events: &mut (dyn FnMut(Vec<StreamEvent>) + Send),
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut cursor = parse_cursor(from_cursor)?;
        let mut interval = SUBSCRIBE_MIN_INTERVAL;
        debug!(operation_id = %operation_id, cursor, "Stream subscription started");

        loop {
            if *cancel.borrow() {
                break;
            }

            let wait = match self
                .events_after(operation_id, cursor, SUBSCRIBE_BATCH_SIZE)
                .await
            {
                Ok(batch) => match batch.last().and_then(StreamEvent::cursor) {
                    Some(last) => {
                        cursor = last;
                        on_events(batch);
                        interval = SUBSCRIBE_MIN_INTERVAL;
                        interval
                    }
                    None => {
                        interval = (interval * 2).min(SUBSCRIBE_MAX_INTERVAL);
                        interval
                    }
                },
                Err(e) => {
                    warn!(
                        operation_id = %operation_id,
                        error = %e,
                        "Stream poll failed, retrying"
                    );
                    SUBSCRIBE_ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(operation_id = %operation_id, cursor, "Stream subscription stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_stream_history(
        &self,
        operation_id: &str,
        count: usize,
    ) -> Result<Vec<StreamEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.step_index, e.event_type, e.data, e.timestamp_ms
            FROM agent_runtime_events e
            JOIN agent_runtime_streams s ON s.operation_id = e.operation_id
            WHERE e.operation_id = $1 AND s.expires_at > now()
            ORDER BY e.id DESC
            LIMIT $2
            "#,
        )
        .bind(operation_id)
        .bind(to_i64(count))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("read stream history"))?;

        rows.iter()
            .map(|row| event_from_row(operation_id, row))
            .collect()
    }

    #[instrument(skip(self))]
    async fn cleanup_operation(&self, operation_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM agent_runtime_streams WHERE operation_id = $1")
            .bind(operation_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("delete stream"))?;
        debug!(operation_id = %operation_id, "Cleaned up event stream");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge_expired_streams(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM agent_runtime_streams WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(db_error("purge expired streams"))?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    #[instrument(skip(self))]
    async fn get_active_operations_count(&self) -> Result<usize> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM agent_runtime_streams WHERE expires_at > now()",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("count streams"))?;
        let count: i64 = row.try_get("count").map_err(db_error("read stream count"))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn disconnect(&self) -> Result<()> {
        self.pool.close().await;
        debug!("PostgreSQL event bus disconnected");
        Ok(())
    }
}
