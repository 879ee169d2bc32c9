// PostgreSQL implementation of StateStore
//
// Snapshot, step history and metadata live in separate tables keyed by
// operation_id. Every write pushes expires_at forward by the state TTL;
// reads ignore rows past it. save_step_result writes all three in one
// transaction.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use steprun_core::{
    AgentOperationMetadata, AgentState, AgentStatus, CreateOperationParams, OperationStats,
    Result, RuntimeError, StateStore, StateStoreLimits, StepResult,
};
use tracing::{debug, error, info, instrument, warn};

/// Map a database failure into a state store error, logging it
fn db_error(action: &'static str) -> impl FnOnce(sqlx::Error) -> RuntimeError {
    move |e| {
        error!("Failed to {}: {}", action, e);
        RuntimeError::state_store(format!("Failed to {action}: {e}"))
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// PostgreSQL state store
///
/// ```ignore
/// let pool = PgPool::connect("postgres://localhost/runtime").await?;
/// let store = PostgresStateStore::new(pool, StateStoreLimits::default());
/// ```
#[derive(Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
    limits: StateStoreLimits,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool, limits: StateStoreLimits) -> Self {
        Self { pool, limits }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn limits(&self) -> &StateStoreLimits {
        &self.limits
    }

    fn ttl_secs(&self) -> f64 {
        self.limits.state_ttl.as_secs_f64()
    }

    async fn upsert_state<'e, E: PgExecutor<'e>>(
        &self,
        executor: E,
        operation_id: &str,
        state: &AgentState,
    ) -> Result<()> {
        let state_json = serde_json::to_value(state)?;
        sqlx::query(
            r#"
            INSERT INTO agent_runtime_states (operation_id, state, updated_at, expires_at)
            VALUES ($1, $2, now(), now() + make_interval(secs => $3))
            ON CONFLICT (operation_id) DO UPDATE
            SET state = EXCLUDED.state,
                updated_at = now(),
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(operation_id)
        .bind(&state_json)
        .bind(self.ttl_secs())
        .execute(executor)
        .await
        .map_err(db_error("save agent state"))?;
        Ok(())
    }

    /// Copy status and counters from `state`, creating the row when missing
    async fn sync_metadata<'e, E: PgExecutor<'e>>(
        &self,
        executor: E,
        operation_id: &str,
        state: &AgentState,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_runtime_metadata
                (operation_id, status, total_cost, total_steps, created_at, last_active_at, expires_at)
            VALUES ($1, $2, $3, $4, now(), now(), now() + make_interval(secs => $5))
            ON CONFLICT (operation_id) DO UPDATE
            SET status = EXCLUDED.status,
                total_cost = EXCLUDED.total_cost,
                total_steps = EXCLUDED.total_steps,
                last_active_at = now(),
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(operation_id)
        .bind(state.status.as_str())
        .bind(state.cost.total)
        .bind(to_i32(state.step_count))
        .bind(self.ttl_secs())
        .execute(executor)
        .await
        .map_err(db_error("update operation metadata"))?;
        Ok(())
    }
}

fn metadata_from_row(row: &PgRow) -> Result<AgentOperationMetadata> {
    let column = |e: sqlx::Error| RuntimeError::state_store(format!("Malformed metadata row: {e}"));

    let status: String = row.try_get("status").map_err(column)?;
    let status = AgentStatus::parse(&status)
        .ok_or_else(|| RuntimeError::state_store(format!("Unknown status in metadata: {status}")))?;
    let agent_config: Option<Value> = row.try_get("agent_config").map_err(column)?;
    let model_runtime_config: Option<Value> = row.try_get("model_runtime_config").map_err(column)?;
    let total_steps: i32 = row.try_get("total_steps").map_err(column)?;

    Ok(AgentOperationMetadata {
        created_at: row.try_get("created_at").map_err(column)?,
        last_active_at: row.try_get("last_active_at").map_err(column)?,
        status,
        total_cost: row.try_get("total_cost").map_err(column)?,
        total_steps: u32::try_from(total_steps).unwrap_or_default(),
        user_id: row.try_get("user_id").map_err(column)?,
        agent_config: agent_config.map(serde_json::from_value).transpose()?,
        model_runtime_config: model_runtime_config
            .map(serde_json::from_value)
            .transpose()?,
    })
}

#[async_trait]
impl StateStore for PostgresStateStore {
    #[instrument(skip(self, params))]
    async fn create_operation_metadata(
        &self,
        operation_id: &str,
        params: CreateOperationParams,
    ) -> Result<()> {
        let agent_config = params
            .agent_config
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let model_runtime_config = params
            .model_runtime_config
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO agent_runtime_metadata
                (operation_id, status, total_cost, total_steps, user_id, agent_config,
                 model_runtime_config, created_at, last_active_at, expires_at)
            VALUES ($1, 'idle', 0, 0, $2, $3, $4, now(), now(), now() + make_interval(secs => $5))
            ON CONFLICT (operation_id) DO UPDATE
            SET status = 'idle',
                total_cost = 0,
                total_steps = 0,
                user_id = EXCLUDED.user_id,
                agent_config = EXCLUDED.agent_config,
                model_runtime_config = EXCLUDED.model_runtime_config,
                created_at = now(),
                last_active_at = now(),
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(operation_id)
        .bind(&params.user_id)
        .bind(&agent_config)
        .bind(&model_runtime_config)
        .bind(self.ttl_secs())
        .execute(&self.pool)
        .await
        .map_err(db_error("create operation metadata"))?;

        debug!(operation_id = %operation_id, "Created operation metadata");
        Ok(())
    }

    #[instrument(skip(self, state), fields(status = %state.status))]
    async fn save_agent_state(&self, operation_id: &str, state: &AgentState) -> Result<()> {
        self.upsert_state(&self.pool, operation_id, state).await?;

        if let Err(e) = self.sync_metadata(&self.pool, operation_id, state).await {
            warn!(operation_id = %operation_id, error = %e, "Metadata sync failed, state saved");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_agent_state(&self, operation_id: &str) -> Result<Option<AgentState>> {
        let row = sqlx::query(
            r#"
            SELECT state FROM agent_runtime_states
            WHERE operation_id = $1 AND expires_at > now()
            "#,
        )
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load agent state"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: Value = row.try_get("state").map_err(db_error("read agent state"))?;
        Ok(Some(serde_json::from_value(state)?))
    }

    #[instrument(skip(self, step), fields(step_index = step.step_index))]
    async fn save_step_result(&self, operation_id: &str, step: &StepResult) -> Result<()> {
        let step_json = serde_json::to_value(step)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("begin step transaction"))?;

        self.upsert_state(&mut *tx, operation_id, &step.new_state)
            .await?;

        // An expired list must not resurface its old steps
        sqlx::query(
            "DELETE FROM agent_runtime_step_lists WHERE operation_id = $1 AND expires_at <= now()",
        )
        .bind(operation_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("drop expired step history"))?;

        sqlx::query(
            r#"
            INSERT INTO agent_runtime_step_lists (operation_id, expires_at)
            VALUES ($1, now() + make_interval(secs => $2))
            ON CONFLICT (operation_id) DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(operation_id)
        .bind(self.ttl_secs())
        .execute(&mut *tx)
        .await
        .map_err(db_error("refresh step history"))?;

        sqlx::query(
            r#"
            INSERT INTO agent_runtime_steps (operation_id, step_index, step)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(operation_id)
        .bind(to_i32(step.step_index))
        .bind(&step_json)
        .execute(&mut *tx)
        .await
        .map_err(db_error("append step"))?;

        // Keep the newest history_cap steps
        sqlx::query(
            r#"
            DELETE FROM agent_runtime_steps
            WHERE operation_id = $1
              AND id <= (
                SELECT id FROM agent_runtime_steps
                WHERE operation_id = $1
                ORDER BY id DESC
                OFFSET $2 LIMIT 1
              )
            "#,
        )
        .bind(operation_id)
        .bind(to_i64(self.limits.history_cap))
        .execute(&mut *tx)
        .await
        .map_err(db_error("trim step history"))?;

        self.sync_metadata(&mut *tx, operation_id, &step.new_state)
            .await?;

        tx.commit().await.map_err(db_error("commit step"))?;

        debug!(
            operation_id = %operation_id,
            step_index = step.step_index,
            status = %step.new_state.status,
            "Saved step result"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_execution_history(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> Result<Vec<StepResult>> {
        let rows = sqlx::query(
            r#"
            SELECT step FROM (
                SELECT s.id, s.step
                FROM agent_runtime_steps s
                JOIN agent_runtime_step_lists l ON l.operation_id = s.operation_id
                WHERE s.operation_id = $1 AND l.expires_at > now()
                ORDER BY s.id DESC
                LIMIT $2
            ) recent
            ORDER BY id ASC
            "#,
        )
        .bind(operation_id)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("load execution history"))?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in rows {
            let step: Value = row.try_get("step").map_err(db_error("read step"))?;
            steps.push(serde_json::from_value(step)?);
        }
        Ok(steps)
    }

    #[instrument(skip(self))]
    async fn get_operation_metadata(
        &self,
        operation_id: &str,
    ) -> Result<Option<AgentOperationMetadata>> {
        let row = sqlx::query(
            r#"
            SELECT status, total_cost, total_steps, user_id, agent_config,
                   model_runtime_config, created_at, last_active_at
            FROM agent_runtime_metadata
            WHERE operation_id = $1 AND expires_at > now()
            "#,
        )
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load operation metadata"))?;

        row.as_ref().map(metadata_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn get_active_operations(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT operation_id FROM agent_runtime_metadata
            WHERE expires_at > now()
            ORDER BY last_active_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list active operations"))?;

        rows.iter()
            .map(|row| {
                row.try_get("operation_id")
                    .map_err(db_error("read operation id"))
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> Result<OperationStats> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM agent_runtime_metadata
            WHERE expires_at > now()
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("count operations"))?;

        let mut stats = OperationStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(db_error("read status"))?;
            let count: i64 = row.try_get("count").map_err(db_error("read count"))?;
            match AgentStatus::parse(&status) {
                Some(status) => stats.record_many(status, usize::try_from(count).unwrap_or(0)),
                None => warn!(status = %status, "Ignoring unknown status in metadata"),
            }
        }
        Ok(stats)
    }

    #[instrument(skip(self))]
    async fn cleanup_expired_operations(&self) -> Result<Vec<String>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("begin cleanup transaction"))?;

        let rows = sqlx::query(
            r#"
            DELETE FROM agent_runtime_metadata
            WHERE last_active_at < now() - make_interval(secs => $1)
               OR expires_at <= now()
            RETURNING operation_id
            "#,
        )
        .bind(self.limits.inactivity_threshold.as_secs_f64())
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error("delete expired metadata"))?;

        let removed = rows
            .iter()
            .map(|row| row.try_get::<String, _>("operation_id"))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_error("read operation id"))?;

        sqlx::query(
            "DELETE FROM agent_runtime_states WHERE operation_id = ANY($1) OR expires_at <= now()",
        )
        .bind(&removed)
        .execute(&mut *tx)
        .await
        .map_err(db_error("delete expired states"))?;

        sqlx::query(
            "DELETE FROM agent_runtime_step_lists WHERE operation_id = ANY($1) OR expires_at <= now()",
        )
        .bind(&removed)
        .execute(&mut *tx)
        .await
        .map_err(db_error("delete expired step history"))?;

        tx.commit().await.map_err(db_error("commit cleanup"))?;

        if !removed.is_empty() {
            info!(count = removed.len(), "Cleaned up expired operations");
        }
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn delete_agent_operation(&self, operation_id: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("begin delete transaction"))?;

        for statement in [
            "DELETE FROM agent_runtime_states WHERE operation_id = $1",
            "DELETE FROM agent_runtime_step_lists WHERE operation_id = $1",
            "DELETE FROM agent_runtime_metadata WHERE operation_id = $1",
        ] {
            sqlx::query(statement)
                .bind(operation_id)
                .execute(&mut *tx)
                .await
                .map_err(db_error("delete operation"))?;
        }

        tx.commit().await.map_err(db_error("commit delete"))?;
        debug!(operation_id = %operation_id, "Deleted operation");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.pool.close().await;
        debug!("PostgreSQL state store disconnected");
        Ok(())
    }
}
