// Shared backend availability probe

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::error::{redact_url, BackendError};

/// Open a pool and check the database answers within `timeout`
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    timeout: Duration,
) -> Result<PgPool, BackendError> {
    let unavailable = |reason: String| BackendError::Unavailable {
        url: redact_url(database_url),
        reason,
    };

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(timeout)
        .connect(database_url)
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    if !is_backend_available(&pool, timeout).await {
        pool.close().await;
        return Err(unavailable(format!(
            "no answer within {}ms",
            timeout.as_millis()
        )));
    }
    Ok(pool)
}

/// `SELECT 1` with a deadline; any failure counts as unavailable
pub async fn is_backend_available(pool: &PgPool, timeout: Duration) -> bool {
    let ping = sqlx::query("SELECT 1").execute(pool);
    match tokio::time::timeout(timeout, ping).await {
        Ok(Ok(_)) => {
            debug!("Shared backend reachable");
            true
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Shared backend probe failed");
            false
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Shared backend probe timed out");
            false
        }
    }
}
