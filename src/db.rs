use std::{future::Future, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::warn;

use crate::{config::DbConfig, error::StoreError};

/// Deadline applied to every store call.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn connect(cfg: &DbConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(cfg.max_open_conns)
        .min_connections(cfg.min_idle_conns)
        .idle_timeout(Some(Duration::from_secs(cfg.max_idle_time_secs)))
        .acquire_timeout(QUERY_TIMEOUT)
        .connect(&cfg.url)
        .await
        .context("connect to database")
}

/// Runs a store operation under [`QUERY_TIMEOUT`].
///
/// When the deadline fires the inner future is dropped; any open
/// `sqlx::Transaction` inside it rolls back on drop. A deadline that fires
/// while `COMMIT` is in flight can still leave the writes applied.
pub async fn with_timeout<T, F>(op: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(res) => res,
        Err(_) => {
            warn!(op, "store call timed out");
            Err(StoreError::Timeout(op))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_inner_result() {
        let ok = with_timeout("noop", async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = with_timeout("missing", async { Err::<(), _>(StoreError::NotFound) }).await;
        assert!(matches!(err, Err(StoreError::NotFound)));
    }
}
