//! Background task draining the fast-store usage buffer into Postgres
//! every 30 seconds, grounded on the same spawn-a-tokio-task-from-main
//! pattern used for periodic refresh jobs elsewhere in this codebase.

use shared::metrics;
use std::time::Duration;
use tracing::{error, info};

use crate::state::AppState;

const DRAIN_INTERVAL: Duration = Duration::from_secs(30);
const DRAIN_BATCH_SIZE: isize = 100;

pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DRAIN_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = drain_once(&state).await {
                error!("usage buffer drain failed: {e}");
            }
        }
    });
}

async fn drain_once(state: &AppState) -> shared::Result<()> {
    let batch = state.redis.drain_usage_batch(DRAIN_BATCH_SIZE).await?;
    if batch.is_empty() {
        return Ok(());
    }

    let batch_len = batch.len();
    let inserted = state.database.insert_usage_records(&batch).await?;
    state.redis.trim_drained(batch_len).await?;

    metrics::USAGE_RECORDS_DRAINED_TOTAL
        .with_label_values(&["inserted"])
        .inc_by(inserted);
    metrics::USAGE_RECORDS_DRAINED_TOTAL
        .with_label_values(&["duplicate"])
        .inc_by(batch_len as u64 - inserted);

    if let Ok(depth) = state.redis.global_buffer_len().await {
        metrics::USAGE_BUFFER_DEPTH
            .with_label_values(&["global"])
            .set(depth);
    }

    info!(inserted, drained = batch_len, "usage buffer drained");
    Ok(())
}
