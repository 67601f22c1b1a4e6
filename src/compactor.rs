use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::observability;

/// Background task: compact the WAL whenever `threshold` appends have
/// accumulated since the last compaction. Also refreshes the live gauge.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        metrics::gauge!(observability::RESERVATIONS_LIVE).set(engine.reservation_count() as f64);
        if threshold == 0 {
            continue;
        }
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        info!("compacting WAL after {appends} appends");
        if let Err(e) = engine.compact_wal().await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}
