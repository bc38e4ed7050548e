use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::Config;
use crate::engine::Engine;

/// Compact the WAL if at least `threshold` records were appended since the
/// last compaction. Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appended} appends");
            true
        }
        Err(e) => {
            // Retried on the next tick.
            debug!("compaction skipped: {e}");
            false
        }
    }
}

/// Background task that periodically compacts the WAL. Hosts spawn it;
/// the engine never does.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// `run_compactor` with the threshold and interval from `config`.
pub async fn run_configured(engine: Arc<Engine>, config: Config) {
    run_compactor(engine, config.compact_threshold, config.compact_interval).await
}
