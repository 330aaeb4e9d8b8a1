use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Background task that periodically drops expired idempotency claims.
/// Successful claims are left to age out on purpose (duplicate detection
/// inside the TTL window); this only reclaims the memory afterwards.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let reaped = engine.claims.sweep(now_ms());
        if reaped > 0 {
            metrics::counter!(crate::observability::CLAIMS_REAPED_TOTAL).increment(reaped as u64);
            info!("reaped {reaped} expired idempotency claims");
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => debug!("compaction skipped: {e}"),
        }
    }
}
