//! Periodic eviction of sessions whose process has died.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use claude_remote_core::SessionRegistry;

/// Run `health_sweep` every `interval_secs` seconds.
///
/// Returns `None` when the interval is zero.
pub fn spawn(registry: Arc<SessionRegistry>, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        tracing::info!("Health sweeper disabled");
        return None;
    }

    let period = Duration::from_secs(interval_secs);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = registry.health_sweep().await;
            if !report.evicted.is_empty() {
                tracing::info!(
                    evicted = report.evicted.len(),
                    remaining = report.active,
                    "Health sweep evicted dead sessions"
                );
            }
        }
    }))
}
