//! Background eviction of idle MCP sessions.

use super::session::SessionStore;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodic task that evicts idle sessions and prunes aged events.
///
/// A sweep that has started always runs to completion; cancellation is only
/// observed between sweeps.
pub struct SessionSweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SessionSweeper {
    /// Spawn the sweeper. The first sweep runs one `period` after start.
    pub fn spawn(store: SessionStore, period: Duration, idle_timeout: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "MCP session sweeper started (every {}s, idle timeout {}s)",
                period.as_secs(),
                idle_timeout.as_secs()
            );

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = store.evict_idle(idle_timeout).await;
                        if !evicted.is_empty() {
                            info!("Evicted {} idle MCP session(s)", evicted.len());
                        }
                        store.prune_expired().await;
                    }
                }
            }
            debug!("MCP session sweeper stopped");
        });

        Self { cancel, handle }
    }

    /// Stop the sweeper and wait for an in-progress sweep to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("MCP session sweeper task failed: {}", e);
        }
    }
}
