//! Time-based sealing for the `interval` policy

use super::ingest::{LogIngester, SealTrigger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

/// Seal every non-empty window each `period` until shutdown is signalled.
///
/// Windows still open at shutdown are sealed one last time so that a
/// following writer flush persists them.
pub fn spawn_sealer<T: Clone + Send + 'static>(
    ingester: Arc<LogIngester>,
    period: Duration,
    mut shutdown: broadcast::Receiver<T>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let sealed = ingester.seal_all(SealTrigger::Interval).await;
                    tracing::debug!(sealed = sealed, "Interval seal pass");
                }
                _ = shutdown.recv() => {
                    let sealed = ingester.seal_all(SealTrigger::Interval).await;
                    tracing::info!(sealed = sealed, "Sealer stopping");
                    break;
                }
            }
        }
    })
}
