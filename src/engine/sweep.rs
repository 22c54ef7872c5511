//! Periodic maintenance loop around [`WorkQueue::sweep`].

use std::sync::Arc;

use crate::kind::WorkKind;

use super::worker::ShutdownToken;
use super::{SweepConfig, SweepReport, WorkQueue};

/// Runs the liveness sweep for one queue on its own interval, until
/// shutdown. A failed sweep is logged and retried on the next tick —
/// the queue keeps serving claims either way.
pub struct Sweeper<K: WorkKind> {
    queue: Arc<WorkQueue<K>>,
    config: SweepConfig,
    shutdown: ShutdownToken,
}

impl<K: WorkKind> Sweeper<K> {
    pub fn new(queue: Arc<WorkQueue<K>>, config: SweepConfig, shutdown: ShutdownToken) -> Self {
        Self {
            queue,
            config,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(
            queue = K::NAME,
            interval_secs = self.config.interval.as_secs(),
            staleness_secs = self.config.staleness.num_seconds(),
            retention_days = self.config.retention.num_days(),
            "sweeper started"
        );

        while !self.shutdown.is_cancelled() {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.shutdown.cancelled() => break,
            }

            match self.queue.sweep(&self.config).await {
                Ok(report) if report != SweepReport::default() => {
                    tracing::info!(
                        queue = K::NAME,
                        released = report.released,
                        invalidated = report.invalidated,
                        purged = report.purged,
                        "sweep reclaimed work"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(queue = K::NAME, error = %e, "sweep failed");
                }
            }
        }

        tracing::info!(queue = K::NAME, "sweeper stopped");
    }
}
