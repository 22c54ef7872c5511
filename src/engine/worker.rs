//! The poll-loop worker.
//!
//! One [`Worker`] per queue kind per process: claim a batch, process the
//! items concurrently, sleep the poll interval, repeat. A panicking
//! executor takes down only its own task — the item stays processing and
//! the liveness sweep returns it to pending once its heartbeat goes
//! stale.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::kind::WorkKind;

use super::pipeline::Processor;
use super::sweep::Sweeper;
use super::{SweepConfig, WorkQueue};

/// Token for signaling graceful shutdown to workers.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tuning for one worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Claim attribution; must be unique per worker process.
    pub assignee: String,
    /// Sleep between empty polls.
    pub poll_interval: Duration,
    /// Max items claimed per iteration.
    pub batch_size: usize,
    /// Initial delay after an iteration that errored (e.g. the store is
    /// down). Doubles per consecutive failure up to `crash_backoff_cap`.
    pub crash_backoff: Duration,
    pub crash_backoff_cap: Duration,
    /// Maintenance sweep run alongside the poll loop.
    pub sweep: SweepConfig,
}

impl WorkerConfig {
    pub fn new(assignee: impl Into<String>) -> Self {
        Self {
            assignee: assignee.into(),
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            crash_backoff: Duration::from_secs(5),
            crash_backoff_cap: Duration::from_secs(60),
            sweep: SweepConfig::default(),
        }
    }

    /// Like [`WorkerConfig::new`], but the sweep staleness comes from
    /// the kind the worker will serve.
    pub fn for_kind<K: WorkKind>(assignee: impl Into<String>) -> Self {
        Self {
            sweep: SweepConfig::for_kind::<K>(),
            ..Self::new(assignee)
        }
    }
}

/// Poll-loop worker for one queue kind.
pub struct Worker<K: WorkKind> {
    queue: Arc<WorkQueue<K>>,
    processor: Arc<Processor<K>>,
    config: WorkerConfig,
    shutdown: ShutdownToken,
}

impl<K: WorkKind> Worker<K> {
    pub fn new(
        queue: Arc<WorkQueue<K>>,
        processor: Arc<Processor<K>>,
        config: WorkerConfig,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            queue,
            processor,
            config,
            shutdown,
        }
    }

    /// Run until the shutdown token fires. Spawns the sweeper alongside
    /// the poll loop and waits for in-flight items before returning.
    pub async fn run(self) {
        tracing::info!(
            queue = K::NAME,
            assignee = %self.config.assignee,
            poll_secs = self.config.poll_interval.as_secs(),
            batch = self.config.batch_size,
            "worker started"
        );

        let sweeper = Sweeper::new(
            Arc::clone(&self.queue),
            self.config.sweep.clone(),
            self.shutdown.clone(),
        );
        let sweep_handle = tokio::spawn(sweeper.run());

        let mut backoff = self.config.crash_backoff;
        while !self.shutdown.is_cancelled() {
            match self.run_iteration().await {
                Ok(processed) => {
                    backoff = self.config.crash_backoff;
                    if processed == 0 {
                        self.idle(self.config.poll_interval).await;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        queue = K::NAME,
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "worker iteration failed; backing off"
                    );
                    self.idle(backoff).await;
                    backoff = (backoff * 2).min(self.config.crash_backoff_cap);
                }
            }
        }

        let _ = sweep_handle.await;
        tracing::info!(queue = K::NAME, "worker stopped");
    }

    /// Claim and process one batch. Returns the number of items handled.
    async fn run_iteration(&self) -> crate::error::Result<usize> {
        let items = self
            .queue
            .claim_batch(&self.config.assignee, self.config.batch_size)
            .await?;
        if items.is_empty() {
            return Ok(0);
        }

        let count = items.len();
        let mut tasks = JoinSet::new();
        for item in items {
            let processor = Arc::clone(&self.processor);
            tasks.spawn(async move { processor.process_item(item).await });
        }

        // A panic surfaces here as a JoinError. The item stays claimed;
        // the sweep reclaims it once the heartbeat goes stale.
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(queue = K::NAME, error = %e, "processing task crashed");
            }
        }
        Ok(count)
    }

    async fn idle(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}
