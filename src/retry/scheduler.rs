//! Retry scheduler: ticker plus a fixed worker pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::shutdown::ShutdownSignal;

use super::manager::{RetryAttempt, RetryError, RetryManager};

/// What to do with a due attempt. An error re-enters the manager's
/// failure path; success removes the record.
#[async_trait]
pub trait RetryCallback: Send + Sync {
    async fn retry(&self, attempt: &RetryAttempt) -> Result<(), RetryError>;

    /// Called when an attempt exhausts its budget; the default just logs.
    /// Embedders hook their dead-letter path here.
    async fn on_exhausted(&self, attempt: &RetryAttempt) {
        warn!(
            message_id = %attempt.message_id,
            attempts = attempt.attempt_count,
            "retry budget exhausted, dropping message"
        );
    }
}

/// Drives due attempts into a worker pool on a fixed interval.
pub struct RetryScheduler {
    manager: Arc<RetryManager>,
    interval: Duration,
    worker_count: usize,
    callback: Arc<dyn RetryCallback>,
}

impl RetryScheduler {
    pub fn new(
        manager: Arc<RetryManager>,
        interval: Duration,
        worker_count: usize,
        callback: Arc<dyn RetryCallback>,
    ) -> Self {
        Self {
            manager,
            interval,
            worker_count: worker_count.max(1),
            callback,
        }
    }

    /// Run until shutdown. Each tick first drops expired attempts, then
    /// queues everything due onto the worker pool.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!(
            interval_ms = self.interval.as_millis(),
            workers = self.worker_count,
            "retry scheduler started"
        );

        let (work_tx, work_rx) = mpsc::channel::<RetryAttempt>(self.worker_count * 4);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut workers = Vec::with_capacity(self.worker_count);
        for worker_id in 0..self.worker_count {
            let rx = work_rx.clone();
            let manager = self.manager.clone();
            let callback = self.callback.clone();
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, manager, callback, shutdown).await;
            }));
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("retry scheduler shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    let expired = self.manager.cleanup_expired();
                    if expired > 0 {
                        debug!(expired, "dropped expired retry attempts");
                    }

                    for attempt in self.manager.pending_retries() {
                        if work_tx.send(attempt).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }

        // Closing the channel unblocks idle workers.
        drop(work_tx);
        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    work_rx: Arc<Mutex<mpsc::Receiver<RetryAttempt>>>,
    manager: Arc<RetryManager>,
    callback: Arc<dyn RetryCallback>,
    mut shutdown: ShutdownSignal,
) {
    loop {
        let attempt = tokio::select! {
            biased;
            _ = shutdown.recv() => return,
            attempt = async { work_rx.lock().await.recv().await } => match attempt {
                Some(attempt) => attempt,
                None => return,
            },
        };

        // The record may have been satisfied or dropped since the tick.
        if manager.get_attempt(&attempt.message_id).is_none() {
            continue;
        }

        debug!(
            worker = worker_id,
            message_id = %attempt.message_id,
            attempt = attempt.attempt_count,
            "retrying"
        );

        match callback.retry(&attempt).await {
            Ok(()) => {
                debug!(message_id = %attempt.message_id, "retry succeeded");
                manager.remove_attempt(&attempt.message_id);
            }
            Err(err) => {
                match manager.record_failure(
                    &attempt.message_id,
                    &attempt.profile_id,
                    &err.to_string(),
                    &attempt.error_category,
                ) {
                    Ok(_) => {}
                    Err(RetryError::MaxAttemptsReached(record)) => {
                        callback.on_exhausted(&record).await;
                        manager.remove_attempt(&record.message_id);
                    }
                    Err(other) => {
                        warn!(
                            message_id = %attempt.message_id,
                            error = %other,
                            "failed to reschedule retry"
                        );
                        manager.remove_attempt(&attempt.message_id);
                    }
                }
            }
        }
    }
}
