//! Ordered background writer for logs and sealed windows
//!
//! Ingestion hands work to an unbounded MPSC channel and moves on; a single
//! consumer applies jobs to SQLite in arrival order. Because a log is always
//! enqueued before it can reach an accumulator, the window that absorbs it is
//! always written after the log row exists. The backlog is exported as a gauge
//! and a warning is logged each time it reaches the configured depth.

use crate::error::AppError;
use crate::metrics;
use crate::models::{RequestLog, SealedWindow};
use crate::observability::database::LogRepository;
use dashmap::DashSet;
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum WriteJob {
    Log(Box<RequestLog>),
    Window(Box<SealedWindow>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background writer. Cheap to clone.
#[derive(Clone)]
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<WriteJob>,
    repo: LogRepository,
    backlog: Arc<AtomicUsize>,
    warn_depth: usize,
    /// Caller-supplied log ids that are queued but not yet written
    claimed: Arc<DashSet<String>>,
}

impl PersistenceWriter {
    /// Spawn the writer task
    ///
    /// # Arguments
    /// * `repo` - Repository the jobs are applied to
    /// * `warn_depth` - Backlog at which a warning is logged; enqueueing never waits
    pub fn spawn(repo: LogRepository, warn_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();
        let backlog = Arc::new(AtomicUsize::new(0));
        let claimed = Arc::new(DashSet::new());

        let consumer_repo = repo.clone();
        let consumer_backlog = Arc::clone(&backlog);
        let consumer_claimed = Arc::clone(&claimed);
        tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(async {
                while let Some(job) = rx.recv().await {
                    let written_id = match &job {
                        WriteJob::Log(log) => Some(log.id.clone()),
                        _ => None,
                    };
                    apply(&consumer_repo, job).await;
                    if let Some(id) = written_id {
                        consumer_claimed.remove(&id);
                    }
                    let depth = consumer_backlog.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
                    metrics::set_writer_backlog(depth);
                }
            })
            .catch_unwind()
            .await;
            match result {
                Ok(()) => tracing::info!("Persistence writer stopped"),
                Err(e) => tracing::error!(panic = ?e, "Persistence writer panicked"),
            }
        });

        Self {
            tx,
            repo,
            backlog,
            warn_depth: warn_depth.max(1),
            claimed,
        }
    }

    /// Reserve a caller-supplied log id.
    ///
    /// Fails with `Validation` when the id is already queued or stored. A
    /// successful claim lasts until the log has been written.
    pub async fn claim_log_id(&self, id: &str) -> Result<(), AppError> {
        let duplicate = || AppError::Validation(format!("log id '{}' was already submitted", id));

        if !self.claimed.insert(id.to_string()) {
            return Err(duplicate());
        }
        // checked after the claim so a log written in between is still seen
        match self.repo.log_by_id(id).await {
            Ok(None) => Ok(()),
            Ok(Some(_)) => {
                self.claimed.remove(id);
                Err(duplicate())
            }
            Err(e) => {
                self.claimed.remove(id);
                Err(e)
            }
        }
    }

    pub fn write_log(&self, log: RequestLog) {
        self.enqueue(WriteJob::Log(Box::new(log)), "request log");
    }

    pub fn write_window(&self, window: SealedWindow) {
        self.enqueue(WriteJob::Window(Box::new(window)), "sealed window");
    }

    /// Jobs enqueued but not yet applied
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    /// Wait until every job enqueued before this call has been applied
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if !self.enqueue(WriteJob::Flush(done_tx), "flush") {
            tracing::warn!("Persistence writer is not running, nothing to flush");
            return;
        }
        let _ = done_rx.await;
    }

    fn enqueue(&self, job: WriteJob, what: &str) -> bool {
        let depth = self.backlog.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.send(job).is_err() {
            self.backlog.fetch_sub(1, Ordering::AcqRel);
            tracing::error!(job = what, "Persistence writer is not running, job dropped");
            return false;
        }

        metrics::set_writer_backlog(depth);
        if depth == self.warn_depth {
            tracing::warn!(
                backlog = depth,
                "Persistence writer is falling behind"
            );
        }
        true
    }
}

async fn apply(repo: &LogRepository, job: WriteJob) {
    match job {
        WriteJob::Log(log) => {
            if let Err(e) = repo.insert_log(&log).await {
                tracing::error!(
                    log_id = %log.id,
                    request_id = %log.request_id,
                    error = %e,
                    "Failed to write request log"
                );
            }
        }
        WriteJob::Window(window) => match repo.persist_window(&window).await {
            Ok(stamped) => {
                tracing::debug!(
                    insight_id = %window.insight.id,
                    request_id = %window.insight.request_id,
                    stamped = stamped,
                    "Persisted sealed window"
                );
                if stamped < window.log_ids.len() as u64 {
                    tracing::warn!(
                        insight_id = %window.insight.id,
                        expected = window.log_ids.len(),
                        stamped = stamped,
                        "Some logs were missing or already linked"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    insight_id = %window.insight.id,
                    request_id = %window.insight.request_id,
                    error = %e,
                    "Failed to persist sealed window"
                );
            }
        },
        WriteJob::Flush(done) => {
            let _ = done.send(());
        }
    }
}
