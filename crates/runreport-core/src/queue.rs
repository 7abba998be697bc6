//! Delayed report dispatch on tokio.
//!
//! [`TokioQueue`] is the sending half handed to reporters; [`spawn_worker`]
//! owns the receiving half. Each job waits out the configured delay on its
//! own task, so a burst of reports does not serialize behind one timer. When
//! every queue handle is dropped the worker stops accepting jobs, waits for
//! the in-flight ones and returns a [`WorkerSummary`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchQueue, Notifier, SendReportJob};
use crate::error::{ReportError, ReportResult};
use crate::storage::ReportStore;

/// Sending half of the dispatch queue.
#[derive(Debug, Clone)]
pub struct TokioQueue {
    tx: mpsc::UnboundedSender<SendReportJob>,
}

impl TokioQueue {
    /// Create a queue and the receiver a worker consumes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SendReportJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Create a queue with a worker already running on the current runtime.
    pub fn spawn(
        store: ReportStore,
        notifier: Arc<dyn Notifier>,
        delay: Duration,
    ) -> (Self, JoinHandle<WorkerSummary>) {
        let (queue, rx) = Self::new();
        let handle = spawn_worker(rx, store, notifier, delay);
        (queue, handle)
    }
}

impl DispatchQueue for TokioQueue {
    fn push(&self, job: SendReportJob) -> ReportResult<()> {
        debug!(path = ?job.path, "Queueing report dispatch");
        self.tx
            .send(job)
            .map_err(|e| ReportError::Dispatch(format!("queue closed, dropped job for {}", e.0.path.display())))
    }

    fn is_available(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// What a worker did before shutting down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Run queued jobs until every sender is gone.
pub fn spawn_worker(
    mut rx: mpsc::UnboundedReceiver<SendReportJob>,
    store: ReportStore,
    notifier: Arc<dyn Notifier>,
    delay: Duration,
) -> JoinHandle<WorkerSummary> {
    tokio::spawn(async move {
        let mut jobs: JoinSet<ReportResult<()>> = JoinSet::new();
        let mut summary = WorkerSummary::default();

        loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(job) = received else { break };
                    let store = store.clone();
                    let notifier = Arc::clone(&notifier);
                    jobs.spawn(async move {
                        tokio::time::sleep(delay).await;
                        tokio::task::spawn_blocking(move || job.execute(&store, notifier.as_ref()))
                            .await
                            .map_err(|e| ReportError::Dispatch(format!("dispatch task failed: {}", e)))?
                    });
                }
                Some(finished) = jobs.join_next(), if !jobs.is_empty() => {
                    tally(&mut summary, finished);
                }
            }
        }

        debug!(in_flight = jobs.len(), "Queue closed, draining jobs");
        while let Some(finished) = jobs.join_next().await {
            tally(&mut summary, finished);
        }

        info!(sent = summary.sent, failed = summary.failed, "Dispatch worker stopped");
        summary
    })
}

fn tally(summary: &mut WorkerSummary, finished: Result<ReportResult<()>, tokio::task::JoinError>) {
    match finished {
        Ok(Ok(())) => summary.sent += 1,
        Ok(Err(e)) => {
            warn!(error = %e, "Queued report dispatch failed");
            summary.failed += 1;
        }
        Err(e) => {
            error!(error = %e, "Queued report dispatch panicked");
            summary.failed += 1;
        }
    }
}
