//! Bounded pool of orchestrator workers judging submissions concurrently.

use std::sync::Arc;

use common::SubmissionStatus;
use dashmap::DashSet;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::JudgeError;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    Closed,
}

struct Job {
    submission_id: i32,
    reply: oneshot::Sender<Result<SubmissionStatus, JudgeError>>,
}

/// Completion handle for an enqueued submission.
pub struct JudgeTicket {
    rx: oneshot::Receiver<Result<SubmissionStatus, JudgeError>>,
}

impl JudgeTicket {
    /// Wait for the judging outcome. `None` if the worker went away first.
    pub async fn wait(self) -> Option<Result<SubmissionStatus, JudgeError>> {
        self.rx.await.ok()
    }
}

pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    queued: Arc<DashSet<i32>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` workers sharing a queue of `capacity` submissions.
    pub fn spawn(orchestrator: Arc<Orchestrator>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let queued = Arc::new(DashSet::new());

        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let queued = queued.clone();
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else { break };
                        let submission_id = job.submission_id;

                        let result = orchestrator.judge_submission(submission_id).await;
                        match &result {
                            Ok(status) => {
                                debug!(worker, submission_id, status = %status, "Job finished")
                            }
                            Err(e) if e.is_duplicate() => {
                                info!(submission_id, reason = %e, "Duplicate judge request ignored")
                            }
                            Err(e @ JudgeError::Validation { .. }) => {
                                warn!(submission_id, error = %e, "Rejected invalid submission")
                            }
                            Err(e) => error!(submission_id, error = %e, "Judging failed"),
                        }

                        queued.remove(&submission_id);
                        let _ = job.reply.send(result);
                    }
                    debug!(worker, "Worker stopped");
                })
            })
            .collect();

        Self {
            tx,
            queued,
            workers,
        }
    }

    /// Queue a submission for judging.
    ///
    /// Returns `None` when the submission is already queued or being judged
    /// by this pool; the duplicate is a no-op.
    pub async fn enqueue(&self, submission_id: i32) -> Result<Option<JudgeTicket>, PoolError> {
        if !self.queued.insert(submission_id) {
            debug!(submission_id, "Submission already queued, ignoring");
            return Ok(None);
        }

        let (reply, rx) = oneshot::channel();
        let job = Job {
            submission_id,
            reply,
        };
        if self.tx.send(job).await.is_err() {
            self.queued.remove(&submission_id);
            return Err(PoolError::Closed);
        }
        Ok(Some(JudgeTicket { rx }))
    }

    /// Submissions queued or being judged.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Stop accepting work and wait for queued submissions to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        for result in join_all(self.workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}
