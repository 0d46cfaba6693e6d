//! # Analysis Queue and Worker Pool
//!
//! Finished sessions are submitted to an unbounded queue that a small pool of
//! tokio workers drains. Only [`AnalysisOutcome::TransientError`] is retried:
//! the task is re-enqueued by a detached timer after the policy's delay, so a
//! worker never sits idle while a job backs off.
//!
//! ## Default Policy:
//! - 3 attempts in total
//! - 30s after the first failure, 60s after the second
//! - abandoned once more than 2 exceptions have accumulated
//!
//! When the policy gives up, a permanent-failure record is written with the
//! attempt count and the last error.

use crate::analysis::job::{AnalysisJob, AnalysisOutcome};
use crate::analysis::model::{AnalysisStatus, SessionStatus};
use crate::analysis::store::{SessionStore, StoreError};
use crate::config::AnalysisConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("analysis queue is shut down")]
    Closed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
    pub max_exceptions: u32,
}

impl From<&AnalysisConfig> for RetryPolicy {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delays: config.retry_delays_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
            max_exceptions: config.max_exceptions,
        }
    }
}

impl RetryPolicy {
    /// Decide what happens after failed attempt number `attempts` (1-based),
    /// with `exceptions` transient failures seen so far.
    pub fn decide(&self, attempts: u32, exceptions: u32) -> RetryDecision {
        if attempts >= self.max_attempts || exceptions > self.max_exceptions {
            return RetryDecision::Exhausted;
        }
        let index = (attempts.max(1) - 1) as usize;
        match self.delays.get(index).or_else(|| self.delays.last()) {
            Some(delay) => RetryDecision::RetryAfter(*delay),
            None => RetryDecision::Exhausted,
        }
    }
}

/// One unit of work on the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisTask {
    pub session_id: Uuid,
    /// Attempts already made
    pub attempts: u32,
    pub exceptions: u32,
    pub last_error: Option<String>,
}

impl AnalysisTask {
    fn first(session_id: Uuid) -> Self {
        Self {
            session_id,
            attempts: 0,
            exceptions: 0,
            last_error: None,
        }
    }
}

/// Producer handle; cheap to clone.
#[derive(Clone)]
pub struct AnalysisQueue {
    tx: mpsc::UnboundedSender<AnalysisTask>,
    store: Arc<dyn SessionStore>,
}

impl AnalysisQueue {
    pub fn new(store: Arc<dyn SessionStore>) -> (Self, mpsc::UnboundedReceiver<AnalysisTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, store }, rx)
    }

    /// Enqueue the analysis of `session_id` and stamp `analysis_enqueued_at`.
    pub async fn submit(&self, session_id: Uuid) -> Result<(), QueueError> {
        self.store.mark_analysis_enqueued(session_id).await?;
        self.tx.send(AnalysisTask::first(session_id)).map_err(|_| QueueError::Closed)?;
        debug!(session_id = %session_id, "Analysis enqueued");
        Ok(())
    }

    /// Mark the interview completed and enqueue its analysis.
    pub async fn complete_session(&self, session_id: Uuid) -> Result<(), QueueError> {
        self.store.set_session_status(session_id, SessionStatus::Completed).await?;
        self.submit(session_id).await
    }

    fn schedule_retry(&self, task: AnalysisTask, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(task).is_err() {
                debug!("Queue closed before a retry could be enqueued");
            }
        });
    }
}

/// Running workers. Dropping the pool stops them once their current attempt ends.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing `rx`.
    pub fn start(
        workers: usize,
        queue: AnalysisQueue,
        rx: mpsc::UnboundedReceiver<AnalysisTask>,
        job: Arc<AnalysisJob>,
        policy: RetryPolicy,
    ) -> Self {
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown, _) = watch::channel(false);

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    queue: queue.clone(),
                    job: job.clone(),
                    policy: policy.clone(),
                };
                let rx = rx.clone();
                let shutdown = shutdown.subscribe();
                tokio::spawn(worker.run(rx, shutdown))
            })
            .collect();

        info!(workers = workers.max(1), "Analysis workers started");
        Self { shutdown, handles }
    }

    /// Stop taking new tasks and wait for in-flight attempts to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!("Analysis worker panicked: {}", err);
            }
        }
        info!("Analysis workers stopped");
    }
}

struct Worker {
    id: usize,
    queue: AnalysisQueue,
    job: Arc<AnalysisJob>,
    policy: RetryPolicy,
}

impl Worker {
    async fn run(self, rx: Arc<Mutex<mpsc::UnboundedReceiver<AnalysisTask>>>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = shutdown.changed() => None,
                    task = rx.recv() => task,
                }
            };
            match next {
                Some(task) => self.process(task).await,
                None => break,
            }
        }
        debug!(worker = self.id, "Analysis worker exiting");
    }

    async fn process(&self, task: AnalysisTask) {
        let attempt = task.attempts + 1;
        let session_id = task.session_id;
        debug!(worker = self.id, session_id = %session_id, attempt, "Running analysis attempt");

        match self.job.run(session_id).await {
            AnalysisOutcome::Completed(_) => {
                info!(session_id = %session_id, attempt, "Analysis attempt succeeded");
            }
            AnalysisOutcome::ValidationFailed(reason) => {
                info!(session_id = %session_id, reason = %reason, "Analysis rejected, not retrying");
            }
            AnalysisOutcome::Skipped(reason) => {
                debug!(session_id = %session_id, reason = ?reason, "Analysis skipped");
            }
            AnalysisOutcome::TransientError(message) => {
                let exceptions = task.exceptions + 1;
                match self.policy.decide(attempt, exceptions) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            session_id = %session_id,
                            attempt,
                            retry_in_secs = delay.as_secs(),
                            "Analysis attempt failed, retry scheduled"
                        );
                        self.queue.schedule_retry(
                            AnalysisTask {
                                session_id,
                                attempts: attempt,
                                exceptions,
                                last_error: Some(message),
                            },
                            delay,
                        );
                    }
                    RetryDecision::Exhausted => {
                        record_permanent_failure(self.queue.store.as_ref(), session_id, attempt, &message).await;
                    }
                }
            }
        }
    }
}

/// Persist the terminal diagnostic written only when retries are exhausted.
pub async fn record_permanent_failure(store: &dyn SessionStore, session_id: Uuid, attempts: u32, last_error: &str) {
    let result = json!({
        "error": "permanently_failed",
        "reason": format!("Analysis could not be completed after {} attempts.", attempts),
        "attempts": attempts,
        "last_error": last_error,
        "retryable": false,
    });

    match store
        .transition_analysis(
            session_id,
            &[AnalysisStatus::Failed, AnalysisStatus::Processing, AnalysisStatus::Pending],
            AnalysisStatus::Failed,
            Some(result),
        )
        .await
    {
        Ok(true) => error!(session_id = %session_id, attempts, last_error, "Analysis permanently failed"),
        Ok(false) => debug!(session_id = %session_id, "Session completed elsewhere, no failure recorded"),
        Err(err) => error!(session_id = %session_id, "Could not record permanent failure: {}", err),
    }
}
