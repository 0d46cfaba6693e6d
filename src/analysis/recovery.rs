//! # Recovery Sweeps
//!
//! Operational safety net for analyses that fell through the cracks:
//!
//! - **Stuck sweep**: `processing` for longer than `stuck_after` (the worker
//!   died mid-attempt) → reset to `pending` and enqueue again
//! - **Never-enqueued sweep**: interview `completed`, analysis still `pending`,
//!   never enqueued and ended longer than `unenqueued_after` ago → enqueue
//!
//! Both feed the normal queue, so the job's entry guard keeps them idempotent.

use crate::analysis::model::{AnalysisStatus, SessionStatus};
use crate::analysis::queue::{AnalysisQueue, QueueError};
use crate::analysis::store::SessionStore;
use crate::config::RecoveryConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    /// Stuck sessions reset to pending and re-enqueued
    pub reset: Vec<Uuid>,
    /// Completed sessions enqueued for the first time
    pub enqueued: Vec<Uuid>,
}

pub struct RecoverySweeper {
    store: Arc<dyn SessionStore>,
    queue: AnalysisQueue,
    stuck_after: chrono::Duration,
    unenqueued_after: chrono::Duration,
}

impl RecoverySweeper {
    pub fn new(store: Arc<dyn SessionStore>, queue: AnalysisQueue, config: &RecoveryConfig) -> Self {
        Self {
            store,
            queue,
            stuck_after: chrono::Duration::seconds(config.stuck_after_secs as i64),
            unenqueued_after: chrono::Duration::seconds(config.unenqueued_after_secs as i64),
        }
    }

    pub async fn sweep_stuck(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, QueueError> {
        let cutoff = now - self.stuck_after;
        let mut reset = Vec::new();

        for session in self.store.list_sessions().await? {
            if session.analysis_status != AnalysisStatus::Processing || session.analysis_updated_at >= cutoff {
                continue;
            }
            let reclaimed = self
                .store
                .transition_analysis(session.id, &[AnalysisStatus::Processing], AnalysisStatus::Pending, None)
                .await?;
            if !reclaimed {
                continue;
            }
            warn!(session_id = %session.id, since = %session.analysis_updated_at, "Analysis stuck in processing, re-enqueueing");
            self.queue.submit(session.id).await?;
            reset.push(session.id);
        }
        Ok(reset)
    }

    pub async fn sweep_unenqueued(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, QueueError> {
        let cutoff = now - self.unenqueued_after;
        let mut enqueued = Vec::new();

        for session in self.store.list_sessions().await? {
            let overdue = session.ended_at.map_or(false, |ended| ended < cutoff);
            if session.status == SessionStatus::Completed
                && session.analysis_status == AnalysisStatus::Pending
                && session.analysis_enqueued_at.is_none()
                && overdue
            {
                info!(session_id = %session.id, "Completed session was never analysed, enqueueing");
                self.queue.submit(session.id).await?;
                enqueued.push(session.id);
            }
        }
        Ok(enqueued)
    }

    /// Run both sweeps once.
    pub async fn run_once(&self) -> Result<SweepReport, QueueError> {
        let now = Utc::now();
        let reset = self.sweep_stuck(now).await?;
        let enqueued = self.sweep_unenqueued(now).await?;
        if !reset.is_empty() || !enqueued.is_empty() {
            info!(reset = reset.len(), enqueued = enqueued.len(), "Recovery sweep finished");
        }
        Ok(SweepReport { reset, enqueued })
    }

    /// Run both sweeps every `interval` until the task is aborted.
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    warn!("Recovery sweep failed: {}", err);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::store::InMemorySessionStore;
    use crate::config::AppConfig;
    use crate::testing::seed_session;

    fn sweeper(store: Arc<InMemorySessionStore>) -> (RecoverySweeper, tokio::sync::mpsc::UnboundedReceiver<crate::analysis::queue::AnalysisTask>) {
        let (queue, rx) = AnalysisQueue::new(store.clone());
        (RecoverySweeper::new(store, queue, &AppConfig::default().recovery), rx)
    }

    #[tokio::test]
    async fn test_stuck_processing_is_reset_and_requeued() {
        let store = Arc::new(InMemorySessionStore::new());
        let stuck = seed_session(&store, "").await;
        let fresh = seed_session(&store, "").await;
        for id in [stuck, fresh] {
            store
                .transition_analysis(id, &[AnalysisStatus::Pending], AnalysisStatus::Processing, None)
                .await
                .unwrap();
        }
        store
            .set_timestamps(stuck, None, Utc::now() - chrono::Duration::hours(2))
            .await
            .unwrap();

        let (sweeper, mut rx) = sweeper(store.clone());
        let reset = sweeper.sweep_stuck(Utc::now()).await.unwrap();
        assert_eq!(reset, vec![stuck]);
        assert_eq!(store.get_session(stuck).await.unwrap().analysis_status, AnalysisStatus::Pending);
        assert_eq!(store.get_session(fresh).await.unwrap().analysis_status, AnalysisStatus::Processing);
        assert_eq!(rx.recv().await.unwrap().session_id, stuck);

        // Second pass finds nothing
        assert!(sweeper.sweep_stuck(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_never_enqueued_completed_session_is_enqueued_once() {
        let store = Arc::new(InMemorySessionStore::new());
        let forgotten = seed_session(&store, "").await;
        let recent = seed_session(&store, "").await;
        for id in [forgotten, recent] {
            store.set_session_status(id, SessionStatus::Completed).await.unwrap();
        }
        store
            .set_timestamps(forgotten, Some(Utc::now() - chrono::Duration::hours(3)), Utc::now())
            .await
            .unwrap();

        let (sweeper, _rx) = sweeper(store.clone());
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.enqueued, vec![forgotten]);
        assert!(report.reset.is_empty());
        assert!(store.get_session(forgotten).await.unwrap().analysis_enqueued_at.is_some());

        assert!(sweeper.run_once().await.unwrap().enqueued.is_empty());
    }

    #[tokio::test]
    async fn test_completed_analysis_is_left_alone() {
        let store = Arc::new(InMemorySessionStore::new());
        let id = seed_session(&store, "").await;
        store.set_session_status(id, SessionStatus::Completed).await.unwrap();
        store
            .transition_analysis(id, &[AnalysisStatus::Pending], AnalysisStatus::Completed, None)
            .await
            .unwrap();
        store
            .set_timestamps(id, Some(Utc::now() - chrono::Duration::days(1)), Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();

        let (sweeper, _rx) = sweeper(store);
        assert_eq!(sweeper.run_once().await.unwrap(), SweepReport::default());
    }
}
