//! # Session Store
//!
//! Persistence seam for sessions, templates and candidates.
//!
//! ## Concurrency Control:
//! Analysis status is only ever changed through
//! [`SessionStore::transition_analysis`], a conditional update that succeeds
//! only when the current status is one of the expected priors. Two workers
//! racing on the same session therefore cannot both claim it, and nothing
//! can move a session out of `completed`.
//!
//! [`InMemorySessionStore`] keeps everything behind `tokio::sync::RwLock`
//! maps; a database-backed store implements the same trait.

use crate::analysis::model::{
    AnalysisStatus, CandidateProfile, InterviewSession, InterviewTemplate, LogEntry, SessionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("candidate {0} not found")]
    CandidateNotFound(Uuid),
    #[error("template {0} not found")]
    TemplateNotFound(Uuid),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: InterviewSession) -> StoreResult<()>;
    async fn get_session(&self, id: Uuid) -> StoreResult<InterviewSession>;
    async fn list_sessions(&self) -> StoreResult<Vec<InterviewSession>>;

    /// Append utterances to the session log, keeping it ordered.
    async fn append_log_entries(&self, id: Uuid, entries: Vec<LogEntry>) -> StoreResult<()>;
    async fn save_transcript(&self, id: Uuid, transcript: String) -> StoreResult<()>;

    /// Set the interview lifecycle status; `Completed`/`Cancelled` stamp `ended_at`.
    async fn set_session_status(&self, id: Uuid, status: SessionStatus) -> StoreResult<()>;
    async fn mark_analysis_enqueued(&self, id: Uuid) -> StoreResult<()>;

    /// Conditionally move `analysis_status` to `next`.
    ///
    /// ## Returns:
    /// - `Ok(true)` if the current status was in `expected` and the write happened
    /// - `Ok(false)` if another writer got there first (or the session is completed)
    async fn transition_analysis(
        &self,
        id: Uuid,
        expected: &[AnalysisStatus],
        next: AnalysisStatus,
        result: Option<Value>,
    ) -> StoreResult<bool>;

    async fn insert_template(&self, template: InterviewTemplate) -> StoreResult<()>;
    async fn get_template(&self, id: Uuid) -> StoreResult<InterviewTemplate>;

    async fn insert_candidate(&self, candidate: CandidateProfile) -> StoreResult<()>;
    async fn get_candidate(&self, id: Uuid) -> StoreResult<CandidateProfile>;
    async fn update_candidate(&self, candidate: CandidateProfile) -> StoreResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, InterviewSession>>,
    templates: RwLock<HashMap<Uuid, InterviewTemplate>>,
    candidates: RwLock<HashMap<Uuid, CandidateProfile>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdate the analysis/end timestamps of a session (recovery tests, data imports).
    pub async fn set_timestamps(
        &self,
        id: Uuid,
        ended_at: Option<DateTime<Utc>>,
        analysis_updated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(StoreError::SessionNotFound(id))?;
        session.ended_at = ended_at;
        session.analysis_updated_at = analysis_updated_at;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert_session(&self, session: InterviewSession) -> StoreResult<()> {
        self.sessions.write().await.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<InterviewSession> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::SessionNotFound(id))
    }

    async fn list_sessions(&self) -> StoreResult<Vec<InterviewSession>> {
        Ok(self.sessions.read().await.values().cloned().collect())
    }

    async fn append_log_entries(&self, id: Uuid, entries: Vec<LogEntry>) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(StoreError::SessionNotFound(id))?;
        session.log.extend(entries);
        session.log.sort_by_key(|entry| entry.order);
        Ok(())
    }

    async fn save_transcript(&self, id: Uuid, transcript: String) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(StoreError::SessionNotFound(id))?;
        session.transcript = transcript;
        Ok(())
    }

    async fn set_session_status(&self, id: Uuid, status: SessionStatus) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(StoreError::SessionNotFound(id))?;
        session.status = status;
        if matches!(status, SessionStatus::Completed | SessionStatus::Cancelled) && session.ended_at.is_none() {
            session.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_analysis_enqueued(&self, id: Uuid) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(StoreError::SessionNotFound(id))?;
        session.analysis_enqueued_at = Some(Utc::now());
        Ok(())
    }

    async fn transition_analysis(
        &self,
        id: Uuid,
        expected: &[AnalysisStatus],
        next: AnalysisStatus,
        result: Option<Value>,
    ) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(StoreError::SessionNotFound(id))?;

        if session.analysis_status == AnalysisStatus::Completed || !expected.contains(&session.analysis_status) {
            return Ok(false);
        }

        session.analysis_status = next;
        session.analysis_updated_at = Utc::now();
        if let Some(result) = result {
            session.analysis_result = Some(result);
        }
        Ok(true)
    }

    async fn insert_template(&self, template: InterviewTemplate) -> StoreResult<()> {
        self.templates.write().await.insert(template.id, template);
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> StoreResult<InterviewTemplate> {
        self.templates
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::TemplateNotFound(id))
    }

    async fn insert_candidate(&self, candidate: CandidateProfile) -> StoreResult<()> {
        self.candidates.write().await.insert(candidate.id, candidate);
        Ok(())
    }

    async fn get_candidate(&self, id: Uuid) -> StoreResult<CandidateProfile> {
        self.candidates
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::CandidateNotFound(id))
    }

    async fn update_candidate(&self, candidate: CandidateProfile) -> StoreResult<()> {
        let mut candidates = self.candidates.write().await;
        if !candidates.contains_key(&candidate.id) {
            return Err(StoreError::CandidateNotFound(candidate.id));
        }
        candidates.insert(candidate.id, candidate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::model::SessionMetadata;
    use serde_json::json;

    async fn store_with_session() -> (InMemorySessionStore, Uuid) {
        let store = InMemorySessionStore::new();
        let session = InterviewSession::new(None, None, SessionMetadata::default());
        let id = session.id;
        store.insert_session(session).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_claim_succeeds_once() {
        let (store, id) = store_with_session().await;
        let claim = [AnalysisStatus::Pending, AnalysisStatus::Failed];

        assert!(store.transition_analysis(id, &claim, AnalysisStatus::Processing, None).await.unwrap());
        assert!(!store.transition_analysis(id, &claim, AnalysisStatus::Processing, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_completed_is_absorbing() {
        let (store, id) = store_with_session().await;
        store
            .transition_analysis(id, &[AnalysisStatus::Pending], AnalysisStatus::Completed, Some(json!({"score": 8})))
            .await
            .unwrap();

        let everything = [
            AnalysisStatus::Pending,
            AnalysisStatus::Processing,
            AnalysisStatus::Completed,
            AnalysisStatus::Failed,
        ];
        for next in everything {
            assert!(!store.transition_analysis(id, &everything, next, None).await.unwrap());
        }
        let session = store.get_session(id).await.unwrap();
        assert_eq!(session.analysis_status, AnalysisStatus::Completed);
        assert_eq!(session.analysis_result, Some(json!({"score": 8})));
    }

    #[tokio::test]
    async fn test_log_entries_stay_ordered() {
        let (store, id) = store_with_session().await;
        store
            .append_log_entries(id, vec![LogEntry::from_role("user", "b", 1), LogEntry::from_role("assistant", "a", 0)])
            .await
            .unwrap();
        let session = store.get_session(id).await.unwrap();
        assert_eq!(session.log[0].message, "a");
        assert_eq!(session.log[1].message, "b");
    }

    #[tokio::test]
    async fn test_completion_stamps_end_time() {
        let (store, id) = store_with_session().await;
        store.set_session_status(id, SessionStatus::Completed).await.unwrap();
        assert!(store.get_session(id).await.unwrap().ended_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_records() {
        let store = InMemorySessionStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.get_session(id).await.unwrap_err(), StoreError::SessionNotFound(id));
        assert_eq!(
            store.update_candidate(CandidateProfile { id, ..Default::default() }).await,
            Err(StoreError::CandidateNotFound(id))
        );
    }
}
