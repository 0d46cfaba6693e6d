//! # Transcript Analysis Job
//!
//! Scores one finished interview. The job is a small state machine over the
//! session's `analysis_status`:
//!
//! ```text
//! pending ──claim──▶ processing ──▶ completed
//!    ▲                   │
//!    │ (stuck sweep)     └────────▶ failed ──claim (retry)──▶ processing
//! ```
//!
//! ## Steps:
//! 0. **Guard**: `completed` sessions are left alone; the claim is a
//!    conditional update so a second concurrent run exits without effects
//! 1. **Transcript**: stored text, or rebuilt from the ordered log and persisted
//! 2. **Candidate lines**: enough lines attributed to the candidate
//! 3. **Length**: enough characters to grade
//! 4. **Criteria**: parent template first, session metadata second
//! 5. **Scoring**: external engine, result persisted verbatim
//!
//! Validation failures (1-3) are final. Anything else, including the
//! per-attempt timeout, is reported as [`AnalysisOutcome::TransientError`] so
//! the queue can retry it.

use crate::analysis::enrichment::ProfileEnricher;
use crate::analysis::model::{AnalysisStatus, InterviewSession, LogEntry};
use crate::analysis::scoring::{ScoringEngine, ScoringRequest};
use crate::analysis::store::{SessionStore, StoreError};
use crate::config::AnalysisConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shown to users while a retryable failure waits for its next attempt.
pub const RETRY_PENDING_REASON: &str = "Analysis hit a temporary problem and will be retried automatically.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyCompleted,
    /// Another worker holds the claim
    InProgressElsewhere,
    /// The claim was taken away (stuck sweep) before the result was written
    Superseded,
    NotFound,
}

/// Result of one attempt. Only `TransientError` is retried.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Completed(Value),
    Skipped(SkipReason),
    ValidationFailed(String),
    TransientError(String),
}

/// Thresholds the job validates against.
#[derive(Debug, Clone)]
pub struct AnalysisRules {
    pub min_candidate_lines: usize,
    pub min_transcript_chars: usize,
    pub candidate_labels: Vec<String>,
    pub attempt_timeout: Duration,
}

impl From<&AnalysisConfig> for AnalysisRules {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            min_candidate_lines: config.min_candidate_lines,
            min_transcript_chars: config.min_transcript_chars,
            candidate_labels: config
                .candidate_labels
                .iter()
                .map(|label| label.to_lowercase())
                .collect(),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }
}

enum StepError {
    Validation(String),
    Transient(anyhow::Error),
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        StepError::Transient(err.into())
    }
}

pub struct AnalysisJob {
    store: Arc<dyn SessionStore>,
    scoring: Arc<dyn ScoringEngine>,
    enricher: ProfileEnricher,
    rules: AnalysisRules,
}

impl AnalysisJob {
    pub fn new(store: Arc<dyn SessionStore>, scoring: Arc<dyn ScoringEngine>, rules: AnalysisRules) -> Self {
        let enricher = ProfileEnricher::new(store.clone(), rules.candidate_labels.clone());
        Self {
            store,
            scoring,
            enricher,
            rules,
        }
    }

    /// Run one attempt for `session_id`.
    pub async fn run(&self, session_id: Uuid) -> AnalysisOutcome {
        let session = match self.store.get_session(session_id).await {
            Ok(session) => session,
            Err(StoreError::SessionNotFound(_)) => {
                warn!(session_id = %session_id, "Analysis requested for unknown session");
                return AnalysisOutcome::Skipped(SkipReason::NotFound);
            }
            Err(err) => return AnalysisOutcome::TransientError(err.to_string()),
        };

        if session.analysis_status == AnalysisStatus::Completed {
            debug!(session_id = %session_id, "Analysis already completed");
            return AnalysisOutcome::Skipped(SkipReason::AlreadyCompleted);
        }

        match self
            .store
            .transition_analysis(
                session_id,
                &[AnalysisStatus::Pending, AnalysisStatus::Failed],
                AnalysisStatus::Processing,
                None,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(session_id = %session_id, "Analysis claimed by another worker");
                return AnalysisOutcome::Skipped(SkipReason::InProgressElsewhere);
            }
            Err(err) => return AnalysisOutcome::TransientError(err.to_string()),
        }
        info!(session_id = %session_id, "Analysis started");

        let attempt = tokio::time::timeout(self.rules.attempt_timeout, self.process(&session)).await;
        match attempt {
            Ok(Ok((result, transcript))) => self.complete(&session, result, &transcript).await,
            Ok(Err(StepError::Validation(reason))) => {
                info!(session_id = %session_id, reason = %reason, "Transcript rejected");
                self.record_failure(
                    session_id,
                    json!({"error": "validation_failed", "reason": reason, "retryable": false}),
                )
                .await;
                AnalysisOutcome::ValidationFailed(reason)
            }
            Ok(Err(StepError::Transient(err))) => self.transient(session_id, format!("{:#}", err)).await,
            Err(_) => {
                let message = format!(
                    "analysis attempt timed out after {}s",
                    self.rules.attempt_timeout.as_secs()
                );
                self.transient(session_id, message).await
            }
        }
    }

    async fn process(&self, session: &InterviewSession) -> Result<(Value, String), StepError> {
        let transcript = self.resolve_transcript(session).await?;
        if transcript.trim().is_empty() {
            return Err(StepError::Validation("no transcript available".to_string()));
        }

        let candidate_lines = count_candidate_lines(&transcript, &self.rules.candidate_labels);
        if candidate_lines < self.rules.min_candidate_lines {
            return Err(StepError::Validation(format!(
                "insufficient candidate responses: found {} candidate lines, at least {} required",
                candidate_lines, self.rules.min_candidate_lines
            )));
        }

        let length = transcript.chars().count();
        if length < self.rules.min_transcript_chars {
            return Err(StepError::Validation(format!(
                "transcript too short: {} characters, at least {} required",
                length, self.rules.min_transcript_chars
            )));
        }

        let request = self.scoring_request(session, transcript.clone()).await?;
        debug!(
            session_id = %session.id,
            interview_type = %request.interview_type,
            difficulty = %request.difficulty,
            "Calling scoring engine"
        );
        let result = self.scoring.score(request).await.map_err(StepError::Transient)?;
        Ok((result, transcript))
    }

    async fn resolve_transcript(&self, session: &InterviewSession) -> Result<String, StepError> {
        if !session.transcript.trim().is_empty() {
            return Ok(session.transcript.clone());
        }

        let rebuilt = reconstruct_transcript(&session.log);
        if !rebuilt.is_empty() {
            debug!(session_id = %session.id, entries = session.log.len(), "Transcript rebuilt from log");
            self.store.save_transcript(session.id, rebuilt.clone()).await?;
        }
        Ok(rebuilt)
    }

    async fn scoring_request(&self, session: &InterviewSession, transcript: String) -> Result<ScoringRequest, StepError> {
        let template = match session.template_id {
            Some(template_id) => match self.store.get_template(template_id).await {
                Ok(template) => Some(template),
                Err(StoreError::TemplateNotFound(_)) => {
                    warn!(session_id = %session.id, template_id = %template_id, "Parent template missing, using session metadata");
                    None
                }
                Err(err) => return Err(err.into()),
            },
            None => None,
        };

        let metadata = &session.metadata;
        let (interview_type, difficulty, job_description) = match template {
            Some(template) => (template.interview_type, template.difficulty, template.job_description),
            None => (
                metadata.interview_type.clone().unwrap_or_else(|| "general".to_string()),
                metadata.difficulty.clone().unwrap_or_else(|| "medium".to_string()),
                metadata.job_description.clone().unwrap_or_default(),
            ),
        };

        let mut resume = metadata.resume.clone().unwrap_or_default();
        if resume.is_empty() {
            if let Some(candidate_id) = session.candidate_id {
                match self.store.get_candidate(candidate_id).await {
                    Ok(candidate) => resume = candidate.resume_text.unwrap_or_default(),
                    Err(StoreError::CandidateNotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(ScoringRequest {
            transcript,
            job_description,
            resume,
            interview_type,
            difficulty,
        })
    }

    async fn complete(&self, session: &InterviewSession, result: Value, transcript: &str) -> AnalysisOutcome {
        match self
            .store
            .transition_analysis(
                session.id,
                &[AnalysisStatus::Processing],
                AnalysisStatus::Completed,
                Some(result.clone()),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(session_id = %session.id, "Claim lost before the result could be stored");
                return AnalysisOutcome::Skipped(SkipReason::Superseded);
            }
            Err(err) => return AnalysisOutcome::TransientError(err.to_string()),
        }
        info!(session_id = %session.id, "Analysis completed");

        if let Err(err) = self.enricher.enrich(session.candidate_id, transcript).await {
            warn!(session_id = %session.id, "Profile enrichment failed: {:#}", err);
        }
        AnalysisOutcome::Completed(result)
    }

    async fn transient(&self, session_id: Uuid, message: String) -> AnalysisOutcome {
        warn!(session_id = %session_id, "Analysis attempt failed: {}", message);
        self.record_failure(
            session_id,
            json!({"error": message, "reason": RETRY_PENDING_REASON, "retryable": true}),
        )
        .await;
        AnalysisOutcome::TransientError(message)
    }

    async fn record_failure(&self, session_id: Uuid, result: Value) {
        if let Err(err) = self
            .store
            .transition_analysis(
                session_id,
                &[AnalysisStatus::Processing],
                AnalysisStatus::Failed,
                Some(result),
            )
            .await
        {
            warn!(session_id = %session_id, "Could not record analysis failure: {}", err);
        }
    }
}

/// Rebuild a transcript from log entries as `"{speaker}: {message}"` lines, in log order.
pub fn reconstruct_transcript(log: &[LogEntry]) -> String {
    let mut entries: Vec<&LogEntry> = log.iter().filter(|entry| !entry.message.trim().is_empty()).collect();
    entries.sort_by_key(|entry| entry.order);
    entries
        .iter()
        .map(|entry| format!("{}: {}", entry.speaker, entry.message.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Count lines starting (case-insensitively) with one of the lower-cased `labels`.
pub fn count_candidate_lines(transcript: &str, labels: &[String]) -> usize {
    transcript
        .lines()
        .map(|line| line.trim_start().to_lowercase())
        .filter(|line| labels.iter().any(|label| line.starts_with(label.as_str())))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::model::{CandidateProfile, InterviewTemplate, SessionMetadata};
    use crate::analysis::store::InMemorySessionStore;
    use crate::config::AppConfig;
    use crate::testing::{seed_session, sufficient_transcript, ScriptedScoring};

    fn job(store: Arc<InMemorySessionStore>, scoring: Arc<ScriptedScoring>) -> AnalysisJob {
        AnalysisJob::new(store, scoring, AnalysisRules::from(&AppConfig::default().analysis))
    }

    #[test]
    fn test_candidate_lines_match_labels_case_insensitively() {
        let labels = AnalysisRules::from(&AppConfig::default().analysis).candidate_labels;
        let transcript = "Interviewer: hi\nCANDIDATE: hello\n  user: me\nInterviewee: yes\ncandidates are great";
        assert_eq!(count_candidate_lines(transcript, &labels), 3);
    }

    #[test]
    fn test_reconstruct_orders_entries() {
        let log = vec![
            LogEntry::from_role("user", "second", 1),
            LogEntry::from_role("assistant", "first", 0),
            LogEntry::from_role("user", "   ", 2),
        ];
        assert_eq!(reconstruct_transcript(&log), "interviewer: first\ncandidate: second");
    }

    #[tokio::test]
    async fn test_sufficient_transcript_is_scored() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::succeeding(json!({"overall": 7.5})));
        let id = seed_session(&store, &sufficient_transcript()).await;

        let outcome = job(store.clone(), scoring.clone()).run(id).await;
        assert_eq!(outcome, AnalysisOutcome::Completed(json!({"overall": 7.5})));

        let session = store.get_session(id).await.unwrap();
        assert_eq!(session.analysis_status, AnalysisStatus::Completed);
        assert_eq!(session.analysis_result, Some(json!({"overall": 7.5})));
        assert_eq!(scoring.calls(), 1);
    }

    #[tokio::test]
    async fn test_enrichment_failure_keeps_analysis_completed() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::succeeding(json!({"overall": 6.0})));
        let mut session = InterviewSession::new(None, Some(Uuid::new_v4()), SessionMetadata::default());
        session.transcript = sufficient_transcript();
        let id = session.id;
        store.insert_session(session).await.unwrap();

        let outcome = job(store.clone(), scoring.clone()).run(id).await;
        assert_eq!(outcome, AnalysisOutcome::Completed(json!({"overall": 6.0})));

        let session = store.get_session(id).await.unwrap();
        assert_eq!(session.analysis_status, AnalysisStatus::Completed);
        assert_eq!(session.analysis_result, Some(json!({"overall": 6.0})));
        assert_eq!(scoring.calls(), 1);
    }

    #[tokio::test]
    async fn test_few_candidate_lines_fail_without_scoring() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::succeeding(json!({})));
        let transcript = format!(
            "interviewer: {}\ncandidate: I worked on payments.\ncandidate: Mostly Rust.",
            "Tell me about the systems you have built. ".repeat(20)
        );
        let id = seed_session(&store, &transcript).await;

        let outcome = job(store.clone(), scoring.clone()).run(id).await;
        assert!(matches!(outcome, AnalysisOutcome::ValidationFailed(ref reason) if reason.contains("found 2")));

        let session = store.get_session(id).await.unwrap();
        assert_eq!(session.analysis_status, AnalysisStatus::Failed);
        let result = session.analysis_result.unwrap();
        assert_eq!(result["error"], "validation_failed");
        assert_eq!(result["retryable"], false);
        assert_eq!(scoring.calls(), 0);
    }

    #[tokio::test]
    async fn test_short_transcript_fails_without_scoring() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::succeeding(json!({})));
        let id = seed_session(&store, "candidate: yes\ncandidate: no\ncandidate: maybe").await;

        let outcome = job(store.clone(), scoring.clone()).run(id).await;
        assert!(matches!(outcome, AnalysisOutcome::ValidationFailed(ref reason) if reason.contains("too short")));
        assert_eq!(scoring.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_session_has_no_transcript() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::succeeding(json!({})));
        let id = seed_session(&store, "").await;

        let outcome = job(store.clone(), scoring.clone()).run(id).await;
        assert_eq!(outcome, AnalysisOutcome::ValidationFailed("no transcript available".to_string()));
        let session = store.get_session(id).await.unwrap();
        assert_eq!(session.analysis_result.unwrap()["reason"], "no transcript available");
    }

    #[tokio::test]
    async fn test_completed_session_is_not_rescored() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::succeeding(json!({"overall": 9})));
        let id = seed_session(&store, &sufficient_transcript()).await;
        let job = job(store.clone(), scoring.clone());

        job.run(id).await;
        let outcome = job.run(id).await;
        assert_eq!(outcome, AnalysisOutcome::Skipped(SkipReason::AlreadyCompleted));
        assert_eq!(scoring.calls(), 1);
        assert_eq!(
            store.get_session(id).await.unwrap().analysis_result,
            Some(json!({"overall": 9}))
        );
    }

    #[tokio::test]
    async fn test_claimed_session_is_skipped() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::succeeding(json!({})));
        let id = seed_session(&store, &sufficient_transcript()).await;
        store
            .transition_analysis(id, &[AnalysisStatus::Pending], AnalysisStatus::Processing, None)
            .await
            .unwrap();

        let outcome = job(store.clone(), scoring.clone()).run(id).await;
        assert_eq!(outcome, AnalysisOutcome::Skipped(SkipReason::InProgressElsewhere));
        assert_eq!(scoring.calls(), 0);
    }

    #[tokio::test]
    async fn test_transcript_rebuilt_from_log() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::succeeding(json!({"overall": 6})));
        let id = seed_session(&store, "").await;

        let answer = "I led the migration of our billing service to an event driven design, \
                      which cut reconciliation time from hours to minutes.";
        let question = "Walk me through a project you are proud of and the trade-offs you made along the way. Be specific.";
        let log = vec![
            LogEntry { speaker: "candidate".to_string(), message: answer.to_string(), order: 0 },
            LogEntry { speaker: "interviewer".to_string(), message: question.to_string(), order: 1 },
            LogEntry { speaker: "candidate".to_string(), message: answer.to_string(), order: 2 },
            LogEntry { speaker: "interviewer".to_string(), message: question.to_string(), order: 3 },
            LogEntry { speaker: "candidate".to_string(), message: answer.to_string(), order: 4 },
        ];
        store.append_log_entries(id, log).await.unwrap();

        let outcome = job(store.clone(), scoring.clone()).run(id).await;
        assert_eq!(outcome, AnalysisOutcome::Completed(json!({"overall": 6})));

        let session = store.get_session(id).await.unwrap();
        assert!(session.transcript.starts_with("candidate: I led"));
        assert_eq!(session.transcript.lines().count(), 5);
        assert!(session.transcript.len() >= 600);
        assert_eq!(scoring.requests()[0].transcript, session.transcript);
    }

    #[tokio::test]
    async fn test_template_criteria_win_over_metadata() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::succeeding(json!({})));
        let template = InterviewTemplate {
            id: Uuid::new_v4(),
            interview_type: "system_design".to_string(),
            difficulty: "hard".to_string(),
            job_description: "Staff engineer".to_string(),
            description: String::new(),
        };
        store.insert_template(template.clone()).await.unwrap();
        let candidate = CandidateProfile {
            resume_text: Some("Ten years of Rust".to_string()),
            ..CandidateProfile::new("Ada")
        };
        store.insert_candidate(candidate.clone()).await.unwrap();

        let mut session = InterviewSession::new(
            Some(template.id),
            Some(candidate.id),
            SessionMetadata {
                interview_type: Some("behavioral".to_string()),
                difficulty: Some("easy".to_string()),
                ..Default::default()
            },
        );
        session.transcript = sufficient_transcript();
        let id = session.id;
        store.insert_session(session).await.unwrap();

        job(store.clone(), scoring.clone()).run(id).await;
        let request = &scoring.requests()[0];
        assert_eq!(request.interview_type, "system_design");
        assert_eq!(request.difficulty, "hard");
        assert_eq!(request.job_description, "Staff engineer");
        assert_eq!(request.resume, "Ten years of Rust");
    }

    #[tokio::test]
    async fn test_metadata_used_without_template() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::succeeding(json!({})));
        let mut session = InterviewSession::new(
            None,
            None,
            SessionMetadata {
                interview_type: Some("behavioral".to_string()),
                difficulty: Some("easy".to_string()),
                job_description: Some("Support engineer".to_string()),
                resume: Some("CV".to_string()),
            },
        );
        session.transcript = sufficient_transcript();
        let id = session.id;
        store.insert_session(session).await.unwrap();

        job(store.clone(), scoring.clone()).run(id).await;
        let request = &scoring.requests()[0];
        assert_eq!(request.interview_type, "behavioral");
        assert_eq!(request.difficulty, "easy");
        assert_eq!(request.resume, "CV");
    }

    #[tokio::test]
    async fn test_scoring_error_is_transient_and_recorded() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::always_failing("engine overloaded"));
        let id = seed_session(&store, &sufficient_transcript()).await;

        let outcome = job(store.clone(), scoring.clone()).run(id).await;
        assert!(matches!(outcome, AnalysisOutcome::TransientError(ref msg) if msg.contains("engine overloaded")));

        let session = store.get_session(id).await.unwrap();
        assert_eq!(session.analysis_status, AnalysisStatus::Failed);
        let result = session.analysis_result.unwrap();
        assert_eq!(result["retryable"], true);
        assert_eq!(result["reason"], RETRY_PENDING_REASON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::hanging());
        let id = seed_session(&store, &sufficient_transcript()).await;

        let outcome = job(store.clone(), scoring).run(id).await;
        assert!(matches!(outcome, AnalysisOutcome::TransientError(ref msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_unknown_session_is_skipped() {
        let store = Arc::new(InMemorySessionStore::new());
        let scoring = Arc::new(ScriptedScoring::succeeding(json!({})));
        let outcome = job(store, scoring).run(Uuid::new_v4()).await;
        assert_eq!(outcome, AnalysisOutcome::Skipped(SkipReason::NotFound));
    }
}
