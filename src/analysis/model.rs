//! # Interview Records
//!
//! Persisted shapes owned by the backend: sessions, their templates and the
//! candidates they belong to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of the interview itself (not of its analysis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

/// Lifecycle of the transcript analysis.
///
/// `Completed` is absorbing: the store refuses every transition out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }
}

/// One utterance recorded during the interview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub speaker: String,
    pub message: String,
    pub order: u32,
}

impl LogEntry {
    /// Map an agent-side role onto the speaker labels the analysis expects.
    ///
    /// ## Mapping:
    /// - `user` → `candidate`
    /// - `assistant` / `agent` → `interviewer`
    /// - anything else is kept as sent
    pub fn from_role(role: &str, message: impl Into<String>, order: u32) -> Self {
        let speaker = match role.to_ascii_lowercase().as_str() {
            "user" => "candidate".to_string(),
            "assistant" | "agent" => "interviewer".to_string(),
            other => other.to_string(),
        };
        Self {
            speaker,
            message: message.into(),
            order,
        }
    }
}

/// Criteria embedded in the session when it has no parent template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub interview_type: Option<String>,
    pub difficulty: Option<String>,
    pub job_description: Option<String>,
    pub resume: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewSession {
    pub id: Uuid,
    pub status: SessionStatus,
    /// Full transcript text; empty until supplied or reconstructed
    pub transcript: String,
    pub log: Vec<LogEntry>,
    pub analysis_status: AnalysisStatus,
    /// Scoring result on success, `{error, reason, ...}` on failure
    pub analysis_result: Option<Value>,
    pub template_id: Option<Uuid>,
    pub candidate_id: Option<Uuid>,
    pub metadata: SessionMetadata,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub analysis_updated_at: DateTime<Utc>,
    pub analysis_enqueued_at: Option<DateTime<Utc>>,
}

impl InterviewSession {
    pub fn new(template_id: Option<Uuid>, candidate_id: Option<Uuid>, metadata: SessionMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: SessionStatus::Pending,
            transcript: String::new(),
            log: Vec::new(),
            analysis_status: AnalysisStatus::Pending,
            analysis_result: None,
            template_id,
            candidate_id,
            metadata,
            created_at: now,
            ended_at: None,
            analysis_updated_at: now,
            analysis_enqueued_at: None,
        }
    }
}

/// The "parent" interview definition a session was started from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewTemplate {
    pub id: Uuid,
    pub interview_type: String,
    pub difficulty: String,
    pub job_description: String,
    /// Free-form notes about the role, also searched by the context endpoint
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub years_experience: Option<u32>,
    pub current_role: Option<String>,
    pub skills: Vec<String>,
    pub resume_text: Option<String>,
}

impl CandidateProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_map_to_speakers() {
        assert_eq!(LogEntry::from_role("user", "hi", 0).speaker, "candidate");
        assert_eq!(LogEntry::from_role("Assistant", "hi", 1).speaker, "interviewer");
        assert_eq!(LogEntry::from_role("observer", "hi", 2).speaker, "observer");
    }

    #[test]
    fn test_new_session_defaults() {
        let session = InterviewSession::new(None, None, SessionMetadata::default());
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.analysis_status, AnalysisStatus::Pending);
        assert!(session.analysis_enqueued_at.is_none());
        assert_eq!(serde_json::to_value(session.analysis_status).unwrap(), "pending");
    }
}
