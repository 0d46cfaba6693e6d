//! # Session Endpoints
//!
//! Thin request/response layer over the session store and the analysis queue.
//!
//! ## Routes:
//! - `POST /api/v1/templates`, `POST /api/v1/candidates`, `GET /api/v1/candidates/{id}`
//! - `POST /api/v1/sessions`, `GET /api/v1/sessions/{id}`
//! - `POST /api/v1/sessions/{id}/complete`: store an externally captured transcript and enqueue analysis
//! - `GET /api/v1/sessions/{id}/analysis`: user-facing analysis view
//! - `POST /api/v1/analysis/recover`: run both recovery sweeps now

use crate::analysis::model::{
    AnalysisStatus, CandidateProfile, InterviewSession, InterviewTemplate, LogEntry, SessionMetadata, SessionStatus,
};
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub interview_type: String,
    pub difficulty: String,
    pub job_description: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCandidateRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub resume_text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub template_id: Option<Uuid>,
    pub candidate_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

/// Log line as sent by clients; `role` is accepted in place of `speaker`.
#[derive(Debug, Deserialize)]
pub struct LogLine {
    #[serde(alias = "role")]
    pub speaker: String,
    pub message: String,
    pub order: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteSessionRequest {
    pub transcript: Option<String>,
    #[serde(default)]
    pub log: Vec<LogLine>,
}

/// What users see of an analysis; diagnostics stay in the stored record.
#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisView {
    InProgress,
    Failed { reason: String },
    Completed { result: Value },
}

impl AnalysisView {
    pub fn of(session: &InterviewSession) -> Self {
        let result = session.analysis_result.as_ref();
        match session.analysis_status {
            AnalysisStatus::Completed => AnalysisView::Completed {
                result: result.cloned().unwrap_or(Value::Null),
            },
            AnalysisStatus::Failed => {
                let retryable = result
                    .and_then(|r| r.get("retryable"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if retryable {
                    return AnalysisView::InProgress;
                }
                let reason = result
                    .and_then(|r| r.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or("Analysis failed.")
                    .to_string();
                AnalysisView::Failed { reason }
            }
            AnalysisStatus::Pending | AnalysisStatus::Processing => AnalysisView::InProgress,
        }
    }
}

pub async fn create_template(
    state: web::Data<AppState>,
    body: web::Json<CreateTemplateRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.job_description.trim().is_empty() {
        return Err(AppError::ValidationError("job_description is required".to_string()));
    }
    let template = InterviewTemplate {
        id: Uuid::new_v4(),
        interview_type: body.interview_type,
        difficulty: body.difficulty,
        job_description: body.job_description,
        description: body.description,
    };
    state.store.insert_template(template.clone()).await?;
    Ok(HttpResponse::Created().json(template))
}

pub async fn create_candidate(
    state: web::Data<AppState>,
    body: web::Json<CreateCandidateRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.name.trim().is_empty() {
        return Err(AppError::ValidationError("name is required".to_string()));
    }
    let candidate = CandidateProfile {
        email: body.email,
        phone: body.phone,
        resume_text: body.resume_text,
        ..CandidateProfile::new(body.name)
    };
    state.store.insert_candidate(candidate.clone()).await?;
    Ok(HttpResponse::Created().json(candidate))
}

pub async fn get_candidate(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse, AppError> {
    let candidate = state.store.get_candidate(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(candidate))
}

pub async fn create_session(
    state: web::Data<AppState>,
    body: web::Json<CreateSessionRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if let Some(template_id) = body.template_id {
        state.store.get_template(template_id).await?;
    }
    if let Some(candidate_id) = body.candidate_id {
        state.store.get_candidate(candidate_id).await?;
    }

    let session = InterviewSession::new(body.template_id, body.candidate_id, body.metadata);
    state.store.insert_session(session.clone()).await?;
    info!(session_id = %session.id, "Interview session created");
    Ok(HttpResponse::Created().json(session))
}

pub async fn get_session(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse, AppError> {
    let session = state.store.get_session(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

pub async fn complete_session(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: Option<web::Json<CompleteSessionRequest>>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let body = body.map(web::Json::into_inner).unwrap_or_default();

    let session = state.store.get_session(session_id).await?;
    match session.status {
        SessionStatus::Completed => {
            return Err(AppError::Conflict(format!("session {} is already completed", session_id)))
        }
        SessionStatus::Cancelled => return Err(AppError::Conflict(format!("session {} was cancelled", session_id))),
        SessionStatus::Pending | SessionStatus::Active => {}
    }

    if let Some(transcript) = body.transcript.filter(|t| !t.trim().is_empty()) {
        state.store.save_transcript(session_id, transcript).await?;
    }
    if !body.log.is_empty() {
        let entries = body
            .log
            .into_iter()
            .map(|line| LogEntry::from_role(&line.speaker, line.message, line.order))
            .collect();
        state.store.append_log_entries(session_id, entries).await?;
    }

    state.queue.complete_session(session_id).await?;
    info!(session_id = %session_id, "Session completed, analysis enqueued");

    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "session_id": session_id,
        "analysis": AnalysisView::InProgress
    })))
}

pub async fn get_analysis(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse, AppError> {
    let session = state.store.get_session(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(AnalysisView::of(&session)))
}

pub async fn recover_analyses(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let report = state.sweeper.run_once().await?;
    Ok(HttpResponse::Ok().json(report))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/templates", web::post().to(create_template))
        .route("/candidates", web::post().to(create_candidate))
        .route("/candidates/{id}", web::get().to(get_candidate))
        .route("/sessions", web::post().to(create_session))
        .route("/sessions/{id}", web::get().to(get_session))
        .route("/sessions/{id}/complete", web::post().to(complete_session))
        .route("/sessions/{id}/analysis", web::get().to(get_analysis))
        .route("/analysis/recover", web::post().to(recover_analyses));
}
