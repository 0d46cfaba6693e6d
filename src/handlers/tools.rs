//! Backend side of the agent's `retrieve_context` tool.

use crate::analysis::store::StoreError;
use crate::context::ContextIndex;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

const MAX_PASSAGES: usize = 3;

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    pub query: String,
    pub session_id: Option<Uuid>,
}

/// Collect every document tied to the session: template, metadata and candidate resume.
async fn index_for(state: &AppState, session_id: Uuid) -> Result<ContextIndex, AppError> {
    let session = state.store.get_session(session_id).await?;
    let mut index = ContextIndex::new();

    if let Some(template_id) = session.template_id {
        match state.store.get_template(template_id).await {
            Ok(template) => {
                index.add_document("job description", &template.job_description);
                index.add_document("role notes", &template.description);
            }
            Err(StoreError::TemplateNotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }
    if let Some(job_description) = &session.metadata.job_description {
        index.add_document("job description", job_description);
    }
    if let Some(resume) = &session.metadata.resume {
        index.add_document("resume", resume);
    }
    if let Some(candidate_id) = session.candidate_id {
        match state.store.get_candidate(candidate_id).await {
            Ok(candidate) => {
                if let Some(resume) = &candidate.resume_text {
                    index.add_document("resume", resume);
                }
            }
            Err(StoreError::CandidateNotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(index)
}

pub async fn retrieve_context(
    state: web::Data<AppState>,
    body: web::Json<ContextRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.query.trim().is_empty() {
        return Err(AppError::BadRequest("query must not be empty".to_string()));
    }

    let index = match body.session_id {
        Some(session_id) => index_for(&state, session_id).await?,
        None => ContextIndex::new(),
    };
    let context = index.answer(&body.query, MAX_PASSAGES);
    debug!(session_id = ?body.session_id, query = %body.query, "Context retrieved");

    Ok(HttpResponse::Ok().json(json!({ "context": context })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::model::{CandidateProfile, InterviewSession, SessionMetadata};
    use crate::config::AppConfig;
    use crate::context::NO_CONTEXT;
    use crate::state::test_state;
    use actix_web::{test, App};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_context_comes_from_session_documents() {
        let (state, _rx) = test_state(AppConfig::default());
        let mut candidate = CandidateProfile::new("Dana");
        candidate.resume_text = Some("Led the migration of a billing system from Java to Rust.".to_string());
        let candidate_id = candidate.id;
        state.store.insert_candidate(candidate).await.unwrap();

        let metadata = SessionMetadata {
            job_description: Some("Senior engineer for the billing platform team.".to_string()),
            ..Default::default()
        };
        let session = InterviewSession::new(None, Some(candidate_id), metadata);
        let session_id = session.id;
        state.store.insert_session(session).await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/tools/context", web::post().to(retrieve_context)),
        )
        .await;

        let body: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/tools/context")
                .set_json(json!({"query": "billing migration to Rust", "session_id": session_id}))
                .to_request(),
        )
        .await;
        let context = body["context"].as_str().unwrap();
        assert!(context.starts_with("[resume] Led the migration"));
        assert!(context.contains("[job description]"));

        let none: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/tools/context")
                .set_json(json!({"query": "billing"}))
                .to_request(),
        )
        .await;
        assert_eq!(none["context"], NO_CONTEXT);
    }

    #[actix_web::test]
    async fn test_empty_query_is_rejected() {
        let (state, _rx) = test_state(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/tools/context", web::post().to(retrieve_context)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/tools/context")
            .set_json(json!({"query": "  "}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }
}
