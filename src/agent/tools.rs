//! # Tool Dispatcher
//!
//! Answers the function calls the agent makes mid-conversation. Every
//! [`ToolCallRequest`] gets exactly one [`ToolCallResponse`] with the same
//! `id`, whatever happens during the lookup.
//!
//! ## Supported Tools:
//! - **retrieve_context**: `{ "query": "..." }` → job/candidate context from
//!   the backend context endpoint
//!
//! Anything else is answered with a "not implemented" message so the agent
//! can carry on instead of waiting forever.

use crate::agent::protocol::{FunctionDefinition, ToolCallRequest, ToolCallResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const RETRIEVE_CONTEXT: &str = "retrieve_context";

/// Content returned when the lookup fails or the arguments are unusable.
pub const CONTEXT_FALLBACK: &str =
    "Context is temporarily unavailable. Continue the interview using the information already discussed.";

/// Backend lookup behind `retrieve_context`.
#[async_trait]
pub trait ContextLookup: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ContextRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct ContextReply {
    context: String,
}

/// Calls `POST {context_url}` with `{query, session_id}` and reads `{context}`.
pub struct HttpContextLookup {
    client: reqwest::Client,
    endpoint: String,
    session_id: Option<Uuid>,
}

impl HttpContextLookup {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, session_id: Option<Uuid>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            session_id,
        }
    }
}

#[async_trait]
impl ContextLookup for HttpContextLookup {
    async fn lookup(&self, query: &str) -> Result<String> {
        let reply: ContextReply = self
            .client
            .post(&self.endpoint)
            .json(&ContextRequest {
                query,
                session_id: self.session_id,
            })
            .send()
            .await
            .context("context endpoint unreachable")?
            .error_for_status()
            .context("context endpoint returned an error status")?
            .json()
            .await
            .context("context endpoint returned an unexpected body")?;
        Ok(reply.context)
    }
}

pub struct ToolDispatcher {
    lookup: Arc<dyn ContextLookup>,
}

impl ToolDispatcher {
    pub fn new(lookup: Arc<dyn ContextLookup>) -> Self {
        Self { lookup }
    }

    /// Function definitions advertised in the agent settings message.
    pub fn definitions() -> Vec<FunctionDefinition> {
        vec![FunctionDefinition {
            name: RETRIEVE_CONTEXT.to_string(),
            description: "Look up details about the role, the interview template or the \
                          candidate's background that are relevant to the current question."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look up, in a few words"
                    }
                },
                "required": ["query"]
            }),
        }]
    }

    /// Produce the one response owed for `request`.
    pub async fn dispatch(&self, request: ToolCallRequest) -> ToolCallResponse {
        let content = match request.name.as_str() {
            RETRIEVE_CONTEXT => self.retrieve_context(&request).await,
            other => {
                warn!(tool = other, id = %request.id, "Agent called an unknown tool");
                format!("Function '{}' is not implemented.", other)
            }
        };

        ToolCallResponse {
            id: request.id,
            name: request.name,
            content,
        }
    }

    async fn retrieve_context(&self, request: &ToolCallRequest) -> String {
        let Some(query) = extract_query(&request.arguments) else {
            warn!(id = %request.id, "retrieve_context called without a usable query");
            return CONTEXT_FALLBACK.to_string();
        };

        match self.lookup.lookup(&query).await {
            Ok(context) => {
                debug!(id = %request.id, chars = context.len(), "Context retrieved");
                context
            }
            Err(err) => {
                warn!(id = %request.id, "Context lookup failed: {:#}", err);
                CONTEXT_FALLBACK.to_string()
            }
        }
    }
}

/// Pull `query` out of the arguments, which may be an object or a JSON string
/// encoding an object.
fn extract_query(arguments: &Value) -> Option<String> {
    let parsed;
    let object = match arguments {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw).ok()?;
            &parsed
        }
        other => other,
    };

    object
        .get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|query| !query.is_empty())
        .map(str::to_string)
}
