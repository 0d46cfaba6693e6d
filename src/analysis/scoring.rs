//! # Scoring Engine Client
//!
//! The analysis job hands a validated transcript to an external scoring
//! engine and stores whatever JSON comes back, untouched.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Inputs the engine grades against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringRequest {
    pub transcript: String,
    pub job_description: String,
    pub resume: String,
    pub interview_type: String,
    pub difficulty: String,
}

#[async_trait]
pub trait ScoringEngine: Send + Sync {
    async fn score(&self, request: ScoringRequest) -> Result<Value>;
}

/// POSTs the request as JSON to the configured scoring endpoint.
pub struct HttpScoringEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpScoringEngine {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ScoringEngine for HttpScoringEngine {
    async fn score(&self, request: ScoringRequest) -> Result<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .context("scoring engine unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("scoring engine returned {}: {}", status, body.trim());
        }

        response
            .json::<Value>()
            .await
            .context("scoring engine returned invalid JSON")
    }
}
