//! # Configuration Management
//!
//! Loads the service configuration from multiple sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables with the `APP_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms set these)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_ANALYSIS__MAX_ATTEMPTS`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! Nested keys use a double underscore so that field names which contain an
//! underscore (`max_attempts`) survive the mapping.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration.
///
/// ## Sections:
/// - **server**: HTTP bind address
/// - **agent**: remote conversational agent endpoint and behavior
/// - **audio**: capture/playback formats
/// - **backend**: collaborator endpoints (context lookup, scoring engine)
/// - **analysis**: transcript analysis job and its retry policy
/// - **recovery**: stuck-job and never-enqueued sweeps
/// - **performance**: capacity limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub audio: AudioConfig,
    pub backend: BackendConfig,
    pub analysis: AnalysisConfig,
    pub recovery: RecoveryConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote agent connection and the behavior parameters sent in the settings message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// WebSocket URL of the agent (ws:// or wss://)
    pub url: String,
    /// Bearer token; usually supplied through `APP_AGENT__API_KEY`
    pub api_key: Option<String>,
    pub language: String,
    pub greeting: String,
    pub listen_provider: String,
    pub listen_model: String,
    pub think_provider: String,
    pub think_model: String,
    pub system_prompt: String,
    pub speak_provider: String,
    pub speak_voice: String,
    /// Interval between keep-alive messages while the channel is idle (seconds)
    pub keepalive_secs: u64,
}

/// Audio formats for both directions of the agent channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Microphone → agent sample rate (Hz)
    pub capture_sample_rate: u32,
    /// Agent → speaker sample rate (Hz)
    pub playback_sample_rate: u32,
    /// Samples per outbound frame (4096 @ 16kHz ≈ 256ms)
    pub capture_frame_size: usize,
}

/// Endpoints of the collaborators the pipeline calls over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Context lookup used by the `retrieve_context` tool
    pub context_url: String,
    /// External scoring engine
    pub scoring_url: String,
    pub request_timeout_secs: u64,
}

/// Transcript analysis job settings.
///
/// ## Retry policy:
/// `max_attempts` attempts in total, waiting `retry_delays_secs[n-1]` after
/// failed attempt `n`; the job is abandoned early once more than
/// `max_exceptions` exceptions have accumulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delays_secs: Vec<u64>,
    pub max_exceptions: u32,
    pub attempt_timeout_secs: u64,
    pub min_candidate_lines: usize,
    pub min_transcript_chars: usize,
    /// Line prefixes (case-insensitive) attributed to the candidate
    pub candidate_labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// A job still `processing` after this long is considered stuck
    pub stuck_after_secs: u64,
    /// A completed session whose analysis was never enqueued after this long gets enqueued
    pub unenqueued_after_secs: u64,
    /// Run both sweeps periodically; 0 disables the timer
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            agent: AgentConfig {
                url: "wss://agent.example.com/v1/agent/converse".to_string(),
                api_key: None,
                language: "en".to_string(),
                greeting: "Hello! Thanks for joining. Shall we begin the interview?".to_string(),
                listen_provider: "deepgram".to_string(),
                listen_model: "nova-3".to_string(),
                think_provider: "open_ai".to_string(),
                think_model: "gpt-4o-mini".to_string(),
                system_prompt: "You are a professional interviewer. Ask one question at a time, \
                                follow up on vague answers, and use retrieve_context when you need \
                                details about the role or the candidate."
                    .to_string(),
                speak_provider: "deepgram".to_string(),
                speak_voice: "aura-2-thalia-en".to_string(),
                keepalive_secs: 8,
            },
            audio: AudioConfig {
                capture_sample_rate: 16000,
                playback_sample_rate: 24000,
                capture_frame_size: 4096,
            },
            backend: BackendConfig {
                context_url: "http://127.0.0.1:8080/api/v1/tools/context".to_string(),
                scoring_url: "http://127.0.0.1:9000/score".to_string(),
                request_timeout_secs: 30,
            },
            analysis: AnalysisConfig {
                workers: 2,
                max_attempts: 3,
                retry_delays_secs: vec![30, 60, 120],
                max_exceptions: 2,
                attempt_timeout_secs: 300,
                min_candidate_lines: 3,
                min_transcript_chars: 500,
                candidate_labels: vec![
                    "candidate:".to_string(),
                    "user:".to_string(),
                    "interviewee:".to_string(),
                ],
            },
            recovery: RecoveryConfig {
                stuck_after_secs: 30 * 60,
                unenqueued_after_secs: 2 * 60 * 60,
                sweep_interval_secs: 0,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`
    /// - `APP_AGENT__API_KEY=...`
    /// - `APP_ANALYSIS__ATTEMPT_TIMEOUT_SECS=120`
    /// - `HOST=0.0.0.0` / `PORT=3000`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !(self.agent.url.starts_with("ws://") || self.agent.url.starts_with("wss://")) {
            return Err(anyhow::anyhow!("Agent url must use ws:// or wss://"));
        }

        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rates must be greater than 0"));
        }

        if self.audio.capture_frame_size == 0 {
            return Err(anyhow::anyhow!("Capture frame size must be greater than 0"));
        }

        if self.analysis.workers == 0 {
            return Err(anyhow::anyhow!("Analysis workers must be greater than 0"));
        }

        if self.analysis.max_attempts == 0 {
            return Err(anyhow::anyhow!("Analysis max attempts must be greater than 0"));
        }

        if self.analysis.max_attempts > 1 && self.analysis.retry_delays_secs.is_empty() {
            return Err(anyhow::anyhow!("Retry delays are required when retries are enabled"));
        }

        if self.analysis.attempt_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Analysis attempt timeout must be greater than 0"));
        }

        if self.analysis.candidate_labels.iter().all(|label| label.trim().is_empty()) {
            return Err(anyhow::anyhow!("At least one candidate label is required"));
        }

        if self.recovery.unenqueued_after_secs < self.recovery.stuck_after_secs {
            return Err(anyhow::anyhow!(
                "Unenqueued threshold must not be shorter than the stuck threshold"
            ));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON update (used by `PUT /api/v1/config`).
    ///
    /// Only the fields present in the JSON change, e.g.
    /// `{"analysis": {"max_attempts": 5}}` leaves everything else alone.
    /// Server bind settings are ignored because the listener is already bound.
    /// Agent and performance changes apply to the next interview; analysis and
    /// recovery changes apply after a restart.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(agent) = partial.get("agent") {
            if let Some(language) = agent.get("language").and_then(|v| v.as_str()) {
                self.agent.language = language.to_string();
            }
            if let Some(greeting) = agent.get("greeting").and_then(|v| v.as_str()) {
                self.agent.greeting = greeting.to_string();
            }
            if let Some(prompt) = agent.get("system_prompt").and_then(|v| v.as_str()) {
                self.agent.system_prompt = prompt.to_string();
            }
            if let Some(voice) = agent.get("speak_voice").and_then(|v| v.as_str()) {
                self.agent.speak_voice = voice.to_string();
            }
        }

        if let Some(analysis) = partial.get("analysis") {
            if let Some(attempts) = analysis.get("max_attempts").and_then(|v| v.as_u64()) {
                self.analysis.max_attempts = attempts as u32;
            }
            if let Some(delays) = analysis.get("retry_delays_secs").and_then(|v| v.as_array()) {
                self.analysis.retry_delays_secs = delays.iter().filter_map(|d| d.as_u64()).collect();
            }
            if let Some(exceptions) = analysis.get("max_exceptions").and_then(|v| v.as_u64()) {
                self.analysis.max_exceptions = exceptions as u32;
            }
            if let Some(timeout) = analysis.get("attempt_timeout_secs").and_then(|v| v.as_u64()) {
                self.analysis.attempt_timeout_secs = timeout;
            }
            if let Some(lines) = analysis.get("min_candidate_lines").and_then(|v| v.as_u64()) {
                self.analysis.min_candidate_lines = lines as usize;
            }
            if let Some(chars) = analysis.get("min_transcript_chars").and_then(|v| v.as_u64()) {
                self.analysis.min_transcript_chars = chars as usize;
            }
        }

        if let Some(recovery) = partial.get("recovery") {
            if let Some(secs) = recovery.get("stuck_after_secs").and_then(|v| v.as_u64()) {
                self.recovery.stuck_after_secs = secs;
            }
            if let Some(secs) = recovery.get("unenqueued_after_secs").and_then(|v| v.as_u64()) {
                self.recovery.unenqueued_after_secs = secs;
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.analysis.max_attempts, 3);
        assert_eq!(config.analysis.retry_delays_secs, vec![30, 60, 120]);
        assert_eq!(config.audio.capture_frame_size, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.agent.url = "https://agent.example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.analysis.retry_delays_secs.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.recovery.unenqueued_after_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"analysis": {"max_attempts": 5, "retry_delays_secs": [1, 2]}, "agent": {"greeting": "Hi"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.analysis.max_attempts, 5);
        assert_eq!(config.analysis.retry_delays_secs, vec![1, 2]);
        assert_eq!(config.agent.greeting, "Hi");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_config_update_rejects_invalid_result() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"analysis": {"max_attempts": 0}}"#).is_err());
    }
}
