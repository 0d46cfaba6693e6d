//! # Agent Wire Protocol
//!
//! Message types exchanged with the remote conversational agent over the
//! transport WebSocket.
//!
//! ## Message Format:
//! - **Service → Agent**: one JSON `Settings` message first, then binary PCM16
//!   audio frames, `FunctionCallResponse` JSON and `KeepAlive` JSON
//! - **Agent → Service**: JSON events tagged by `type`, binary PCM16 audio
//!
//! Inbound JSON is decoded into the closed [`AgentEvent`] enum. Unknown or
//! malformed messages become [`AgentEvent::Unhandled`] instead of errors, so
//! the protocol state machine always sees a well-formed event.

use crate::audio::frame::AudioFrame;
use crate::config::{AgentConfig, AudioConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A function the agent may call during the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
}

impl AudioFormat {
    pub fn linear16(sample_rate: u32) -> Self {
        Self {
            encoding: "linear16".to_string(),
            sample_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub input: AudioFormat,
    pub output: AudioFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkSettings {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub functions: Vec<FunctionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakSettings {
    pub provider: String,
    pub voice: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBehavior {
    pub language: String,
    pub greeting: String,
    pub listen: ProviderSettings,
    pub think: ThinkSettings,
    pub speak: SpeakSettings,
}

/// The one-time configuration message sent right after the channel opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub audio: AudioSettings,
    pub agent: AgentBehavior,
}

impl AgentSettings {
    /// Build the settings message from configuration and the callable tools.
    pub fn from_config(
        agent: &AgentConfig,
        audio: &AudioConfig,
        functions: Vec<FunctionDefinition>,
    ) -> Self {
        Self {
            audio: AudioSettings {
                input: AudioFormat::linear16(audio.capture_sample_rate),
                output: AudioFormat::linear16(audio.playback_sample_rate),
            },
            agent: AgentBehavior {
                language: agent.language.clone(),
                greeting: agent.greeting.clone(),
                listen: ProviderSettings {
                    provider: agent.listen_provider.clone(),
                    model: agent.listen_model.clone(),
                },
                think: ThinkSettings {
                    provider: agent.think_provider.clone(),
                    model: agent.think_model.clone(),
                    prompt: agent.system_prompt.clone(),
                    functions,
                },
                speak: SpeakSettings {
                    provider: agent.speak_provider.clone(),
                    voice: agent.speak_voice.clone(),
                },
            },
        }
    }
}

/// A function call requested by the agent.
///
/// `arguments` is kept opaque until the dispatcher parses it; agents send it
/// either as an object or as a JSON-encoded string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    /// Decode one entry of a call batch on its own.
    ///
    /// An entry is kept as long as it carries an id; a missing name becomes
    /// empty so the dispatcher still answers it as not implemented.
    fn from_entry(entry: &Value) -> Option<Self> {
        let id = match entry.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                warn!(entry = %entry, "Dropping tool call without an id");
                return None;
            }
        };
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(Self {
            id,
            name,
            arguments: entry.get("arguments").cloned().unwrap_or(Value::Null),
        })
    }
}

/// The answer to exactly one [`ToolCallRequest`], correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub name: String,
    pub content: String,
}

/// Messages written to the agent, in the order they are queued.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Settings(AgentSettings),
    Audio(AudioFrame),
    ToolCallResponse(ToolCallResponse),
    KeepAlive,
}

/// Encoded form of an outbound message, mapped onto WebSocket frames by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum OutboundJson<'a> {
    Settings(&'a AgentSettings),
    FunctionCallResponse(&'a ToolCallResponse),
    KeepAlive,
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<WireFrame, serde_json::Error> {
        let json = match self {
            OutboundMessage::Audio(frame) => return Ok(WireFrame::Binary(frame.to_le_bytes())),
            OutboundMessage::Settings(settings) => OutboundJson::Settings(settings),
            OutboundMessage::ToolCallResponse(response) => OutboundJson::FunctionCallResponse(response),
            OutboundMessage::KeepAlive => OutboundJson::KeepAlive,
        };
        Ok(WireFrame::Text(serde_json::to_string(&json)?))
    }
}

/// Which side ended the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseInitiator {
    Local,
    Remote,
}

/// Every inbound event the protocol state machine understands.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Channel opened and the settings message has been written
    Open,
    /// Agent acknowledged the settings message
    Configured,
    Close {
        initiator: CloseInitiator,
        reason: Option<String>,
    },
    Error {
        message: String,
    },
    UserSpeaking,
    AgentSpeaking,
    Transcript {
        role: String,
        content: String,
    },
    ToolCallRequest(Vec<ToolCallRequest>),
    Audio(AudioFrame),
    Unhandled {
        kind: String,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum InboundJson {
    SettingsApplied {},
    UserStartedSpeaking {},
    AgentStartedSpeaking {},
    ConversationText {
        role: String,
        content: String,
    },
    FunctionCallRequest {
        functions: Vec<Value>,
    },
    Error {
        description: String,
        #[serde(default)]
        code: Option<String>,
    },
}

impl AgentEvent {
    /// Decode one inbound text message.
    pub fn from_json(text: &str) -> AgentEvent {
        match serde_json::from_str::<InboundJson>(text) {
            Ok(InboundJson::SettingsApplied {}) => AgentEvent::Configured,
            Ok(InboundJson::UserStartedSpeaking {}) => AgentEvent::UserSpeaking,
            Ok(InboundJson::AgentStartedSpeaking {}) => AgentEvent::AgentSpeaking,
            Ok(InboundJson::ConversationText { role, content }) => {
                AgentEvent::Transcript { role, content }
            }
            Ok(InboundJson::FunctionCallRequest { functions }) => {
                AgentEvent::ToolCallRequest(functions.iter().filter_map(ToolCallRequest::from_entry).collect())
            }
            Ok(InboundJson::Error { description, code }) => AgentEvent::Error {
                message: match code {
                    Some(code) => format!("{} ({})", description, code),
                    None => description,
                },
            },
            Err(_) => {
                // Known shape failed or unknown type: keep the tag for logging
                let kind = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|value| value.get("type").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| "malformed".to_string());
                AgentEvent::Unhandled { kind }
            }
        }
    }

    /// Short name used in log lines.
    pub fn name(&self) -> &str {
        match self {
            AgentEvent::Open => "open",
            AgentEvent::Configured => "configured",
            AgentEvent::Close { .. } => "close",
            AgentEvent::Error { .. } => "error",
            AgentEvent::UserSpeaking => "user_speaking",
            AgentEvent::AgentSpeaking => "agent_speaking",
            AgentEvent::Transcript { .. } => "transcript",
            AgentEvent::ToolCallRequest(_) => "tool_call_request",
            AgentEvent::Audio(_) => "audio",
            AgentEvent::Unhandled { .. } => "unhandled",
        }
    }
}
