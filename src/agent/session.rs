//! # Agent Protocol State Machine
//!
//! One [`AgentSession`] per live interview. It consumes [`AgentEvent`]s in
//! arrival order and routes them: audio to the playback scheduler, tool calls
//! to the dispatcher, transcript lines to the log.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: nothing opened yet
//! 2. **Connecting**: caller asked for a connection
//! 3. **Configuring**: channel open, settings sent, waiting for the acknowledgement
//! 4. **ListeningActive**: capture running, the candidate may speak
//! 5. **AgentSpeaking**: the agent is talking (capture keeps running)
//! 6. **Closed** / **Errored**: terminal
//!
//! Terminal states swallow every further event, except that a `Close` after
//! `Errored` still releases capture and the playback timeline.

use crate::agent::protocol::{AgentEvent, OutboundMessage, ToolCallRequest};
use crate::agent::tools::ToolDispatcher;
use crate::audio::capture::CaptureAdapter;
use crate::audio::frame::AudioFrame;
use crate::audio::playback::{AudioSink, PlaybackScheduler};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionConnectionState {
    Idle,
    Connecting,
    Configuring,
    ListeningActive,
    AgentSpeaking,
    Closed,
    Errored,
}

impl SessionConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    /// True once the channel is open and configuration has started.
    fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Configuring | Self::ListeningActive | Self::AgentSpeaking
        )
    }
}

/// One line of the live conversation, appended in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub role: String,
    pub content: String,
    pub order: u32,
}

/// Things the session reports to whoever is presenting it (the browser bridge).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    StateChanged(SessionConnectionState),
    Transcript(TranscriptEntry),
    Error(String),
}

pub trait SessionObserver: Send {
    fn notify(&mut self, notice: SessionNotice);
}

/// What is left of a session once its driver has stopped.
#[derive(Debug, Clone)]
pub struct InterviewReport {
    pub session_id: Uuid,
    pub state: SessionConnectionState,
    pub transcript: Vec<TranscriptEntry>,
    pub error: Option<String>,
}

pub struct AgentSession {
    session_id: Uuid,
    state: SessionConnectionState,
    transcript: Vec<TranscriptEntry>,
    capture: CaptureAdapter,
    playback: PlaybackScheduler,
    sink: Box<dyn AudioSink>,
    observer: Box<dyn SessionObserver>,
    dispatcher: Arc<ToolDispatcher>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    last_error: Option<String>,
}

impl AgentSession {
    pub fn new(
        session_id: Uuid,
        capture: CaptureAdapter,
        playback: PlaybackScheduler,
        sink: Box<dyn AudioSink>,
        observer: Box<dyn SessionObserver>,
        dispatcher: Arc<ToolDispatcher>,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        Self {
            session_id,
            state: SessionConnectionState::Idle,
            transcript: Vec::new(),
            capture,
            playback,
            sink,
            observer,
            dispatcher,
            outbound,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionConnectionState {
        self.state
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_running()
    }

    pub fn next_play_time(&self) -> Option<f64> {
        self.playback.next_play_time()
    }

    /// Idle → Connecting. Returns false if the session was already used.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != SessionConnectionState::Idle {
            warn!(session_id = %self.session_id, state = ?self.state, "Connect requested twice");
            return false;
        }
        self.transition(SessionConnectionState::Connecting);
        true
    }

    /// The transport could not be opened; nothing is retried.
    pub fn fail_connect(&mut self, message: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.fail(message.into());
    }

    /// Apply one inbound event.
    pub fn handle_event(&mut self, event: AgentEvent) {
        if self.state.is_terminal() {
            if let AgentEvent::Close { .. } = event {
                self.release();
            } else {
                debug!(session_id = %self.session_id, event = event.name(), "Event after session ended, ignored");
            }
            return;
        }

        match event {
            AgentEvent::Open => {
                self.transition(SessionConnectionState::Configuring);
            }
            AgentEvent::Configured => {
                if self.state == SessionConnectionState::Configuring {
                    self.capture.start();
                    self.playback.resume();
                    self.transition(SessionConnectionState::ListeningActive);
                } else {
                    debug!(session_id = %self.session_id, state = ?self.state, "Duplicate settings acknowledgement");
                }
            }
            AgentEvent::UserSpeaking => {
                if self.state.is_live() && self.state != SessionConnectionState::ListeningActive {
                    self.capture.start();
                    self.transition(SessionConnectionState::ListeningActive);
                }
            }
            AgentEvent::AgentSpeaking => {
                if self.state.is_live() {
                    self.transition(SessionConnectionState::AgentSpeaking);
                }
            }
            AgentEvent::Transcript { role, content } => self.record_transcript(role, content),
            AgentEvent::ToolCallRequest(calls) => {
                for call in calls {
                    self.spawn_tool_call(call);
                }
            }
            AgentEvent::Audio(frame) => self.play(&frame),
            AgentEvent::Error { message } => {
                error!(session_id = %self.session_id, "Agent reported an error: {}", message);
                self.fail(message);
            }
            AgentEvent::Close { initiator, reason } => {
                info!(
                    session_id = %self.session_id,
                    initiator = ?initiator,
                    reason = reason.as_deref().unwrap_or(""),
                    "Agent channel closed"
                );
                self.transition(SessionConnectionState::Closed);
                self.release();
            }
            AgentEvent::Unhandled { kind } => {
                debug!(session_id = %self.session_id, kind = %kind, "Unhandled agent message");
            }
        }
    }

    /// Feed one microphone buffer to the capture adapter.
    pub fn push_microphone(&mut self, samples: &[f32]) -> usize {
        self.capture.push_samples(samples)
    }

    pub fn into_report(self) -> InterviewReport {
        InterviewReport {
            session_id: self.session_id,
            state: self.state,
            transcript: self.transcript,
            error: self.last_error,
        }
    }

    fn record_transcript(&mut self, role: String, content: String) {
        let entry = TranscriptEntry {
            role,
            content,
            order: self.transcript.len() as u32,
        };
        self.transcript.push(entry.clone());
        self.observer.notify(SessionNotice::Transcript(entry));
    }

    fn spawn_tool_call(&self, call: ToolCallRequest) {
        debug!(session_id = %self.session_id, tool = %call.name, id = %call.id, "Dispatching tool call");
        let dispatcher = self.dispatcher.clone();
        let outbound = self.outbound.clone();
        let session_id = self.session_id;
        tokio::spawn(async move {
            let response = dispatcher.dispatch(call).await;
            if outbound.send(OutboundMessage::ToolCallResponse(response)).is_err() {
                debug!(session_id = %session_id, "Channel closed before tool response could be sent");
            }
        });
    }

    fn play(&mut self, frame: &AudioFrame) {
        if frame.is_empty() {
            return;
        }
        let buffer = self.playback.schedule(frame);
        self.sink.render(buffer);
    }

    fn fail(&mut self, message: String) {
        self.last_error = Some(message.clone());
        self.capture.stop();
        self.transition(SessionConnectionState::Errored);
        self.observer.notify(SessionNotice::Error(message));
    }

    /// Stop capture and pull the playback timeline back. Idempotent.
    fn release(&mut self) {
        self.capture.stop();
        self.playback.reset();
    }

    fn transition(&mut self, next: SessionConnectionState) {
        if self.state == next {
            return;
        }
        debug!(session_id = %self.session_id, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
        self.observer.notify(SessionNotice::StateChanged(next));
    }
}
