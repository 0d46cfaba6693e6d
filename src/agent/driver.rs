//! # Interview Driver
//!
//! The single task that owns one interview: it opens the agent transport,
//! then processes agent events, microphone buffers and the stop signal in
//! arrival order until the conversation ends.
//!
//! ## Exit Paths:
//! - **Remote close** or stream end from the agent
//! - **Agent error** (the channel is then closed locally)
//! - **Local stop** requested by the caller
//! - **Client gone**: the microphone channel closed
//!
//! Every path closes the transport and runs the session's release step, so
//! capture never outlives the conversation.

use crate::agent::protocol::{AgentEvent, AgentSettings, CloseInitiator};
use crate::agent::session::{AgentSession, InterviewReport, SessionObserver};
use crate::agent::tools::ToolDispatcher;
use crate::agent::transport::{AgentEndpoint, AgentTransport, TransportGate};
use crate::audio::capture::CaptureAdapter;
use crate::audio::playback::{AudioSink, OutputClock, PlaybackScheduler};
use crate::config::AudioConfig;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

/// Everything one interview needs besides its input channels.
pub struct InterviewSetup {
    pub session_id: Uuid,
    pub endpoint: AgentEndpoint,
    pub settings: AgentSettings,
    pub audio: AudioConfig,
    pub clock: Arc<dyn OutputClock>,
    pub sink: Box<dyn AudioSink>,
    pub observer: Box<dyn SessionObserver>,
    pub dispatcher: Arc<ToolDispatcher>,
}

/// Run one interview to completion.
///
/// ## Parameters:
/// - **microphone**: float sample buffers from the client; closing it ends the interview
/// - **stop**: fires (or is dropped) when the caller wants to end the interview
///
/// ## Returns:
/// The final state, the transcript collected so far and the last error.
pub async fn run_interview(
    setup: InterviewSetup,
    mut microphone: mpsc::UnboundedReceiver<Vec<f32>>,
    mut stop: oneshot::Receiver<()>,
) -> InterviewReport {
    let InterviewSetup {
        session_id,
        endpoint,
        settings,
        audio,
        clock,
        sink,
        observer,
        dispatcher,
    } = setup;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let gate = TransportGate::default();

    let capture = CaptureAdapter::new(
        audio.capture_frame_size,
        audio.capture_sample_rate,
        gate.clone(),
        outbound_tx.clone(),
    );
    let mut session = AgentSession::new(
        session_id,
        capture,
        PlaybackScheduler::new(clock),
        sink,
        observer,
        dispatcher,
        outbound_tx,
    );

    session.begin_connect();
    let mut transport =
        match AgentTransport::connect(&endpoint, &settings, outbound_rx, events_tx, gate).await {
            Ok(transport) => transport,
            Err(err) => {
                warn!(session_id = %session_id, "Could not reach the agent: {}", err);
                session.fail_connect(err.to_string());
                return session.into_report();
            }
        };

    loop {
        tokio::select! {
            _ = &mut stop => {
                info!(session_id = %session_id, "Interview stopped by caller");
                transport.close();
                session.handle_event(AgentEvent::Close {
                    initiator: CloseInitiator::Local,
                    reason: None,
                });
                break;
            }
            event = events_rx.recv() => match event {
                Some(event) => {
                    let closed = matches!(event, AgentEvent::Close { .. });
                    session.handle_event(event);
                    if closed {
                        break;
                    }
                    if session.state().is_terminal() {
                        transport.close();
                        session.handle_event(AgentEvent::Close {
                            initiator: CloseInitiator::Local,
                            reason: None,
                        });
                        break;
                    }
                }
                None => {
                    session.handle_event(AgentEvent::Close {
                        initiator: CloseInitiator::Remote,
                        reason: None,
                    });
                    break;
                }
            },
            samples = microphone.recv() => match samples {
                Some(samples) => {
                    session.push_microphone(&samples);
                }
                None => {
                    info!(session_id = %session_id, "Client audio stream ended");
                    transport.close();
                    session.handle_event(AgentEvent::Close {
                        initiator: CloseInitiator::Local,
                        reason: Some("client disconnected".to_string()),
                    });
                    break;
                }
            },
        }
    }

    drop(transport);
    let report = session.into_report();
    info!(
        session_id = %session_id,
        state = ?report.state,
        transcript_entries = report.transcript.len(),
        "Interview finished"
    );
    report
}
