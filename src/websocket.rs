//! # Interview WebSocket Bridge
//!
//! One browser connection drives one live interview. Clients connect to
//! `/ws/interview/{session_id}`; the actor owns the interview driver task and
//! relays between the browser and the agent.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the session must exist and not be completed or cancelled
//! 2. **Start**: `{"type":"start_session"}` opens the agent channel
//! 3. **Microphone**: binary messages of little-endian `f32` samples at the capture rate
//! 4. **Conversation**: server sends `session_status`, `transcript` and binary playback frames
//! 5. **End**: `{"type":"end_session"}` or closing the socket; the transcript is
//!    stored and analysis enqueued
//!
//! ## Playback Frame Layout (server → client, binary):
//! - bytes 0..8: `start_at`, f64 LE, seconds on the interview's output clock
//! - bytes 8..16: frame index, u64 LE
//! - bytes 16..: PCM16 LE samples at the playback rate

use crate::agent::driver::{run_interview, InterviewSetup};
use crate::agent::protocol::AgentSettings;
use crate::agent::session::{InterviewReport, SessionConnectionState, SessionNotice, SessionObserver};
use crate::agent::tools::{HttpContextLookup, ToolDispatcher};
use crate::agent::transport::AgentEndpoint;
use crate::analysis::model::{LogEntry, SessionStatus};
use crate::audio::frame::{f32_from_le_bytes, f32_to_pcm16};
use crate::audio::playback::{AudioSink, MonotonicClock, ScheduledBuffer};
use crate::error::AppError;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
const PLAYBACK_HEADER_BYTES: usize = 16;

/// Messages accepted from the browser.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartSession,
    EndSession,
    Pong {
        #[serde(default)]
        timestamp: i64,
    },
}

/// Messages sent to the browser.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionStatus {
        session_id: Uuid,
        status: SessionConnectionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Transcript {
        session_id: Uuid,
        role: String,
        content: String,
        order: u32,
    },
    Error {
        code: String,
        message: String,
        session_id: Option<Uuid>,
    },
    Ping {
        timestamp: i64,
    },
}

/// Serialize a scheduled buffer into the binary playback frame.
pub fn encode_playback(buffer: &ScheduledBuffer) -> Vec<u8> {
    let pcm = f32_to_pcm16(&buffer.samples);
    let mut out = vec![0u8; PLAYBACK_HEADER_BYTES + pcm.len() * 2];
    LittleEndian::write_f64(&mut out[0..8], buffer.start_at);
    LittleEndian::write_u64(&mut out[8..16], buffer.index);
    LittleEndian::write_i16_into(&pcm, &mut out[PLAYBACK_HEADER_BYTES..]);
    out
}

/// Store what the interview produced and hand it to analysis.
///
/// ## Returns:
/// - `true` when the session was completed and its analysis enqueued
/// - `false` when nothing was said; the session goes back to `pending` so it can be retried
pub async fn finish_interview(state: &AppState, report: &InterviewReport) -> Result<bool, AppError> {
    let session_id = report.session_id;
    if report.transcript.is_empty() {
        state.store.set_session_status(session_id, SessionStatus::Pending).await?;
        return Ok(false);
    }

    let entries = report
        .transcript
        .iter()
        .map(|entry| LogEntry::from_role(&entry.role, entry.content.clone(), entry.order))
        .collect();
    state.store.append_log_entries(session_id, entries).await?;
    state.queue.complete_session(session_id).await?;
    Ok(true)
}

/// Relay from the interview driver back into the socket actor.
#[derive(Clone)]
struct SocketBridge {
    addr: Addr<InterviewSocket>,
}

impl AudioSink for SocketBridge {
    fn render(&mut self, buffer: ScheduledBuffer) {
        self.addr.do_send(Playback(buffer));
    }
}

impl SessionObserver for SocketBridge {
    fn notify(&mut self, notice: SessionNotice) {
        self.addr.do_send(Notice(notice));
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct Playback(ScheduledBuffer);

#[derive(Message)]
#[rtype(result = "()")]
struct Notice(SessionNotice);

#[derive(Message)]
#[rtype(result = "()")]
struct InterviewFinished {
    state: SessionConnectionState,
    analysis_enqueued: bool,
}

/// WebSocket actor for one interview.
pub struct InterviewSocket {
    session_id: Uuid,
    state: AppState,
    /// Present while the driver runs
    microphone: Option<mpsc::UnboundedSender<Vec<f32>>>,
    stop: Option<oneshot::Sender<()>>,
    last_heartbeat: Instant,
}

impl InterviewSocket {
    pub fn new(session_id: Uuid, state: AppState) -> Self {
        Self {
            session_id,
            state,
            microphone: None,
            stop: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("Could not serialize message for client: {}", err),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!(session_id = %self.session_id, "WebSocket error {}: {}", code, message);
        self.send(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
                session_id: Some(self.session_id),
            },
        );
    }

    fn start_interview(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if self.microphone.is_some() {
            self.send_error(ctx, "session_active", "Interview already started");
            return;
        }
        if !self.state.try_begin_interview() {
            self.send_error(ctx, "capacity", "Too many interviews in progress, try again later");
            return;
        }

        let config = self.state.get_config();
        let bridge = SocketBridge { addr: ctx.address() };
        let lookup = HttpContextLookup::new(
            self.state.http.clone(),
            config.backend.context_url.clone(),
            Some(self.session_id),
        );
        let setup = InterviewSetup {
            session_id: self.session_id,
            endpoint: AgentEndpoint {
                url: config.agent.url.clone(),
                api_key: config.agent.api_key.clone(),
                playback_sample_rate: config.audio.playback_sample_rate,
                keepalive: Duration::from_secs(config.agent.keepalive_secs),
            },
            settings: AgentSettings::from_config(&config.agent, &config.audio, ToolDispatcher::definitions()),
            audio: config.audio.clone(),
            clock: Arc::new(MonotonicClock::new()),
            sink: Box::new(bridge.clone()),
            observer: Box::new(bridge),
            dispatcher: Arc::new(ToolDispatcher::new(Arc::new(lookup))),
        };

        let (mic_tx, mic_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.microphone = Some(mic_tx);
        self.stop = Some(stop_tx);

        let state = self.state.clone();
        let addr = ctx.address();
        let session_id = self.session_id;
        info!(session_id = %session_id, "Starting interview");

        tokio::spawn(async move {
            if let Err(err) = state.store.set_session_status(session_id, SessionStatus::Active).await {
                warn!(session_id = %session_id, "Could not mark session active: {}", err);
            }

            let report = run_interview(setup, mic_rx, stop_rx).await;
            let failed = report.state == SessionConnectionState::Errored;
            let analysis_enqueued = match finish_interview(&state, &report).await {
                Ok(enqueued) => enqueued,
                Err(err) => {
                    error!(session_id = %session_id, "Could not store interview results: {}", err);
                    false
                }
            };
            state.end_interview(failed);
            addr.do_send(InterviewFinished {
                state: report.state,
                analysis_enqueued,
            });
        });
    }

    fn end_interview(&mut self) {
        match self.stop.take() {
            Some(stop) => {
                let _ = stop.send(());
            }
            None => debug!(session_id = %self.session_id, "End requested with no interview running"),
        }
    }

    fn handle_microphone(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let Some(microphone) = &self.microphone else {
            self.send_error(ctx, "not_started", "Send start_session before audio");
            return;
        };
        match f32_from_le_bytes(data) {
            Ok(samples) => {
                if microphone.send(samples).is_err() {
                    debug!(session_id = %self.session_id, "Microphone audio after the interview ended");
                }
            }
            Err(err) => self.send_error(ctx, "audio_error", &err.to_string()),
        }
    }
}

impl Actor for InterviewSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "Interview socket connected");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            act.send(
                ctx,
                &ServerMessage::Ping {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            );
        });
    }

    /// Dropping the stop sender and the microphone ends the driver with a local close.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "Interview socket closed");
        self.end_interview();
        self.microphone = None;
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for InterviewSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::StartSession) => self.start_interview(ctx),
                Ok(ClientMessage::EndSession) => self.end_interview(),
                Ok(ClientMessage::Pong { .. }) => self.last_heartbeat = Instant::now(),
                Err(err) => self.send_error(ctx, "invalid_json", &format!("Invalid message: {}", err)),
            },
            Ok(ws::Message::Binary(data)) => self.handle_microphone(&data, ctx),
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, "Client closed the socket: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Playback> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: Playback, ctx: &mut Self::Context) {
        ctx.binary(encode_playback(&msg.0));
    }
}

impl Handler<Notice> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: Notice, ctx: &mut Self::Context) {
        let message = match msg.0 {
            SessionNotice::StateChanged(status) => ServerMessage::SessionStatus {
                session_id: self.session_id,
                status,
                message: None,
            },
            SessionNotice::Transcript(entry) => ServerMessage::Transcript {
                session_id: self.session_id,
                role: entry.role,
                content: entry.content,
                order: entry.order,
            },
            SessionNotice::Error(message) => ServerMessage::Error {
                code: "agent_error".to_string(),
                message,
                session_id: Some(self.session_id),
            },
        };
        self.send(ctx, &message);
    }
}

impl Handler<InterviewFinished> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: InterviewFinished, ctx: &mut Self::Context) {
        self.microphone = None;
        self.stop = None;
        let message = if msg.analysis_enqueued {
            "Interview saved, analysis queued"
        } else {
            "Interview ended before anything was recorded"
        };
        self.send(
            ctx,
            &ServerMessage::SessionStatus {
                session_id: self.session_id,
                status: msg.state,
                message: Some(message.to_string()),
            },
        );
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// The session is checked before the upgrade so unknown or finished sessions
/// get a plain 404/409 instead of a socket.
pub async fn interview_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<Uuid>,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let session_id = path.into_inner();
    info!(session_id = %session_id, "New interview socket from: {:?}", req.connection_info().peer_addr());

    let session = app_state.store.get_session(session_id).await.map_err(AppError::from)?;
    if matches!(session.status, SessionStatus::Completed | SessionStatus::Cancelled) {
        return Err(AppError::Conflict(format!("session {} has already ended", session_id)).into());
    }

    ws::start(InterviewSocket::new(session_id, app_state.get_ref().clone()), &req, stream)
}
