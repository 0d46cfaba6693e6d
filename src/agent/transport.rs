//! # Agent Transport
//!
//! Bidirectional WebSocket channel to the remote agent.
//!
//! ## Contract:
//! 1. **Open**: connect to the agent URL; failure is returned to the caller
//!    as [`TransportError::ConnectFailed`] and never retried here
//! 2. **Configure**: the settings message is written before anything else,
//!    then the [`TransportGate`] opens and [`AgentEvent::Open`] is emitted
//! 3. **Stream**: a writer task drains the outbound queue (audio, tool
//!    responses, keep-alives); a reader task turns every inbound message into
//!    an [`AgentEvent`] in arrival order
//! 4. **Close**: remote close, stream end, a read error or a failed write emit
//!    one terminal [`AgentEvent::Close`] and shut the gate

use crate::agent::protocol::{AgentEvent, AgentSettings, CloseInitiator, OutboundMessage, WireFrame};
use crate::audio::frame::AudioFrame;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid agent endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("failed to open agent channel: {0}")]
    ConnectFailed(String),
    #[error("failed to send agent settings: {0}")]
    ConfigureFailed(String),
}

/// Shared open/closed flag for the outbound direction.
///
/// The capture adapter checks it before forwarding a frame; only the
/// transport flips it.
#[derive(Debug, Clone, Default)]
pub struct TransportGate(Arc<AtomicBool>);

impl TransportGate {
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn open(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn close(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Emits the terminal close event at most once, whichever task sees the
/// channel die first.
#[derive(Clone)]
struct CloseSignal {
    fired: Arc<AtomicBool>,
    gate: TransportGate,
    events: mpsc::UnboundedSender<AgentEvent>,
}

impl CloseSignal {
    fn new(gate: TransportGate, events: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            gate,
            events,
        }
    }

    fn fire(&self, reason: Option<String>) {
        self.gate.close();
        if !self.fired.swap(true, Ordering::AcqRel) {
            let _ = self.events.send(AgentEvent::Close {
                initiator: CloseInitiator::Remote,
                reason,
            });
        }
    }
}

/// Where and how to reach the agent.
#[derive(Debug, Clone)]
pub struct AgentEndpoint {
    pub url: String,
    pub api_key: Option<String>,
    /// Sample rate of inbound binary audio
    pub playback_sample_rate: u32,
    pub keepalive: Duration,
}

/// Handle to a live agent channel.
///
/// The writer task runs detached until it has sent its close frame. Dropping
/// the handle closes the channel and aborts the reader.
pub struct AgentTransport {
    gate: TransportGate,
    close_tx: Option<oneshot::Sender<()>>,
    reader: JoinHandle<()>,
}

impl AgentTransport {
    /// Open the channel, write `settings`, and start the reader/writer tasks.
    ///
    /// ## Parameters:
    /// - **outbound**: queue drained by the writer; the session holds the sender
    /// - **events**: every inbound event is pushed here, starting with `Open`
    /// - **gate**: opened once the settings message has been written
    pub async fn connect(
        endpoint: &AgentEndpoint,
        settings: &AgentSettings,
        outbound: mpsc::UnboundedReceiver<OutboundMessage>,
        events: mpsc::UnboundedSender<AgentEvent>,
        gate: TransportGate,
    ) -> Result<Self, TransportError> {
        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
        if let Some(key) = &endpoint.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        info!(url = %endpoint.url, "Agent channel open");

        let (mut sink, mut source) = stream.split();

        // Settings go out before the writer task exists, so nothing can overtake them
        let settings_frame = OutboundMessage::Settings(settings.clone())
            .encode()
            .map_err(|e| TransportError::ConfigureFailed(e.to_string()))?;
        sink.send(to_message(settings_frame))
            .await
            .map_err(|e| TransportError::ConfigureFailed(e.to_string()))?;

        gate.open();
        let _ = events.send(AgentEvent::Open);

        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let close_signal = CloseSignal::new(gate.clone(), events.clone());
        let writer_close = close_signal.clone();
        let keepalive = endpoint.keepalive;
        let mut outbound = outbound;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(keepalive.max(Duration::from_secs(1)));
            ticker.tick().await;
            loop {
                let message = tokio::select! {
                    _ = &mut close_rx => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    _ = ticker.tick() => OutboundMessage::KeepAlive,
                    next = outbound.recv() => match next {
                        Some(message) => message,
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },
                };

                let frame = match message.encode() {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("Dropping unencodable outbound message: {}", err);
                        continue;
                    }
                };
                if let Err(err) = sink.send(to_message(frame)).await {
                    warn!("Agent channel write failed: {}", err);
                    writer_close.fire(Some(err.to_string()));
                    break;
                }
            }
            writer_close.gate.close();
            debug!("Agent writer stopped");
        });

        let playback_rate = endpoint.playback_sample_rate;
        let reader = tokio::spawn(async move {
            let mut next_index: u64 = 0;
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(AgentEvent::from_json(&text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        match AudioFrame::from_le_bytes(&data, playback_rate, next_index) {
                            Ok(frame) => {
                                next_index += 1;
                                let _ = events.send(AgentEvent::Audio(frame));
                            }
                            Err(err) => warn!("Discarding agent audio: {}", err),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    }
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite
                    }
                    Some(Err(err)) => break Some(err.to_string()),
                    None => break None,
                }
            };
            close_signal.fire(reason);
            debug!("Agent reader stopped");
        });

        Ok(Self {
            gate,
            close_tx: Some(close_tx),
            reader,
        })
    }

    /// Locally close the channel: stop forwarding, send a close frame.
    pub fn close(&mut self) {
        self.gate.close();
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
    }
}

impl Drop for AgentTransport {
    fn drop(&mut self) {
        self.close();
        self.reader.abort();
    }
}

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text),
        WireFrame::Binary(data) => Message::Binary(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_starts_closed() {
        let gate = TransportGate::default();
        assert!(!gate.is_open());
        gate.open();
        let shared = gate.clone();
        assert!(shared.is_open());
        gate.close();
        assert!(!shared.is_open());
    }

    #[test]
    fn test_close_signal_fires_once() {
        let gate = TransportGate::default();
        gate.open();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let signal = CloseSignal::new(gate.clone(), events_tx);

        signal.clone().fire(Some("broken pipe".to_string()));
        signal.fire(None);

        assert!(!gate.is_open());
        assert_eq!(
            events_rx.try_recv().unwrap(),
            AgentEvent::Close {
                initiator: CloseInitiator::Remote,
                reason: Some("broken pipe".to_string()),
            }
        );
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_peer_yields_single_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let settings = ws.next().await.unwrap().unwrap();
            assert!(matches!(settings, Message::Text(_)));
        });

        let endpoint = AgentEndpoint {
            url: format!("ws://{}/agent", addr),
            api_key: None,
            playback_sample_rate: 24000,
            keepalive: Duration::from_secs(8),
        };
        let config = crate::config::AppConfig::default();
        let settings = AgentSettings::from_config(&config.agent, &config.audio, vec![]);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let gate = TransportGate::default();

        let _transport = AgentTransport::connect(&endpoint, &settings, out_rx, events_tx, gate.clone())
            .await
            .unwrap();
        assert_eq!(events_rx.recv().await, Some(AgentEvent::Open));
        server.await.unwrap();

        let close = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .unwrap();
        assert!(matches!(close, Some(AgentEvent::Close { initiator: CloseInitiator::Remote, .. })));
        assert!(!gate.is_open());

        for _ in 0..3 {
            let _ = out_tx.send(OutboundMessage::Audio(AudioFrame::new(vec![0; 64], 16000, 0)));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        while let Ok(event) = events_rx.try_recv() {
            assert!(!matches!(event, AgentEvent::Close { .. }), "second close emitted: {:?}", event);
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported_not_retried() {
        let endpoint = AgentEndpoint {
            url: "ws://127.0.0.1:9/agent".to_string(),
            api_key: None,
            playback_sample_rate: 24000,
            keepalive: Duration::from_secs(8),
        };
        let config = crate::config::AppConfig::default();
        let settings = AgentSettings::from_config(&config.agent, &config.audio, vec![]);
        let (_out_tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let gate = TransportGate::default();

        let result = AgentTransport::connect(&endpoint, &settings, out_rx, events_tx, gate.clone()).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
        assert!(!gate.is_open());
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let endpoint = AgentEndpoint {
            url: "not a url".to_string(),
            api_key: None,
            playback_sample_rate: 24000,
            keepalive: Duration::from_secs(8),
        };
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let config = crate::config::AppConfig::default();
        let settings = AgentSettings::from_config(&config.agent, &config.audio, vec![]);
        let (_out_tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let result = runtime.block_on(AgentTransport::connect(
            &endpoint,
            &settings,
            out_rx,
            events_tx,
            TransportGate::default(),
        ));
        assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));
    }
}
