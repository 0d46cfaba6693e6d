//! Shared fakes for unit tests.

use crate::agent::session::{SessionConnectionState, SessionNotice, SessionObserver, TranscriptEntry};
use crate::agent::tools::ContextLookup;
use crate::analysis::model::{InterviewSession, SessionMetadata};
use crate::analysis::scoring::{ScoringEngine, ScoringRequest};
use crate::analysis::store::{InMemorySessionStore, SessionStore};
use crate::audio::playback::{AudioSink, OutputClock, ScheduledBuffer};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Clock the test moves by hand.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn at(seconds: f64) -> Self {
        Self(AtomicU64::new(seconds.to_bits()))
    }

    pub fn set(&self, seconds: f64) {
        self.0.store(seconds.to_bits(), Ordering::SeqCst);
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink(Arc<Mutex<Vec<ScheduledBuffer>>>);

impl RecordingSink {
    pub fn buffers(&self) -> Vec<ScheduledBuffer> {
        self.0.lock().unwrap().clone()
    }
}

impl AudioSink for RecordingSink {
    fn render(&mut self, buffer: ScheduledBuffer) {
        self.0.lock().unwrap().push(buffer);
    }
}

#[derive(Clone, Default)]
pub struct RecordingObserver(Arc<Mutex<Vec<SessionNotice>>>);

impl RecordingObserver {
    pub fn states(&self) -> Vec<SessionConnectionState> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|notice| match notice {
                SessionNotice::StateChanged(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn transcripts(&self) -> Vec<TranscriptEntry> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|notice| match notice {
                SessionNotice::Transcript(entry) => Some(entry.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|notice| match notice {
                SessionNotice::Error(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn notify(&mut self, notice: SessionNotice) {
        self.0.lock().unwrap().push(notice);
    }
}

/// Lookup that always answers with the same text and records queries.
pub struct StaticLookup {
    answer: String,
    queries: Mutex<Vec<String>>,
}

impl StaticLookup {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContextLookup for StaticLookup {
    async fn lookup(&self, query: &str) -> anyhow::Result<String> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.answer.clone())
    }
}

pub struct FailingLookup;

#[async_trait]
impl ContextLookup for FailingLookup {
    async fn lookup(&self, _query: &str) -> anyhow::Result<String> {
        anyhow::bail!("context service unavailable")
    }
}

enum Script {
    /// Fail this many calls, then return the value
    FailThenSucceed(usize, Value),
    AlwaysFail(String),
    Hang,
}

/// Scoring engine with a predetermined sequence of answers.
pub struct ScriptedScoring {
    script: Script,
    calls: AtomicUsize,
    requests: Mutex<Vec<ScoringRequest>>,
}

impl ScriptedScoring {
    fn with(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(result: Value) -> Self {
        Self::with(Script::FailThenSucceed(0, result))
    }

    pub fn failing_times(failures: usize, result: Value) -> Self {
        Self::with(Script::FailThenSucceed(failures, result))
    }

    pub fn always_failing(message: &str) -> Self {
        Self::with(Script::AlwaysFail(message.to_string()))
    }

    pub fn hanging() -> Self {
        Self::with(Script::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ScoringRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScoringEngine for ScriptedScoring {
    async fn score(&self, request: ScoringRequest) -> anyhow::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        match &self.script {
            Script::FailThenSucceed(failures, result) if call >= *failures => Ok(result.clone()),
            Script::FailThenSucceed(..) => anyhow::bail!("scoring engine unavailable (call {})", call + 1),
            Script::AlwaysFail(message) => anyhow::bail!("{}", message),
            Script::Hang => std::future::pending().await,
        }
    }
}

/// A transcript that passes every validation step with the default rules.
pub fn sufficient_transcript() -> String {
    [
        "interviewer: Thanks for joining. Could you walk me through your current role?",
        "candidate: I own the ingestion pipeline at a logistics company, roughly forty services written in Rust and Go.",
        "interviewer: What was the hardest production incident you handled there?",
        "candidate: A partition rebalancing storm in Kafka that doubled our latency; we fixed it by pinning consumer assignments.",
        "interviewer: How do you decide when to split a service?",
        "candidate: When two teams keep blocking each other on deploys, or when the scaling profile of one path diverges sharply.",
    ]
    .join("\n")
}

/// Insert a pending session with `transcript` and return its id.
pub async fn seed_session(store: &InMemorySessionStore, transcript: &str) -> Uuid {
    let mut session = InterviewSession::new(None, None, SessionMetadata::default());
    session.transcript = transcript.to_string();
    let id = session.id;
    store.insert_session(session).await.unwrap();
    id
}
