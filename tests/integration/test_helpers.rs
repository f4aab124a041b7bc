//! Shared test helpers for endpoint-level integration tests.
//!
//! Provides an in-memory fake host implementing every collaborator trait,
//! endpoint construction in a temporary control directory, and a raw
//! line-level client so individual test modules can focus on behaviour.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use interprocess::local_socket::tokio::prelude::*;
use session_control::config::ControlConfig;
use session_control::host::{
    DeliveryMode, HostFuture, HostServices, MessageSender, ModelRegistry, SessionContext,
    TextCompleter,
};
use session_control::ipc::address;
use session_control::ipc::client::connect;
use session_control::ipc::codec::{LineReader, MAX_LINE_BYTES};
use session_control::ipc::protocol::{Response, ServerMessage};
use session_control::ipc::server::ControlEndpoint;
use session_control::models::history::{AgentMessage, ContentPart, HistoryEntry};
use session_control::models::message::{
    Completion, CompletionRequest, ModelInfo, StopReason,
};
use session_control::{AppError, Result};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};

/// Mutable state behind [`FakeSession`].
#[derive(Debug, Default)]
pub struct SessionState {
    pub entries: Vec<HistoryEntry>,
    pub leaf: Option<String>,
    pub busy: bool,
    pub aborts: usize,
    pub rewinds: Vec<String>,
    pub model: Option<ModelInfo>,
    pub rewind_error: Option<String>,
}

/// In-memory session with a linear history.
#[derive(Debug)]
pub struct FakeSession {
    id: String,
    pub state: Mutex<SessionState>,
}

impl FakeSession {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            state: Mutex::new(SessionState {
                model: Some(ModelInfo::new("anthropic", "claude-sonnet")),
                ..SessionState::default()
            }),
        })
    }

    /// Session with a root marker, one prompt, and one reply.
    pub fn with_conversation(id: &str, prompt: &str, reply: &str) -> Arc<Self> {
        let session = Self::new(id);
        session.push(HistoryEntry::marker("root", None, "session"));
        session.push(HistoryEntry::message("u1", Some("root"), AgentMessage::user(prompt, 10)));
        session.push(HistoryEntry::message(
            "a1",
            Some("u1"),
            AgentMessage::assistant(reply, 20),
        ));
        session
    }

    pub fn push(&self, entry: HistoryEntry) {
        let mut state = self.state.lock().unwrap();
        state.leaf = Some(entry.id.clone());
        state.entries.push(entry);
    }

    pub fn set_busy(&self, busy: bool) {
        self.state.lock().unwrap().busy = busy;
    }

    pub fn aborts(&self) -> usize {
        self.state.lock().unwrap().aborts
    }

    pub fn rewinds(&self) -> Vec<String> {
        self.state.lock().unwrap().rewinds.clone()
    }
}

impl SessionContext for FakeSession {
    fn session_id(&self) -> String {
        self.id.clone()
    }

    fn branch(&self) -> Vec<HistoryEntry> {
        let state = self.state.lock().unwrap();
        let Some(ref leaf) = state.leaf else {
            return Vec::new();
        };
        let end = state
            .entries
            .iter()
            .position(|entry| &entry.id == leaf)
            .map_or(0, |idx| idx + 1);
        state.entries[..end].to_vec()
    }

    fn entries(&self) -> Vec<HistoryEntry> {
        self.state.lock().unwrap().entries.clone()
    }

    fn leaf_id(&self) -> Option<String> {
        self.state.lock().unwrap().leaf.clone()
    }

    fn is_idle(&self) -> bool {
        !self.state.lock().unwrap().busy
    }

    fn abort(&self) {
        self.state.lock().unwrap().aborts += 1;
    }

    fn current_model(&self) -> Option<ModelInfo> {
        self.state.lock().unwrap().model.clone()
    }

    fn rewind_to<'a>(&'a self, entry_id: &'a str) -> HostFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(ref err) = state.rewind_error {
                return Err(AppError::Host(err.clone()));
            }
            state.rewinds.push(entry_id.to_owned());
            state.leaf = Some(entry_id.to_owned());
            Ok(())
        })
    }
}

/// Records delivered messages.
#[derive(Debug, Default)]
pub struct FakeSender {
    pub sent: Mutex<Vec<(String, DeliveryMode)>>,
}

impl FakeSender {
    pub fn sent(&self) -> Vec<(String, DeliveryMode)> {
        self.sent.lock().unwrap().clone()
    }
}

impl MessageSender for FakeSender {
    fn send_user_message(&self, text: &str, delivery: DeliveryMode) -> Result<()> {
        self.sent.lock().unwrap().push((text.to_owned(), delivery));
        Ok(())
    }
}

/// Registry with a fixed model list and per-model credentials.
#[derive(Debug, Default)]
pub struct FakeModels {
    pub models: Vec<ModelInfo>,
    pub keys: HashMap<String, String>,
}

impl ModelRegistry for FakeModels {
    fn find(&self, provider: &str, model_id: &str) -> Option<ModelInfo> {
        self.models
            .iter()
            .find(|model| model.provider == provider && model.id == model_id)
            .cloned()
    }

    fn api_key<'a>(&'a self, model: &'a ModelInfo) -> HostFuture<'a, Option<String>> {
        Box::pin(async move { self.keys.get(&model.id).cloned() })
    }
}

/// Completer answering with fixed text, optionally after a delay, and
/// recording requests.
#[derive(Debug)]
pub struct FakeCompleter {
    pub reply: String,
    pub stop_reason: StopReason,
    pub delay: Duration,
    pub requests: Mutex<Vec<(String, CompletionRequest)>>,
    pub finished: AtomicUsize,
}

impl FakeCompleter {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_owned(),
            stop_reason: StopReason::Normal,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn started(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl TextCompleter for FakeCompleter {
    fn complete<'a>(
        &'a self,
        model: &'a ModelInfo,
        request: CompletionRequest,
        _api_key: &'a str,
    ) -> HostFuture<'a, Result<Completion>> {
        Box::pin(async move {
            self.requests
                .lock()
                .unwrap()
                .push((model.id.clone(), request));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                content: vec![ContentPart::text(self.reply.clone())],
                stop_reason: self.stop_reason,
            })
        })
    }
}

/// Fake host collaborators with typed handles kept for assertions.
pub struct FakeHost {
    pub sender: Arc<FakeSender>,
    pub models: Arc<FakeModels>,
    pub completer: Arc<FakeCompleter>,
}

impl FakeHost {
    /// Host whose only usable summarization model is `claude-haiku-4-5`.
    pub fn new() -> Self {
        let haiku = ModelInfo::new("anthropic", "claude-haiku-4-5");
        let mut keys = HashMap::new();
        keys.insert(haiku.id.clone(), "test-key".to_owned());
        Self {
            sender: Arc::new(FakeSender::default()),
            models: Arc::new(FakeModels {
                models: vec![haiku],
                keys,
            }),
            completer: Arc::new(FakeCompleter::replying("Edited src/lib.rs; tests pass.")),
        }
    }

    /// Like [`FakeHost::new`], but every completion takes `delay`.
    pub fn with_slow_completer(delay: Duration) -> Self {
        let mut host = Self::new();
        let mut completer = FakeCompleter::replying("Edited src/lib.rs; tests pass.");
        completer.delay = delay;
        host.completer = Arc::new(completer);
        host
    }

    pub fn services(&self) -> HostServices {
        HostServices {
            sender: Arc::clone(&self.sender) as Arc<dyn MessageSender>,
            models: Arc::clone(&self.models) as Arc<dyn ModelRegistry>,
            completer: Arc::clone(&self.completer) as Arc<dyn TextCompleter>,
        }
    }
}

/// Config rooted at `dir` with short client timeouts.
pub fn test_config(dir: &Path) -> ControlConfig {
    let mut config = ControlConfig::with_control_dir(dir);
    config.session_env_var = "SESSION_CONTROL_TEST_ID".into();
    config.timeouts.request_seconds = 2;
    config.timeouts.summary_seconds = 2;
    config.timeouts.clear_seconds = 2;
    config.timeouts.turn_wait_seconds = 2;
    config
}

/// Bind an endpoint for `session` inside `dir`.
pub fn bind_endpoint(dir: &Path, session: Arc<FakeSession>, host: &FakeHost) -> ControlEndpoint {
    let address = address::socket_path(dir, &session.session_id()).expect("valid session id");
    ControlEndpoint::bind(address, session, host.services(), &test_config(dir))
        .expect("bind control endpoint")
}

/// Line-level client for asserting exact wire behaviour.
pub struct RawClient {
    reader: LineReader<ReadHalf<LocalSocketStream>>,
    writer: WriteHalf<LocalSocketStream>,
}

impl RawClient {
    pub async fn connect(address: &Path) -> Self {
        let stream = connect(address).await.expect("connect to endpoint");
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: LineReader::new(reader, MAX_LINE_BYTES),
            writer,
        }
    }

    pub async fn send_raw(&mut self, raw: &str) {
        self.send_bytes(raw.as_bytes()).await;
    }

    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write to endpoint");
    }

    pub async fn send_line(&mut self, line: &str) {
        self.send_raw(&format!("{line}\n")).await;
    }

    /// Next server message, failing the test after two seconds.
    pub async fn next(&mut self) -> ServerMessage {
        let line = tokio::time::timeout(Duration::from_secs(2), self.reader.next_line())
            .await
            .expect("server message before timeout")
            .expect("connection open")
            .expect("valid line");
        serde_json::from_str(&line).expect("server message json")
    }

    pub async fn next_response(&mut self) -> Response {
        match self.next().await {
            ServerMessage::Response(response) => response,
            ServerMessage::Event(event) => panic!("expected response, got {event:?}"),
        }
    }

    /// Assert nothing arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        let next = tokio::time::timeout(window, self.reader.next_line()).await;
        assert!(next.is_err(), "unexpected message: {next:?}");
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within two seconds"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
