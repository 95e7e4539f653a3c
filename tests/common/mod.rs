#![allow(dead_code)]

use async_trait::async_trait;
use parley_server::config::ChatConfig;
use parley_server::db::{Tier, User};
use parley_server::error::UpstreamError;
use parley_server::proxy::{ChatMessage, ChunkCallback, Completion, CompletionOptions, StreamSummary, TokenUsage};
use parley_server::{
    AppState, ChatEvent, ChatOrchestrator, ChatTurn, DbOperations, ModelCatalog, Settings, UpstreamChatClient,
    UserStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const FREE_MODEL: &str = "gpt-4o-mini";
pub const PRO_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    None,
    /// Refuse before any chunk is produced.
    Connect,
    /// Drop the stream after this many chunks.
    AfterChunks(usize),
}

/// Upstream double that replays a fixed script and records every prompt it receives.
///
/// Buffered calls are answered by prompt: title requests get `title_reply`,
/// classification requests get `classify_reply`, anything else gets `reply`.
pub struct ScriptedUpstream {
    chunks: Vec<String>,
    chunk_delay: Duration,
    failure: Failure,
    usage: Option<TokenUsage>,
    reply: String,
    title_reply: String,
    title_delay: Duration,
    classify_reply: String,
    streamed_calls: AtomicUsize,
    buffered_calls: AtomicUsize,
    prompts: Mutex<Vec<(Vec<ChatMessage>, CompletionOptions)>>,
}

impl ScriptedUpstream {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            chunk_delay: Duration::ZERO,
            failure: Failure::None,
            usage: None,
            reply: chunks.concat(),
            title_reply: "Scripted title".to_string(),
            title_delay: Duration::ZERO,
            classify_reply: String::new(),
            streamed_calls: AtomicUsize::new(0),
            buffered_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.failure = failure;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_title(mut self, title: &str, delay: Duration) -> Self {
        self.title_reply = title.to_string();
        self.title_delay = delay;
        self
    }

    pub fn with_classification(mut self, reply: &str) -> Self {
        self.classify_reply = reply.to_string();
        self
    }

    pub fn streamed_calls(&self) -> usize {
        self.streamed_calls.load(Ordering::SeqCst)
    }

    pub fn buffered_calls(&self) -> usize {
        self.buffered_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.streamed_calls() + self.buffered_calls()
    }

    /// Prompts of the chat turns, excluding title and classification requests.
    pub fn chat_prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.chat_requests().into_iter().map(|(prompt, _)| prompt).collect()
    }

    /// Options the chat turns were sent with.
    pub fn chat_options(&self) -> Vec<CompletionOptions> {
        self.chat_requests().into_iter().map(|(_, options)| options).collect()
    }

    /// Number of title requests received so far.
    pub fn title_requests(&self) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(prompt, _)| is_title_request(prompt))
            .count()
    }

    fn chat_requests(&self) -> Vec<(Vec<ChatMessage>, CompletionOptions)> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(prompt, _)| !is_title_request(prompt) && !is_classify_request(prompt))
            .cloned()
            .collect()
    }

    fn record(&self, messages: &[ChatMessage], options: CompletionOptions) {
        self.prompts.lock().unwrap().push((messages.to_vec(), options));
    }
}

fn is_title_request(messages: &[ChatMessage]) -> bool {
    messages
        .first()
        .map(|m| m.content.contains("conversation titles"))
        .unwrap_or(false)
}

fn is_classify_request(messages: &[ChatMessage]) -> bool {
    messages
        .first()
        .map(|m| m.content.contains("sort conversations into categories"))
        .unwrap_or(false)
}

#[async_trait]
impl UpstreamChatClient for ScriptedUpstream {
    fn provider(&self) -> &'static str {
        "scripted"
    }

    async fn complete_buffered(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<Completion, UpstreamError> {
        self.buffered_calls.fetch_add(1, Ordering::SeqCst);
        self.record(messages, options);

        if self.failure == Failure::Connect {
            return Err(UpstreamError::Connection("connection refused".to_string()));
        }

        let content = if is_title_request(messages) {
            tokio::time::sleep(self.title_delay).await;
            self.title_reply.clone()
        } else if is_classify_request(messages) {
            self.classify_reply.clone()
        } else {
            self.reply.clone()
        };

        Ok(Completion {
            content,
            usage: self.usage,
        })
    }

    async fn complete_streamed(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<StreamSummary, UpstreamError> {
        self.streamed_calls.fetch_add(1, Ordering::SeqCst);
        self.record(messages, options);

        if self.failure == Failure::Connect {
            return Err(UpstreamError::Connection("connection refused".to_string()));
        }

        for (sent, chunk) in self.chunks.iter().enumerate() {
            if self.failure == Failure::AfterChunks(sent) {
                return Err(UpstreamError::StreamRead("connection reset".to_string()));
            }
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            if !on_chunk(chunk) {
                return Ok(StreamSummary {
                    usage: None,
                    stopped_early: true,
                });
            }
        }

        Ok(StreamSummary {
            usage: self.usage,
            stopped_early: false,
        })
    }
}

pub fn test_settings() -> Settings {
    Settings::new_for_test().expect("Failed to load test settings")
}

pub fn chat_config() -> ChatConfig {
    test_settings().chat
}

pub async fn test_db() -> Arc<DbOperations> {
    Arc::new(DbOperations::in_memory().await.expect("Failed to open in-memory database"))
}

pub fn orchestrator(db: &Arc<DbOperations>, upstream: Arc<ScriptedUpstream>, config: ChatConfig) -> ChatOrchestrator {
    ChatOrchestrator::new(
        db.clone(),
        db.clone(),
        upstream,
        ModelCatalog::new(test_settings().models),
        config,
    )
}

pub async fn test_user(db: &DbOperations, tier: Tier) -> User {
    let id = Uuid::new_v4();
    db.ensure_user(id, &format!("{}@example.com", &id.to_string()[..8]))
        .await
        .unwrap();
    if tier != Tier::Free {
        db.set_tier(id, tier).await.unwrap();
    }
    db.get_user(id).await.unwrap()
}

pub async fn test_state(upstream: Arc<ScriptedUpstream>) -> AppState {
    AppState::with_parts(test_settings(), test_db().await, upstream)
}

pub fn token_for(state: &AppState, user_id: Uuid, email: &str) -> String {
    state
        .tokens
        .generate_token(user_id, email, chrono::Duration::hours(1))
        .expect("Failed to sign token")
}

/// What a caller saw of one turn.
#[derive(Debug, Default)]
pub struct Drained {
    pub chunks: Vec<String>,
    pub done: Option<(i64, Option<i64>, TokenUsage)>,
    pub error: Option<String>,
}

impl Drained {
    pub fn text(&self) -> String {
        self.chunks.concat()
    }
}

pub async fn drain(turn: ChatTurn) -> Drained {
    let ChatTurn { mut events, task, .. } = turn;
    let mut drained = Drained::default();

    while let Some(event) = events.recv().await {
        match event {
            ChatEvent::Chunk(text) => drained.chunks.push(text),
            ChatEvent::Done {
                conversation_id,
                message_id,
                usage,
            } => drained.done = Some((conversation_id, message_id, usage)),
            ChatEvent::Failed(e) => drained.error = Some(e.to_string()),
        }
    }

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("turn task did not finish")
        .expect("turn task panicked");
    drained
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..40 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
