//! Upstream model proxy for the parley server
//!
//! One client per vendor protocol behind the `UpstreamChatClient` trait. The
//! vendor is picked once at startup from `upstream.provider`.

pub mod ollama;
pub mod openai;
pub mod sse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::{Provider, UpstreamConfig};
use crate::db::{Message, Role};
use crate::error::{AppError, UpstreamError};

pub use ollama::OllamaClient;
pub use openai::OpenAiCompatibleClient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.role, message.content.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Rough count for vendors that report nothing: one token per four characters.
    pub fn estimate(prompt: &[ChatMessage], completion: &str) -> Self {
        let prompt_chars: usize = prompt.iter().map(|m| m.content.chars().count()).sum();
        Self::new(
            estimate_tokens(prompt_chars),
            estimate_tokens(completion.chars().count()),
        )
    }
}

fn estimate_tokens(chars: usize) -> u32 {
    u32::try_from((chars + 3) / 4).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub usage: Option<TokenUsage>,
    /// The chunk callback asked to stop before the vendor finished.
    pub stopped_early: bool,
}

/// Per-request switches forwarded to the vendor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionOptions {
    /// Ask reasoning models to think before answering.
    pub enable_thinking: bool,
}

impl CompletionOptions {
    pub fn thinking(enable_thinking: bool) -> Self {
        Self { enable_thinking }
    }
}

/// Callback fed each non-empty content delta. Returning `false` ends the stream.
pub type ChunkCallback<'a> = &'a mut (dyn FnMut(&str) -> bool + Send);

#[async_trait]
pub trait UpstreamChatClient: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn complete_buffered(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<Completion, UpstreamError>;

    async fn complete_streamed(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<StreamSummary, UpstreamError>;
}

pub(crate) fn http_client(config: &UpstreamConfig) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .connect_timeout(config.connect_timeout())
        .build()
        .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Build the client for the configured vendor.
pub fn build_client(config: &UpstreamConfig) -> Result<Arc<dyn UpstreamChatClient>, AppError> {
    let client: Arc<dyn UpstreamChatClient> = match config.provider {
        Provider::OpenAi | Provider::DeepSeek => Arc::new(OpenAiCompatibleClient::from_config(config)?),
        Provider::Ollama => Arc::new(OllamaClient::from_config(config)?),
    };
    info!("Upstream provider {} at {}", config.provider.name(), config.base_url());
    Ok(client)
}
