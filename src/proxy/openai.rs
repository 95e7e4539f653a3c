use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use tracing::{debug, error, warn};

use crate::config::UpstreamConfig;
use crate::error::{AppError, UpstreamError};
use crate::proxy::sse::{SseEvent, SseLineBuffer};
use crate::proxy::{
    http_client, ChatMessage, ChunkCallback, Completion, CompletionOptions, StreamSummary, TokenUsage, UpstreamChatClient,
};

/// Client for vendors speaking the OpenAI `chat/completions` protocol (OpenAI, DeepSeek).
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    provider: &'static str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    enable_thinking: bool,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str, provider: &'static str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            provider,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, AppError> {
        Ok(Self::new(
            http_client(config)?,
            config.base_url(),
            &config.api_key,
            config.provider.name(),
        ))
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
        stream: bool,
    ) -> Result<reqwest::Response, UpstreamError> {
        let body = CompletionRequest {
            model,
            messages,
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
            enable_thinking: options.enable_thinking,
        };

        let mut request = self.client.post(self.endpoint()).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!("Failed to reach {}: {}", self.provider, e);
            UpstreamError::from_send(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{} returned {}: {}", self.provider, status, body);
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    /// Apply one `data:` payload. Malformed frames are logged and skipped.
    fn apply_frame(
        &self,
        payload: &str,
        usage: &mut Option<TokenUsage>,
        on_chunk: &mut (dyn FnMut(&str) -> bool + Send),
    ) -> ControlFlow<()> {
        let frame: StreamFrame = match serde_json::from_str(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping malformed {} frame: {}", self.provider, e);
                return ControlFlow::Continue(());
            }
        };

        if frame.usage.is_some() {
            *usage = frame.usage;
        }

        let content = frame
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .unwrap_or_default();

        if !content.is_empty() && !on_chunk(&content) {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

#[async_trait]
impl UpstreamChatClient for OpenAiCompatibleClient {
    fn provider(&self) -> &'static str {
        self.provider
    }

    async fn complete_buffered(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<Completion, UpstreamError> {
        debug!("Buffered completion on {} with {} messages", model, messages.len());
        let response = self.send(model, messages, options, false).await?;

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::StreamRead(e.to_string()))?;

        let parsed: CompletionResponse =
            serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::Decode("response contained no choices".to_string()))?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            usage: parsed.usage,
        })
    }

    async fn complete_streamed(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<StreamSummary, UpstreamError> {
        debug!("Streamed completion on {} with {} messages", model, messages.len());
        let response = self.send(model, messages, options, true).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();
        let mut summary = StreamSummary::default();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| {
                error!("{} stream interrupted: {}", self.provider, e);
                UpstreamError::StreamRead(e.to_string())
            })?;

            for event in buffer.feed(&bytes) {
                match event {
                    SseEvent::Done => return Ok(summary),
                    SseEvent::Data(payload) => {
                        if self.apply_frame(&payload, &mut summary.usage, on_chunk).is_break() {
                            summary.stopped_early = true;
                            return Ok(summary);
                        }
                    }
                }
            }
        }

        for event in buffer.flush() {
            if let SseEvent::Data(payload) = event {
                if self.apply_frame(&payload, &mut summary.usage, on_chunk).is_break() {
                    summary.stopped_early = true;
                }
            }
        }

        Ok(summary)
    }
}
