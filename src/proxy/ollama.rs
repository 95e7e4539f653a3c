use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::UpstreamConfig;
use crate::error::{AppError, UpstreamError};
use crate::proxy::sse::LineBuffer;
use crate::proxy::{
    http_client, ChatMessage, ChunkCallback, Completion, CompletionOptions, StreamSummary, TokenUsage, UpstreamChatClient,
};

/// Client for a local Ollama daemon (`/api/chat`, newline-delimited JSON when streaming).
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    think: bool,
}

#[derive(Deserialize)]
struct OllamaFrame {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaFrame {
    fn usage(&self) -> Option<TokenUsage> {
        match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (prompt, completion) => Some(TokenUsage::new(prompt.unwrap_or(0), completion.unwrap_or(0))),
        }
    }

    fn content(&self) -> &str {
        self.message.as_ref().map(|m| m.content.as_str()).unwrap_or("")
    }
}

enum LineOutcome {
    Continue,
    Finished,
    Stopped,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, AppError> {
        Ok(Self::new(http_client(config)?, config.base_url()))
    }

    async fn send(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
        stream: bool,
    ) -> Result<reqwest::Response, UpstreamError> {
        let body = OllamaRequest {
            model,
            messages,
            stream,
            think: options.enable_thinking,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to reach ollama at {}: {}", self.base_url, e);
                UpstreamError::from_send(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("ollama returned {}: {}", status, body);
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn apply_line(
        line: &str,
        summary: &mut StreamSummary,
        on_chunk: &mut (dyn FnMut(&str) -> bool + Send),
    ) -> LineOutcome {
        if line.trim().is_empty() {
            return LineOutcome::Continue;
        }

        let frame: OllamaFrame = match serde_json::from_str(line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping malformed ollama line: {}", e);
                return LineOutcome::Continue;
            }
        };

        if let Some(usage) = frame.usage() {
            summary.usage = Some(usage);
        }

        let content = frame.content();
        if !content.is_empty() && !on_chunk(content) {
            return LineOutcome::Stopped;
        }

        if frame.done {
            LineOutcome::Finished
        } else {
            LineOutcome::Continue
        }
    }
}

#[async_trait]
impl UpstreamChatClient for OllamaClient {
    fn provider(&self) -> &'static str {
        "ollama"
    }

    async fn complete_buffered(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<Completion, UpstreamError> {
        debug!("Buffered ollama completion on {}", model);
        let response = self.send(model, messages, options, false).await?;

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::StreamRead(e.to_string()))?;
        let frame: OllamaFrame = serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))?;

        if frame.message.is_none() {
            return Err(UpstreamError::Decode("response contained no message".to_string()));
        }

        Ok(Completion {
            content: frame.content().to_string(),
            usage: frame.usage(),
        })
    }

    async fn complete_streamed(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<StreamSummary, UpstreamError> {
        debug!("Streamed ollama completion on {}", model);
        let response = self.send(model, messages, options, true).await?;

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut summary = StreamSummary::default();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| UpstreamError::StreamRead(e.to_string()))?;

            for line in lines.push(&bytes) {
                match Self::apply_line(&line, &mut summary, on_chunk) {
                    LineOutcome::Continue => {}
                    LineOutcome::Finished => return Ok(summary),
                    LineOutcome::Stopped => {
                        summary.stopped_early = true;
                        return Ok(summary);
                    }
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let LineOutcome::Stopped = Self::apply_line(&line, &mut summary, on_chunk) {
                summary.stopped_early = true;
            }
        }
        Ok(summary)
    }
}
