use serde::Serialize;

use crate::chat::{ChatEvent, ChatTurn};
use crate::error::AppError;
use crate::proxy::TokenUsage;

#[derive(Debug, Serialize)]
pub struct BufferedReply {
    pub conversation_id: i64,
    pub message_id: Option<i64>,
    pub reply: String,
    pub usage: TokenUsage,
}

/// Drain a turn into a single reply once it has finished.
pub async fn collect_reply(mut turn: ChatTurn) -> Result<BufferedReply, AppError> {
    let mut reply = String::new();

    while let Some(event) = turn.events.recv().await {
        match event {
            ChatEvent::Chunk(text) => reply.push_str(&text),
            ChatEvent::Done {
                conversation_id,
                message_id,
                usage,
            } => {
                return Ok(BufferedReply {
                    conversation_id,
                    message_id,
                    reply,
                    usage,
                })
            }
            ChatEvent::Failed(e) => return Err(e),
        }
    }

    Err(AppError::Internal(format!(
        "turn on conversation {} ended without a result",
        turn.conversation_id
    )))
}
