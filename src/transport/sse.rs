use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use actix_web::web::Bytes;
use actix_web::HttpResponse;
use futures::stream;
use serde_json::json;

use crate::chat::{ChatEvent, ChatTurn};
use crate::error::AppError;
use crate::proxy::TokenUsage;

/// One chunk, JSON-encoded so embedded newlines cannot break the framing.
pub fn chunk_frame(text: &str) -> String {
    format!("data: {}\n\n", serde_json::Value::String(text.to_string()))
}

pub fn done_frames(conversation_id: i64, message_id: Option<i64>, usage: &TokenUsage) -> String {
    let payload = json!({
        "conversation_id": conversation_id,
        "message_id": message_id,
        "usage": usage,
    });
    format!("event: done\ndata: {}\n\ndata: [DONE]\n\n", payload)
}

pub fn error_frame(error: &AppError) -> String {
    format!("data: {}\n\n", json!({ "error": error.client_message() }))
}

/// Relay a turn as `text/event-stream`. Dropping the body (client gone) cancels the turn.
pub fn sse_response(turn: ChatTurn) -> HttpResponse {
    let conversation_id = turn.conversation_id;

    let body = stream::unfold(Some(turn.events), |events| async move {
        let mut events = events?;
        let (frame, next) = match events.recv().await? {
            ChatEvent::Chunk(text) => (chunk_frame(&text), Some(events)),
            ChatEvent::Done {
                conversation_id,
                message_id,
                usage,
            } => (done_frames(conversation_id, message_id, &usage), None),
            ChatEvent::Failed(e) => (error_frame(&e), None),
        };
        Some((Ok::<_, actix_web::Error>(Bytes::from(frame)), next))
    });

    HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .insert_header(("X-Conversation-Id", conversation_id.to_string()))
        .streaming(body)
}
