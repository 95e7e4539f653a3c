//! Transport adapters: how a running chat turn reaches the client.
//!
//! WebSocket delivery lives with the session actor in `websocket`.

pub mod buffered;
pub mod sse;

pub use buffered::{collect_reply, BufferedReply};
pub use sse::sse_response;
