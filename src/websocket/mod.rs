//! WebSocket module for the parley server
//!
//! Chat sessions on `/ws`, the public room on `/ws/room`, and the registry
//! both share.

pub mod messages;
pub mod registry;
pub mod room;
pub mod session;

pub use messages::{ClientFrame, Outbound, RoomMessage, RoomMessageKind, ServerFrame};
pub use registry::{Channel, ConnectionRegistry};
pub use room::{room_route, ChatRoom};
pub use session::{chat_route, ChatSession};
