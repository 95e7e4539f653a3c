//! Chat module for the parley server
//!
//! Turn orchestration, the model catalog, and the HTTP endpoints for
//! conversations, the recycle bin and categories.

pub mod background;
pub mod catalog;
pub mod handlers;
pub mod locks;
pub mod orchestrator;

pub use catalog::ModelCatalog;
pub use locks::TurnLocks;
pub use orchestrator::{ChatEvent, ChatOrchestrator, ChatRequest, ChatTurn, ResponseMode};
