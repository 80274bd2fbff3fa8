//! Conversation core for lua.ia: the message store, the streaming
//! reconciler, per-mode persistence, and the controller that ties them to
//! the model gateway.

pub mod controller;
pub mod conversation;
pub mod gateway;
pub mod ingest;
pub mod persistence;
pub mod prompts;
pub mod reconciler;

pub use controller::{ChatController, ChatError};
pub use conversation::Conversation;
