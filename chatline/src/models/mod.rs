//! Data models for chat sessions.

mod message;
mod status;

pub use message::{Message, Sender};
pub use status::SessionStatus;
