//! Message model for the chat transcript.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Who a transcript line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Typed by the user.
    User,
    /// Streamed from the server, or written by the client on its behalf.
    Bot,
}

/// One line of the transcript. Messages are only ever appended.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    /// When the message entered the transcript.
    pub at: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Sender::Bot, text)
    }
}
