//! Transport to the chat server.
//!
//! Two seams live here:
//! - [`StreamSource`] opens one SSE chat stream per query and hands back a
//!   [`StreamHandle`]. Events for every handle arrive on a single channel as
//!   [`StreamMessage`]s tagged with the handle's id.
//! - [`SessionApi`] covers the request/response endpoints: status, delete and
//!   starting a new session.
//!
//! [`HttpTransport`] implements both over reqwest.

mod http;
pub mod sse;

pub use http::HttpTransport;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ClientError;
use crate::models::SessionStatus;

/// Identifier of a chat stream, unique per [`StreamSource`].
pub type StreamId = u64;

/// Connection state of a chat stream, mirroring the browser's
/// `EventSource.readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Request in flight, or dropped in a way a browser would retry.
    Connecting,
    /// Response accepted, events flowing.
    Open,
    /// Failed permanently or closed by the client.
    Closed,
}

impl ReadyState {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closed => 2,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Lifecycle and data events of one chat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The server accepted the stream.
    Opened,
    /// One `message` event payload.
    Message(String),
    /// The stream stopped; carries the state it stopped in.
    Error(ReadyState),
}

/// A [`StreamEvent`] tagged with the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub stream: StreamId,
    pub event: StreamEvent,
}

/// A live chat stream. Closing it releases the connection; no events are
/// delivered for it afterwards.
pub trait StreamHandle: Send {
    fn id(&self) -> StreamId;
    fn ready_state(&self) -> ReadyState;
    fn close(&mut self);
}

/// Opens chat streams.
pub trait StreamSource {
    type Handle: StreamHandle;

    /// Start streaming the reply to `query` within session `thread_id`.
    fn open(&self, thread_id: &str, query: &str) -> Self::Handle;
}

impl<T: StreamSource + ?Sized> StreamSource for Arc<T> {
    type Handle = T::Handle;

    fn open(&self, thread_id: &str, query: &str) -> Self::Handle {
        (**self).open(thread_id, query)
    }
}

/// Request/response endpoints of the chat server.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// `GET /session-status/<id>`.
    async fn session_status(&self, thread_id: &str) -> Result<SessionStatus, ClientError>;

    /// `DELETE /session/<id>`.
    async fn delete_session(&self, thread_id: &str) -> Result<(), ClientError>;

    /// `GET /`: have the server create a session and return its thread id.
    async fn start_session(&self) -> Result<String, ClientError>;
}

/// Path and query of the chat stream for `query` in session `thread_id`.
pub fn chat_path(thread_id: &str, query: &str) -> String {
    format!(
        "/chat?thread_id={}&query={}",
        urlencoding::encode(thread_id),
        urlencoding::encode(query)
    )
}
