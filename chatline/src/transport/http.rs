//! reqwest-backed transport.
//!
//! Each chat stream runs in its own task that decodes the response body and
//! forwards events to the shared channel handed out by [`HttpTransport::new`].
//! Closing or dropping the handle aborts that task.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::sse::SseDecoder;
use super::{
    chat_path, ReadyState, SessionApi, StreamEvent, StreamHandle, StreamId, StreamMessage,
    StreamSource,
};
use crate::error::ClientError;
use crate::models::SessionStatus;

/// Where the new-session page carries its thread id: the
/// `data-thread-id` attribute, an inline `threadId = "..."`, or a JSON field.
static THREAD_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:data-thread-id|threadId|"thread_id")\s*[=:]\s*"([^"{}\s]+)""#)
        .expect("thread id pattern compiles")
});

/// Pull the session's thread id out of the page served at `/`.
pub fn extract_thread_id(page: &str) -> Option<String> {
    THREAD_ID
        .captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// HTTP client for one chat server.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
    next_stream_id: AtomicU64,
    events: mpsc::UnboundedSender<StreamMessage>,
}

impl HttpTransport {
    /// Create a transport and the receiver all chat stream events arrive on.
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<StreamMessage>), ClientError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(ClientError::Client)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let transport = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            request_timeout,
            next_stream_id: AtomicU64::new(1),
            events: tx,
        };
        Ok((transport, rx))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Response, ClientError> {
        request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                url: url.to_string(),
                source,
            })
    }
}

impl StreamSource for HttpTransport {
    type Handle = HttpStream;

    fn open(&self, thread_id: &str, query: &str) -> HttpStream {
        let id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let url = self.url(&chat_path(thread_id, query));
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting.as_u8()));

        debug!(stream = id, %url, "opening chat stream");
        let task = tokio::spawn(read_stream(
            self.client.clone(),
            url,
            id,
            Arc::clone(&state),
            self.events.clone(),
        ));

        HttpStream {
            id,
            state,
            task: Some(task),
        }
    }
}

#[async_trait]
impl SessionApi for HttpTransport {
    async fn session_status(&self, thread_id: &str) -> Result<SessionStatus, ClientError> {
        let url = self.url(&format!(
            "/session-status/{}",
            urlencoding::encode(thread_id)
        ));
        let resp = self.send(self.client.get(&url), &url).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(thread_id, "server no longer knows this session");
            return Ok(SessionStatus::gone());
        }
        if !resp.status().is_success() {
            return Err(ClientError::Status {
                url,
                status: resp.status(),
            });
        }

        resp.json()
            .await
            .map_err(|source| ClientError::Decode { url, source })
    }

    async fn delete_session(&self, thread_id: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("/session/{}", urlencoding::encode(thread_id)));
        let resp = self.send(self.client.delete(&url), &url).await?;

        if !resp.status().is_success() {
            return Err(ClientError::Status {
                url,
                status: resp.status(),
            });
        }
        Ok(())
    }

    async fn start_session(&self) -> Result<String, ClientError> {
        let url = self.url("/");
        let resp = self.send(self.client.get(&url), &url).await?;

        if !resp.status().is_success() {
            return Err(ClientError::Status {
                url,
                status: resp.status(),
            });
        }

        let page = resp
            .text()
            .await
            .map_err(|source| ClientError::Decode {
                url: url.clone(),
                source,
            })?;
        extract_thread_id(&page).ok_or(ClientError::MissingThreadId { url })
    }
}

/// Handle to a chat stream opened by [`HttpTransport`].
#[derive(Debug)]
pub struct HttpStream {
    id: StreamId,
    state: Arc<AtomicU8>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle for HttpStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(stream = self.id, "closed chat stream");
        }
        self.state
            .store(ReadyState::Closed.as_u8(), Ordering::SeqCst);
    }
}

impl Drop for HttpStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_event_stream(resp: &Response) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("text/event-stream"))
}

/// Body of a stream task: request, decode, forward, then report how it ended.
async fn read_stream(
    client: reqwest::Client,
    url: String,
    id: StreamId,
    state: Arc<AtomicU8>,
    events: mpsc::UnboundedSender<StreamMessage>,
) {
    let emit = |event: StreamEvent| {
        events
            .send(StreamMessage { stream: id, event })
            .is_ok()
    };
    let set_state = |s: ReadyState| state.store(s.as_u8(), Ordering::SeqCst);

    let resp = match client
        .get(&url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            warn!(stream = id, error = %e, "chat stream request failed");
            set_state(ReadyState::Connecting);
            emit(StreamEvent::Error(ReadyState::Connecting));
            return;
        }
    };

    if !resp.status().is_success() || !is_event_stream(&resp) {
        warn!(stream = id, status = %resp.status(), "chat stream refused by server");
        set_state(ReadyState::Closed);
        emit(StreamEvent::Error(ReadyState::Closed));
        return;
    }

    set_state(ReadyState::Open);
    if !emit(StreamEvent::Opened) {
        return;
    }

    let mut decoder = SseDecoder::new();
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for event in decoder.feed(&bytes) {
                    if !event.is_message() {
                        debug!(stream = id, event = ?event.event, "skipping named event");
                        continue;
                    }
                    if let Some(event_id) = event.id.as_deref() {
                        debug!(stream = id, event_id, "chat stream event");
                    }
                    if !emit(StreamEvent::Message(event.data)) {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!(stream = id, error = %e, "chat stream interrupted");
                break;
            }
        }
    }

    debug!(stream = id, "chat stream ended");
    set_state(ReadyState::Connecting);
    emit(StreamEvent::Error(ReadyState::Connecting));
}
