//! Session/stream lifecycle controller.
//!
//! One controller exists per session view. It owns the session-active flag,
//! the single tracked chat stream, the transcript and the input affordances,
//! and exposes one handler per thing that can happen to a session: a query is
//! submitted, the stream opens, delivers a payload or fails, the re-enable
//! timer fires, a status check comes back, or the view is torn down.
//!
//! Invariants:
//! - at most one stream handle is tracked, and it is closed before another
//!   is opened or when the controller goes away;
//! - once the session is inactive no stream is opened and input is disabled.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{Config, MessageTexts};
use crate::models::{Message, SessionStatus};
use crate::transport::{ReadyState, StreamEvent, StreamHandle, StreamId, StreamMessage, StreamSource};

/// Values the controller needs from configuration.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub sentinel: String,
    pub reenable_delay: Duration,
    pub texts: MessageTexts,
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            sentinel: config.termination_sentinel.clone(),
            reenable_delay: config.reenable_delay(),
            texts: config.messages.clone(),
        }
    }
}

/// Enablement of the input affordances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiState {
    /// Whether a typed line may be sent.
    pub send_enabled: bool,
    /// Whether the prompt accepts chat input at all.
    pub input_enabled: bool,
    /// Shown in place of the prompt while input is disabled.
    pub placeholder: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            send_enabled: true,
            input_enabled: true,
            placeholder: None,
        }
    }
}

/// What [`SessionStreamController::submit_query`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank input; nothing happened.
    Ignored,
    /// Session already ended; a notice was appended instead.
    SessionEnded,
    /// A stream was opened.
    Opened(StreamId),
}

/// Follow-up owed after a stream error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum AfterError {
    Nothing,
    /// The transport failed permanently; ask the server whether the session
    /// still exists.
    CheckStatus,
}

pub struct SessionStreamController<S: StreamSource> {
    thread_id: String,
    source: S,
    settings: ControllerSettings,
    active: bool,
    current: Option<S::Handle>,
    messages: Vec<Message>,
    ui: UiState,
    reenable_at: Option<Instant>,
}

impl<S: StreamSource> SessionStreamController<S> {
    pub fn new(thread_id: impl Into<String>, source: S, settings: ControllerSettings) -> Self {
        let mut controller = Self {
            thread_id: thread_id.into(),
            source,
            settings,
            active: true,
            current: None,
            messages: Vec::new(),
            ui: UiState::default(),
            reenable_at: None,
        };
        if !controller.settings.texts.welcome.is_empty() {
            let welcome = controller.settings.texts.welcome.clone();
            controller.messages.push(Message::bot(welcome));
        }
        controller
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }

    pub const fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Id of the tracked stream, if one is open.
    pub fn current_stream(&self) -> Option<StreamId> {
        self.current.as_ref().map(StreamHandle::id)
    }

    /// When the send gate is due to reopen.
    pub const fn reenable_deadline(&self) -> Option<Instant> {
        self.reenable_at
    }

    /// Submit a line typed by the user.
    pub fn submit_query(&mut self, text: &str) -> SubmitOutcome {
        let query = text.trim();
        if query.is_empty() {
            return SubmitOutcome::Ignored;
        }

        if !self.active {
            let notice = self.settings.texts.submit_after_end.clone();
            self.messages.push(Message::bot(notice));
            return SubmitOutcome::SessionEnded;
        }

        self.messages.push(Message::user(query));
        self.close_stream();

        let handle = self.source.open(&self.thread_id, query);
        let id = handle.id();
        self.current = Some(handle);

        self.ui.send_enabled = false;
        self.reenable_at = Some(Instant::now() + self.settings.reenable_delay);

        debug!(thread_id = %self.thread_id, stream = id, "query submitted");
        SubmitOutcome::Opened(id)
    }

    /// Route a transport event to its handler.
    pub fn handle_stream(&mut self, msg: StreamMessage) -> AfterError {
        match msg.event {
            StreamEvent::Opened => {
                self.on_stream_open(msg.stream);
                AfterError::Nothing
            }
            StreamEvent::Message(payload) => {
                self.on_stream_event(msg.stream, payload);
                AfterError::Nothing
            }
            StreamEvent::Error(state) => self.on_stream_error(msg.stream, state),
        }
    }

    pub fn on_stream_open(&mut self, stream: StreamId) {
        if self.is_current(stream) {
            debug!(stream, "connection opened");
        }
    }

    /// A payload arrived on `stream`.
    pub fn on_stream_event(&mut self, stream: StreamId, payload: String) {
        if !self.is_current(stream) {
            debug!(stream, "dropping payload from stale stream");
            return;
        }

        if payload == self.settings.sentinel {
            info!(thread_id = %self.thread_id, "server ended the session");
            let confirmation = self.settings.texts.terminated.clone();
            self.disable_chat(Some(confirmation));
            return;
        }

        self.messages.push(Message::bot(payload));
    }

    /// `stream` stopped in `state`.
    pub fn on_stream_error(&mut self, stream: StreamId, state: ReadyState) -> AfterError {
        if !self.is_current(stream) {
            debug!(stream, ?state, "ignoring error from stale stream");
            return AfterError::Nothing;
        }

        debug!(stream, ?state, "chat stream stopped");
        self.ui.send_enabled = true;
        self.close_stream();

        if state == ReadyState::Closed {
            AfterError::CheckStatus
        } else {
            AfterError::Nothing
        }
    }

    /// The safety timer armed by `submit_query` fired. Later writes win: if
    /// a stream error already reopened the gate this is a no-op, and a slow
    /// stream still open at this point does not keep it shut.
    pub fn on_reenable_timeout(&mut self) {
        self.reenable_at = None;
        if self.active {
            self.ui.send_enabled = true;
        }
    }

    /// Apply the result of a session-status check.
    pub fn apply_status(&mut self, status: &SessionStatus) {
        if !status.session_active && self.active {
            info!(thread_id = %self.thread_id, "status check found the session ended");
            let notice = self.settings.texts.session_ended.clone();
            self.disable_chat(Some(notice));
        }
    }

    /// Drop the stream ahead of leaving this session view. Returns the
    /// thread id the caller should ask the server to delete.
    pub fn leave(&mut self) -> String {
        self.close_stream();
        self.reenable_at = None;
        self.thread_id.clone()
    }

    /// Release the stream, if any.
    pub fn teardown(&mut self) {
        self.close_stream();
    }

    fn is_current(&self, stream: StreamId) -> bool {
        self.current_stream() == Some(stream)
    }

    fn close_stream(&mut self) {
        if let Some(mut handle) = self.current.take() {
            debug!(
                stream = handle.id(),
                state = ?handle.ready_state(),
                "releasing chat stream"
            );
            handle.close();
        }
    }

    fn disable_chat(&mut self, message: Option<String>) {
        self.active = false;
        self.reenable_at = None;
        self.ui = UiState {
            send_enabled: false,
            input_enabled: false,
            placeholder: Some(self.settings.texts.placeholder.clone()),
        };

        if let Some(message) = message {
            self.messages.push(Message::bot(message));
        }

        self.close_stream();
    }
}

impl<S: StreamSource> Drop for SessionStreamController<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
