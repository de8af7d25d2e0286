//! Interactive chat session driver.
//!
//! [`ChatSession`] runs one session view: a single cooperative loop that
//! feeds the controller user input, stream events, status-check results and
//! timer ticks, and renders the transcript after each step. Status and
//! delete requests run as background tasks so nothing waits on the network
//! inside the loop.

pub mod render;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::controller::{AfterError, SessionStreamController, SubmitOutcome};
use crate::error::ClientError;
use crate::models::{Message, SessionStatus};
use crate::transport::{SessionApi, StreamMessage, StreamSource};

use render::Transcript;

const HELP: &str = "Type a message and press Enter. Commands: \
                    /new start a new chat, /status check the session, /quit exit.";
const BUSY: &str = "Still waiting for the previous reply; try again in a moment.";

/// A line of user input, or the end of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    Eof,
}

/// Why a session view ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The user asked for a fresh session.
    NewChat,
    /// The user quit.
    Quit,
}

type StatusResult = Result<SessionStatus, ClientError>;

pub struct ChatSession<S, A, W>
where
    S: StreamSource,
    A: SessionApi + 'static,
    W: Write,
{
    controller: SessionStreamController<S>,
    api: Arc<A>,
    transcript: Transcript<W>,
    poll_interval: Duration,
    status_tx: mpsc::UnboundedSender<StatusResult>,
    status_rx: mpsc::UnboundedReceiver<StatusResult>,
    announced_end: bool,
    pending_delete: Option<JoinHandle<()>>,
}

impl<S, A, W> ChatSession<S, A, W>
where
    S: StreamSource,
    A: SessionApi + 'static,
    W: Write,
{
    pub fn new(
        controller: SessionStreamController<S>,
        api: Arc<A>,
        out: W,
        poll_interval: Duration,
    ) -> Self {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        Self {
            controller,
            api,
            transcript: Transcript::new(out),
            poll_interval,
            status_tx,
            status_rx,
            announced_end: false,
            pending_delete: None,
        }
    }

    /// Run the session view until the user quits or starts a new chat.
    pub async fn run(
        mut self,
        input: &mut mpsc::Receiver<Input>,
        streams: &mut mpsc::UnboundedReceiver<StreamMessage>,
    ) -> Result<Exit> {
        self.render()?;

        let mut poll =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            let reenable_at = self.controller.reenable_deadline();

            tokio::select! {
                line = input.recv() => match line {
                    Some(Input::Line(text)) => {
                        if let Some(exit) = self.handle_line(&text)? {
                            break exit;
                        }
                    }
                    Some(Input::Eof) | None => break Exit::Quit,
                },
                Some(msg) = streams.recv() => self.handle_stream(msg),
                Some(result) = self.status_rx.recv() => self.handle_status(result),
                () = sleep_until(reenable_at) => self.controller.on_reenable_timeout(),
                _ = poll.tick() => {
                    if self.controller.is_active() {
                        self.request_status_check();
                    }
                }
                _ = tokio::signal::ctrl_c() => break Exit::Quit,
            }

            self.render()?;
        };

        self.controller.teardown();
        if let Some(task) = &self.pending_delete {
            debug!(finished = task.is_finished(), "left session, delete dispatched");
        }
        Ok(exit)
    }

    /// Submit a single query and wait for its stream to finish. Returns the
    /// transcript.
    pub async fn ask(
        mut self,
        query: &str,
        streams: &mut mpsc::UnboundedReceiver<StreamMessage>,
    ) -> Result<Vec<Message>> {
        match self.controller.submit_query(query) {
            SubmitOutcome::Ignored => bail!("Query is empty"),
            SubmitOutcome::SessionEnded => {}
            SubmitOutcome::Opened(_) => {
                self.render()?;
                while self.controller.current_stream().is_some() {
                    tokio::select! {
                        msg = streams.recv() => {
                            let Some(msg) = msg else { break };
                            if self.controller.handle_stream(msg) == AfterError::CheckStatus {
                                let thread_id = self.controller.thread_id().to_string();
                                let result = self.api.session_status(&thread_id).await;
                                self.handle_status(result);
                            }
                        }
                        _ = tokio::signal::ctrl_c() => break,
                    }
                    self.render()?;
                }
            }
        }

        self.render()?;
        self.controller.teardown();
        Ok(self.controller.messages().to_vec())
    }

    /// Handle one line of user input. Returns how the view ends, if it does.
    fn handle_line(&mut self, line: &str) -> Result<Option<Exit>> {
        match line.trim() {
            "/quit" | "/exit" => return Ok(Some(Exit::Quit)),
            "/new" => return Ok(Some(self.reset_for_new_chat())),
            "/status" => {
                self.request_status_check();
                return Ok(None);
            }
            "/help" => {
                self.transcript.notice(HELP)?;
                return Ok(None);
            }
            _ => {}
        }

        let ui = self.controller.ui();
        if ui.input_enabled && !ui.send_enabled && !line.trim().is_empty() {
            self.transcript.notice(BUSY)?;
            return Ok(None);
        }

        self.controller.submit_query(line);
        Ok(None)
    }

    fn handle_stream(&mut self, msg: StreamMessage) {
        if self.controller.handle_stream(msg) == AfterError::CheckStatus {
            self.request_status_check();
        }
    }

    fn handle_status(&mut self, result: StatusResult) {
        match result {
            Ok(status) => self.controller.apply_status(&status),
            Err(e) => warn!(error = %e, "session status check failed"),
        }
    }

    /// Ask the server about the session in the background; the answer comes
    /// back through the status channel.
    fn request_status_check(&self) {
        let api = Arc::clone(&self.api);
        let tx = self.status_tx.clone();
        let thread_id = self.controller.thread_id().to_string();

        debug!(%thread_id, "checking session status");
        tokio::spawn(async move {
            let result = api.session_status(&thread_id).await;
            let _ = tx.send(result);
        });
    }

    /// Leave this session: close the stream, delete the session on the
    /// server without waiting, and move on whatever the delete's outcome.
    fn reset_for_new_chat(&mut self) -> Exit {
        let thread_id = self.controller.leave();
        let api = Arc::clone(&self.api);

        self.pending_delete = Some(tokio::spawn(async move {
            match api.delete_session(&thread_id).await {
                Ok(()) => debug!(%thread_id, "session deleted"),
                Err(e) => warn!(%thread_id, error = %e, "failed to delete session"),
            }
        }));

        Exit::NewChat
    }

    fn render(&mut self) -> Result<()> {
        self.transcript.sync(self.controller.messages())?;

        if !self.controller.is_active() && !self.announced_end {
            self.announced_end = true;
            if let Some(placeholder) = self.controller.ui().placeholder.clone() {
                self.transcript.notice(&placeholder)?;
            }
        }
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Read stdin lines on a dedicated thread so a pending read never holds up
/// runtime shutdown.
pub fn spawn_stdin_reader() -> mpsc::Receiver<Input> {
    let (tx, rx) = mpsc::channel(16);

    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(Input::Line(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to read stdin");
                    break;
                }
            }
        }
        let _ = tx.blocking_send(Input::Eof);
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use reqwest::StatusCode;

    use crate::config::Config;
    use crate::controller::testing::FakeSource;
    use crate::controller::ControllerSettings;
    use crate::transport::{ReadyState, StreamEvent};

    #[derive(Default)]
    struct FakeApi {
        ended: AtomicBool,
        fail_status: bool,
        fail_delete: bool,
        status_calls: AtomicUsize,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SessionApi for FakeApi {
        async fn session_status(&self, _thread_id: &str) -> Result<SessionStatus, ClientError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_status {
                return Err(ClientError::Status {
                    url: "/session-status".into(),
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                });
            }
            if self.ended.load(Ordering::SeqCst) {
                Ok(SessionStatus::gone())
            } else {
                Ok(SessionStatus::active())
            }
        }

        async fn delete_session(&self, thread_id: &str) -> Result<(), ClientError> {
            self.deleted.lock().unwrap().push(thread_id.to_string());
            if self.fail_delete {
                return Err(ClientError::Status {
                    url: "/session".into(),
                    status: StatusCode::BAD_GATEWAY,
                });
            }
            Ok(())
        }

        async fn start_session(&self) -> Result<String, ClientError> {
            Ok("fresh".into())
        }
    }

    /// Writer the test can read while the session owns it.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    type TestSession = ChatSession<FakeSource, FakeApi, SharedBuf>;

    fn session(api: FakeApi) -> (TestSession, FakeSource, SharedBuf, Arc<FakeApi>) {
        let source = FakeSource::default();
        let out = SharedBuf::default();
        let api = Arc::new(api);
        let controller = SessionStreamController::new(
            "T",
            source.clone(),
            ControllerSettings::from(&Config::default()),
        );
        let session = ChatSession::new(
            controller,
            Arc::clone(&api),
            out.clone(),
            Duration::from_secs(30),
        );
        (session, source, out, api)
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn closed_stream_reconciles_to_inactive() {
        let api = FakeApi::default();
        api.ended.store(true, Ordering::SeqCst);
        let (mut session, source, out, api) = session(api);

        assert_eq!(session.handle_line("Hello").unwrap(), None);
        assert_eq!(source.paths(), ["/chat?thread_id=T&query=Hello"]);

        session.handle_stream(StreamMessage {
            stream: 1,
            event: StreamEvent::Error(ReadyState::Closed),
        });
        let result = session.status_rx.recv().await.unwrap();
        session.handle_status(result);
        session.render().unwrap();

        assert_eq!(api.status_calls.load(Ordering::SeqCst), 1);
        assert!(!session.controller.is_active());
        assert!(!session.controller.ui().input_enabled);
        let text = out.text();
        assert!(text.contains("Your session has ended. Please start a new chat."));
        assert!(text.contains("Session ended - type /new to continue"));
    }

    #[tokio::test]
    async fn recoverable_stream_error_skips_status_check() {
        let (mut session, _source, _out, api) = session(FakeApi::default());

        session.handle_line("Hello").unwrap();
        session.handle_stream(StreamMessage {
            stream: 1,
            event: StreamEvent::Error(ReadyState::Connecting),
        });
        tokio::task::yield_now().await;

        assert_eq!(api.status_calls.load(Ordering::SeqCst), 0);
        assert!(session.controller.ui().send_enabled);
    }

    #[tokio::test]
    async fn failed_status_check_changes_nothing() {
        let (mut session, _source, out, _api) = session(FakeApi {
            fail_status: true,
            ..FakeApi::default()
        });
        session.render().unwrap();
        let before = out.text();

        session.request_status_check();
        let result = session.status_rx.recv().await.unwrap();
        assert!(result.is_err());
        session.handle_status(result);
        session.render().unwrap();

        assert!(session.controller.is_active());
        assert_eq!(out.text(), before);
    }

    #[tokio::test]
    async fn new_chat_navigates_even_when_delete_fails() {
        let (mut session, source, _out, api) = session(FakeApi {
            fail_delete: true,
            ..FakeApi::default()
        });
        session.handle_line("Hello").unwrap();

        assert_eq!(session.handle_line("/new").unwrap(), Some(Exit::NewChat));
        session.pending_delete.take().unwrap().await.unwrap();

        assert_eq!(api.deleted.lock().unwrap().as_slice(), ["T"]);
        assert!(source.is_closed(1));
        assert_eq!(session.controller.current_stream(), None);
    }

    #[tokio::test]
    async fn busy_send_gate_refuses_second_line() {
        let (mut session, source, out, _api) = session(FakeApi::default());

        session.handle_line("first").unwrap();
        session.handle_line("second").unwrap();

        assert_eq!(source.paths().len(), 1);
        assert!(out.text().contains(BUSY));

        session.controller.on_reenable_timeout();
        session.handle_line("second").unwrap();
        assert_eq!(source.paths().len(), 2);
        assert_eq!(source.open_count(), 1);
    }

    #[tokio::test]
    async fn lines_after_end_get_a_notice() {
        let (mut session, source, _out, _api) = session(FakeApi::default());
        session.controller.apply_status(&SessionStatus::gone());
        let before = session.controller.messages().len();

        session.handle_line("hello?").unwrap();
        session.handle_line("   ").unwrap();

        assert!(source.paths().is_empty());
        assert_eq!(session.controller.messages().len(), before + 1);
        let last = session.controller.messages().last().unwrap();
        assert_eq!(last.text, "Session has ended. Please start a new chat.");
    }

    #[tokio::test]
    async fn quit_command_exits() {
        let (mut session, _source, _out, _api) = session(FakeApi::default());
        assert_eq!(session.handle_line(" /quit ").unwrap(), Some(Exit::Quit));
    }

    #[tokio::test]
    async fn run_loop_renders_stream_and_quits() {
        let (session, source, out, _api) = session(FakeApi::default());
        let (input_tx, mut input_rx) = mpsc::channel(8);
        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();

        let run = tokio::spawn(async move { session.run(&mut input_rx, &mut stream_rx).await });

        input_tx.send(Input::Line("Hello".into())).await.unwrap();
        wait_for(|| source.paths().len() == 1).await;

        stream_tx
            .send(StreamMessage {
                stream: 1,
                event: StreamEvent::Message("Namaste!".into()),
            })
            .unwrap();
        stream_tx
            .send(StreamMessage {
                stream: 1,
                event: StreamEvent::Error(ReadyState::Connecting),
            })
            .unwrap();
        wait_for(|| out.text().contains("bot › Namaste!")).await;
        wait_for(|| source.is_closed(1)).await;

        input_tx.send(Input::Line("/quit".into())).await.unwrap();
        assert_eq!(run.await.unwrap().unwrap(), Exit::Quit);

        let text = out.text();
        assert!(text.contains("bot › 👋 Welcome!"));
        assert!(text.contains("you › Hello"));
    }

    #[tokio::test]
    async fn run_loop_stops_on_sentinel_then_eof() {
        let (session, source, out, _api) = session(FakeApi::default());
        let (input_tx, mut input_rx) = mpsc::channel(8);
        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();

        let run = tokio::spawn(async move { session.run(&mut input_rx, &mut stream_rx).await });

        input_tx.send(Input::Line("123456".into())).await.unwrap();
        wait_for(|| source.paths().len() == 1).await;
        stream_tx
            .send(StreamMessage {
                stream: 1,
                event: StreamEvent::Message("__SESSION_TERMINATED__".into()),
            })
            .unwrap();
        wait_for(|| out.text().contains("✅ Email verification successful!")).await;

        input_tx.send(Input::Eof).await.unwrap();
        assert_eq!(run.await.unwrap().unwrap(), Exit::Quit);
        assert!(source.is_closed(1));
        assert!(!out.text().contains("__SESSION_TERMINATED__"));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_poll_ends_idle_session() {
        let api = FakeApi::default();
        api.ended.store(true, Ordering::SeqCst);
        let (session, _source, out, api) = session(api);
        let (input_tx, mut input_rx) = mpsc::channel(8);
        let (_stream_tx, mut stream_rx) = mpsc::unbounded_channel();

        let run = tokio::spawn(async move { session.run(&mut input_rx, &mut stream_rx).await });

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        wait_for(|| out.text().contains("Your session has ended.")).await;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 1);

        input_tx.send(Input::Line("/quit".into())).await.unwrap();
        assert_eq!(run.await.unwrap().unwrap(), Exit::Quit);
    }

    #[tokio::test(start_paused = true)]
    async fn reenable_timer_reopens_send_gate() {
        let (session, source, out, _api) = session(FakeApi::default());
        let (input_tx, mut input_rx) = mpsc::channel(8);
        let (_stream_tx, mut stream_rx) = mpsc::unbounded_channel();

        let run = tokio::spawn(async move { session.run(&mut input_rx, &mut stream_rx).await });

        input_tx.send(Input::Line("one".into())).await.unwrap();
        wait_for(|| source.paths().len() == 1).await;

        input_tx.send(Input::Line("two".into())).await.unwrap();
        wait_for(|| out.text().contains(BUSY)).await;
        assert_eq!(source.paths().len(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        input_tx.send(Input::Line("two".into())).await.unwrap();
        wait_for(|| source.paths().len() == 2).await;
        assert!(source.is_closed(1));

        input_tx.send(Input::Eof).await.unwrap();
        assert_eq!(run.await.unwrap().unwrap(), Exit::Quit);
        assert!(source.is_closed(2));
    }

    #[tokio::test]
    async fn ask_collects_reply_until_stream_ends() {
        let (session, _source, _out, _api) = session(FakeApi::default());
        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();
        for event in [
            StreamEvent::Opened,
            StreamEvent::Message("Red Fort".into()),
            StreamEvent::Error(ReadyState::Connecting),
        ] {
            stream_tx.send(StreamMessage { stream: 1, event }).unwrap();
        }

        let messages = session.ask("Delhi?", &mut stream_rx).await.unwrap();

        let texts: Vec<_> = messages.iter().skip(1).map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["Delhi?", "Red Fort"]);
    }

    #[tokio::test]
    async fn ask_reconciles_after_refused_stream() {
        let api = FakeApi::default();
        api.ended.store(true, Ordering::SeqCst);
        let (session, _source, _out, _api) = session(api);
        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();
        stream_tx
            .send(StreamMessage {
                stream: 1,
                event: StreamEvent::Error(ReadyState::Closed),
            })
            .unwrap();

        let messages = session.ask("hello", &mut stream_rx).await.unwrap();
        assert_eq!(
            messages.last().unwrap().text,
            "Your session has ended. Please start a new chat."
        );
    }
}
