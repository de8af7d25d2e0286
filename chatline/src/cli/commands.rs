//! CLI command execution.
//!
//! Every command talks to the chat server over one [`HttpTransport`].

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;

use crate::chat::{spawn_stdin_reader, ChatSession, Exit, Input};
use crate::config::Config;
use crate::controller::{ControllerSettings, SessionStreamController};
use crate::models::SessionStatus;
use crate::transport::{HttpTransport, SessionApi, StreamMessage, StreamSource};

use super::args::{Cli, Commands};

/// Resolve the effective configuration: file first, then flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(ref server) = cli.server {
        config.server_url.clone_from(server);
    }
    config.validate()?;

    Ok(config)
}

// === Command Execution ===

pub async fn execute(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        None => chat(&config, None).await,
        Some(Commands::Chat { thread_id }) => chat(&config, thread_id).await,
        Some(Commands::Ask {
            thread_id,
            json,
            query,
        }) => ask(&config, thread_id, &query.join(" "), json).await,
        Some(Commands::Status { thread_id }) => status(&config, &thread_id).await,
        Some(Commands::End { thread_id }) => end(&config, &thread_id).await,
    }
}

async fn start_or_join(transport: &HttpTransport, thread_id: Option<String>) -> Result<String> {
    match thread_id {
        Some(id) => Ok(id),
        None => transport.start_session().await.with_context(|| {
            format!("Failed to start a chat session on {}", transport.base_url())
        }),
    }
}

async fn chat(config: &Config, thread_id: Option<String>) -> Result<()> {
    let (transport, mut streams) =
        HttpTransport::new(&config.server_url, config.request_timeout())?;
    let transport = Arc::new(transport);
    let mut input = spawn_stdin_reader();

    let thread_id = start_or_join(&transport, thread_id).await?;
    info!(server = transport.base_url(), "connected");

    run_views(
        config,
        Arc::clone(&transport),
        transport,
        thread_id,
        &mut input,
        &mut streams,
        io::stdout,
    )
    .await
}

/// Open one session view after another until the user quits. Leaving a view
/// with `/new` always lands in a fresh session, whatever became of the
/// delete request for the old one.
async fn run_views<S, A, W>(
    config: &Config,
    source: S,
    api: Arc<A>,
    mut thread_id: String,
    input: &mut mpsc::Receiver<Input>,
    streams: &mut mpsc::UnboundedReceiver<StreamMessage>,
    mut out: impl FnMut() -> W,
) -> Result<()>
where
    S: StreamSource + Clone,
    A: SessionApi + 'static,
    W: Write,
{
    loop {
        info!(%thread_id, "session view opened");
        let mut writer = out();
        writeln!(writer, "Session {thread_id} (type /help for commands)")?;

        let controller = SessionStreamController::new(
            thread_id.clone(),
            source.clone(),
            ControllerSettings::from(config),
        );
        let session = ChatSession::new(
            controller,
            Arc::clone(&api),
            writer,
            config.status_poll_interval(),
        );

        match session.run(input, streams).await? {
            Exit::Quit => return Ok(()),
            Exit::NewChat => {
                thread_id = api
                    .start_session()
                    .await
                    .context("Failed to start a new chat session")?;
            }
        }
    }
}

async fn ask(config: &Config, thread_id: Option<String>, query: &str, json: bool) -> Result<()> {
    let (transport, mut streams) =
        HttpTransport::new(&config.server_url, config.request_timeout())?;
    let transport = Arc::new(transport);
    let thread_id = start_or_join(&transport, thread_id).await?;

    let mut settings = ControllerSettings::from(config);
    settings.texts.welcome.clear();
    let controller = SessionStreamController::new(thread_id, Arc::clone(&transport), settings);

    let messages = if json {
        let session = ChatSession::new(
            controller,
            Arc::clone(&transport),
            io::sink(),
            config.status_poll_interval(),
        );
        let messages = session.ask(query, &mut streams).await?;
        println!("{}", serde_json::to_string_pretty(&messages)?);
        messages
    } else {
        let session = ChatSession::new(
            controller,
            Arc::clone(&transport),
            io::stdout(),
            config.status_poll_interval(),
        );
        session.ask(query, &mut streams).await?
    };

    info!(messages = messages.len(), "ask finished");
    Ok(())
}

async fn status(config: &Config, thread_id: &str) -> Result<()> {
    let (transport, _streams) =
        HttpTransport::new(&config.server_url, config.request_timeout())?;
    let status = transport
        .session_status(thread_id)
        .await
        .with_context(|| format!("Failed to check session {thread_id}"))?;

    println!("{}", describe_status(thread_id, &status));
    Ok(())
}

async fn end(config: &Config, thread_id: &str) -> Result<()> {
    let (transport, _streams) =
        HttpTransport::new(&config.server_url, config.request_timeout())?;
    transport
        .delete_session(thread_id)
        .await
        .with_context(|| format!("Failed to delete session {thread_id}"))?;

    println!("Session {thread_id} deleted");
    Ok(())
}

fn describe_status(thread_id: &str, status: &SessionStatus) -> String {
    let state = if status.session_active {
        "active"
    } else {
        "ended"
    };
    let flag = |value: Option<bool>| match value {
        Some(true) => "yes",
        Some(false) => "no",
        None => "-",
    };

    format!(
        "{:<38} {:<8} {:<10} {}\n{:<38} {:<8} {:<10} {}",
        "SESSION",
        "STATE",
        "VERIFIED",
        "VERIFICATION STARTED",
        thread_id,
        state,
        flag(status.is_verified),
        flag(status.verification_started),
    )
}
