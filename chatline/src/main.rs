//! chatline - terminal client for session-scoped streaming chat servers.
//!
//! Architecture:
//! - The server owns sessions; each query opens one server-sent-events stream
//! - A controller tracks whether the session is still active and keeps at most
//!   one stream open, closing it on every exit path
//! - A single event loop drives the controller from stdin, stream events,
//!   status checks and timers

mod chat;
mod cli;
mod config;
mod controller;
mod error;
mod models;
mod transport;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "chatline=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    execute(cli).await
}
