//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// chatline - chat with a session-scoped streaming chat server from the terminal
#[derive(Parser, Debug)]
#[command(name = "chatline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Base URL of the chat server (overrides the config file)
    #[arg(long, global = true, env = "CHATLINE_SERVER")]
    pub server: Option<String>,

    /// Config file to use instead of ~/.config/chatline/config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `chat`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive chat (the default)
    Chat {
        /// Join an existing session instead of asking the server for a new one
        #[arg(long)]
        thread_id: Option<String>,
    },

    /// Send one query, print the streamed reply and exit
    Ask {
        /// Session to ask in; a new one is started if omitted
        #[arg(long)]
        thread_id: Option<String>,

        /// Print the transcript as JSON instead of plain text
        #[arg(long)]
        json: bool,

        /// Query to send
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
    },

    /// Show whether a session is still active
    Status {
        /// Session thread id
        thread_id: String,
    },

    /// Delete a session on the server
    End {
        /// Session thread id
        thread_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_no_subcommand() {
        let cli = Cli::try_parse_from(["chatline"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_ask_joins_trailing_words() {
        let cli = Cli::try_parse_from([
            "chatline", "ask", "--thread-id", "T", "where", "is", "Hampi?",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Ask {
                thread_id, query, json,
            }) => {
                assert_eq!(thread_id.as_deref(), Some("T"));
                assert_eq!(query.join(" "), "where is Hampi?");
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ask_requires_a_query() {
        assert!(Cli::try_parse_from(["chatline", "ask"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "chatline", "status", "abc", "--server", "http://localhost:9000", "-v",
        ])
        .unwrap();
        assert_eq!(cli.server.as_deref(), Some("http://localhost:9000"));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Commands::Status { thread_id }) if thread_id == "abc"));
    }
}
