//! Terminal rendering of the transcript.

use std::io::{self, Write};

use chrono::Local;

use crate::models::{Message, Sender};

/// Writes transcript lines as they are appended, plus client-side notices
/// that are not part of the transcript.
pub struct Transcript<W: Write> {
    out: W,
    shown: usize,
}

impl<W: Write> Transcript<W> {
    pub const fn new(out: W) -> Self {
        Self { out, shown: 0 }
    }

    /// Print every message not printed yet.
    pub fn sync(&mut self, messages: &[Message]) -> io::Result<()> {
        let fresh = messages.get(self.shown..).unwrap_or_default();
        if fresh.is_empty() {
            return Ok(());
        }
        for message in fresh {
            writeln!(self.out, "{}", format_message(message))?;
        }
        self.shown = messages.len();
        self.out.flush()
    }

    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "  · {text}")?;
        self.out.flush()
    }
}

/// `[HH:MM:SS] bot › text`, with continuation lines indented under the text.
pub fn format_message(message: &Message) -> String {
    let label = match message.sender {
        Sender::User => "you",
        Sender::Bot => "bot",
    };
    let prefix = format!(
        "[{}] {label} › ",
        message.at.with_timezone(&Local).format("%H:%M:%S")
    );
    let indent = " ".repeat(prefix.chars().count());

    let mut out = prefix;
    for (i, line) in message.text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
            out.push_str(&indent);
        }
        out.push_str(line);
    }
    out
}
