//! Live echo of a report to a terminal.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tracing::debug;

use crate::level::Level;
use crate::render::Brief;
use crate::report::Report;

/// Mirrors recorded entries to a writer as they happen.
///
/// Entries are indented two spaces per open group and colored by level when
/// `colored` is set.
pub struct ConsoleEcho {
    out: Box<dyn Write + Send>,
    colored: bool,
}

impl std::fmt::Debug for ConsoleEcho {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleEcho").field("colored", &self.colored).finish()
    }
}

impl ConsoleEcho {
    pub fn new(out: Box<dyn Write + Send>, colored: bool) -> Self {
        Self { out, colored }
    }

    /// Echo to stdout, colored when stdout is a terminal.
    pub fn stdout() -> Self {
        let colored = io::stdout().is_terminal();
        Self::new(Box::new(io::stdout()), colored)
    }

    pub fn title(&mut self, title: &str) {
        let line = if self.colored {
            title.bold().to_string()
        } else {
            title.to_string()
        };
        self.emit(&line);
    }

    pub fn entry(&mut self, depth: usize, level: Level, message: &str) {
        let indent = "  ".repeat(depth);
        let mut text = String::new();
        for (i, line) in message.lines().enumerate() {
            if i > 0 {
                text.push('\n');
            }
            text.push_str(&indent);
            text.push_str(line);
        }
        if text.is_empty() {
            text = indent;
        }

        let line = if self.colored {
            match level {
                Level::Notice => text.blue().to_string(),
                Level::Success => text.green().to_string(),
                Level::Warning => text.yellow().to_string(),
                Level::Error => text.red().to_string(),
                Level::Summary | Level::Info => text,
            }
        } else {
            text
        };
        self.emit(&line);
    }

    /// Blank separator printed when a group starts or ends.
    pub fn group_boundary(&mut self) {
        self.emit("");
    }

    pub fn brief(&mut self, report: &Report) {
        let text = Brief(report).to_string();
        self.emit(text.trim_end());
    }

    fn emit(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
            debug!(error = %e, "Console echo write failed");
        }
    }
}
