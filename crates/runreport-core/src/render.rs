//! Human-readable renderings of a report.
//!
//! [`render_markdown`] is what mails and `runreport show` print; the full
//! variant walks [`Report::tree`] so nesting comes out as an indented list.
//! [`render_brief`] is the short console summary printed after a run.

use std::fmt;

use crate::entry::Entry;
use crate::level::Level;
use crate::report::Report;
use crate::tree::RenderEvent;

/// Markdown view of a report.
#[derive(Debug, Clone, Copy)]
pub struct Markdown<'a> {
    pub report: &'a Report,
    /// Include every entry, nested by group
    pub full: bool,
}

impl fmt::Display for Markdown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;

        writeln!(f, "# {}", report.title())?;
        writeln!(f)?;
        writeln!(f, "_Started {}_", report.timestamp().format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f)?;

        writeln!(f, "| Level | Count |")?;
        writeln!(f, "|-------|-------|")?;
        for (level, count) in report.level_counts().iter() {
            writeln!(f, "| {} | {} |", level.label(), count)?;
        }
        writeln!(f)?;

        if report.count(Level::Summary) > 0 {
            writeln!(f, "## Summary")?;
            writeln!(f)?;
            for entry in report.entries_by_level(Level::Summary) {
                write_item(f, 0, entry, false)?;
            }
            writeln!(f)?;
        }

        if self.full && report.has_entries() {
            writeln!(f, "## Entries")?;
            writeln!(f)?;
            let mut events = report.tree();
            while let Some(event) = events.next() {
                if let RenderEvent::Leaf(entry) = event {
                    write_item(f, events.depth(), entry, true)?;
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

/// One list item; continuation lines of multi-line messages stay inside it.
fn write_item(f: &mut fmt::Formatter<'_>, depth: usize, entry: &Entry, with_level: bool) -> fmt::Result {
    let indent = "  ".repeat(depth);
    let mut lines = entry.message.lines();
    let first = lines.next().unwrap_or("");

    write!(f, "{}- ", indent)?;
    if with_level {
        write!(f, "**{}** ", entry.level.label())?;
    }
    if !entry.category.is_empty() {
        write!(f, "`{}` ", entry.category)?;
    }
    writeln!(f, "{}", first)?;
    for line in lines {
        writeln!(f, "{}  {}", indent, line)?;
    }
    Ok(())
}

/// Short completion summary: per-level counts then the summary entries.
#[derive(Debug, Clone, Copy)]
pub struct Brief<'a>(pub &'a Report);

impl fmt::Display for Brief<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Task ran to completion:")?;
        for (level, count) in self.0.level_counts().iter() {
            writeln!(f, "{} entries: {}", level.label(), count)?;
        }
        for entry in self.0.entries_by_level(Level::Summary) {
            writeln!(f, "{}", entry.message)?;
        }
        Ok(())
    }
}

pub fn render_markdown(report: &Report, full: bool) -> String {
    Markdown { report, full }.to_string()
}

pub fn render_brief(report: &Report) -> String {
    Brief(report).to_string()
}
