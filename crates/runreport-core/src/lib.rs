//! Run Report Core Library
//!
//! Structured run reports: leveled, optionally nested entries recorded while
//! a task runs, persisted and optionally mailed when it ends.
//!
//! ## Overview
//!
//! A task records entries into a [`Report`] through a [`Reporter`]. Entries
//! carry one of six [`Level`]s and are counted per level as they arrive.
//! Related entries can be grouped; groups nest, and each entry remembers the
//! innermost group open when it was recorded. When the task ends, normally or
//! not, the reporter closes whatever is still open, writes the report as a
//! flat JSON artifact and applies its notification policy.
//!
//! Reading goes the other way: a [`ReportStore`] loads an artifact, and
//! [`Report::tree`] rebuilds the nesting as a stream of render events.
//!
//! ## Core Principles
//!
//! - **Counts never drift**: every entry bumps exactly its level's counter
//! - **Flat storage**: groups are parent pointers, never child lists
//! - **Always persisted**: failures are recorded, then the report is written
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use runreport_core::{Collaborators, DiagnosticLog, Report, ReportStore, Reporter};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = ReportStore::new("./reports");
//!     let diagnostics = Arc::new(DiagnosticLog::open("./reports")?);
//!     let mut reporter = Reporter::new(Report::new("Nightly import"), Collaborators::new(store, diagnostics))?;
//!
//!     reporter.run(|r| {
//!         r.add_info("Fetching feed");
//!         r.start_group();
//!         r.add_warning("Row 17 skipped");
//!         r.end_group();
//!         r.add_summary("Imported 412 rows");
//!         Ok::<_, String>(())
//!     })?;
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod console;
pub mod diagnostics;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod level;
pub mod mail;
pub mod queue;
pub mod registry;
pub mod render;
pub mod report;
pub mod reporter;
pub mod storage;
pub mod tree;

// Re-exports
pub use config::ReportingConfig;
pub use console::ConsoleEcho;
pub use diagnostics::{DiagnosticChannel, DiagnosticLog, DiagnosticSeverity, MemoryDiagnostics};
pub use dispatch::{
    DispatchOutcome, DispatchQueue, DispatchRoute, EmailMethod, MemoryNotifier, NotificationPolicy, Notifier,
    SendReportJob,
};
pub use entry::{Entry, Group, GroupId};
pub use error::{ReportError, ReportResult};
pub use level::{Level, LevelCounts};
pub use mail::{MailNotifier, MailTransport, OutboxTransport, ReportMail};
pub use queue::{TokioQueue, WorkerSummary};
pub use registry::{ReportRegistry, SharedReporter};
pub use render::{render_brief, render_markdown};
pub use report::{Report, DEFAULT_TITLE};
pub use reporter::{Collaborators, Failure, FailureKind, FinalizeOutcome, Reporter, RunError};
pub use storage::{ReportOverview, ReportStorage, ReportStore};
pub use tree::{RenderEvent, TreeEvents};
