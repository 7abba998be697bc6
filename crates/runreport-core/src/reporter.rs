//! The live owner of one report.
//!
//! A [`Reporter`] wraps a recording [`Report`] together with the
//! collaborators it needs once the task is over: storage, a notifier, an
//! optional dispatch queue and the diagnostic channel. Recording goes
//! through the reporter so an optional console echo sees every entry.
//!
//! The task ends in exactly one [`Reporter::finalize`] call:
//!
//! 1. open groups are closed
//! 2. the notification route is decided from the final counts
//! 3. inline dispatch happens (its failures become error entries)
//! 4. the artifact is written to the path derived at creation
//! 5. the report is frozen and, if routed to the queue, a job is pushed
//!
//! Abnormal endings go through [`Reporter::fail`] first. [`Reporter::run`]
//! does both around a task closure, including panics.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::ReportingConfig;
use crate::console::ConsoleEcho;
use crate::diagnostics::{DiagnosticChannel, DiagnosticSeverity};
use crate::dispatch::{self, DispatchOutcome, DispatchQueue, DispatchRoute, Notifier, SendReportJob};
use crate::entry::GroupId;
use crate::error::{ReportError, ReportResult};
use crate::level::Level;
use crate::report::Report;
use crate::storage::ReportStore;

/// Entry recorded when the policy asks for the queue but none is running.
pub const QUEUE_FALLBACK_MESSAGE: &str = "Report set to email on queue but no queue is configured";

// ═══════════════════════════════════════════════════════════════════════════
// Failures
// ═══════════════════════════════════════════════════════════════════════════

/// Severity class of an abnormal ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Warning,
    Notice,
    Error,
    Fatal,
    Panic,
}

impl FailureKind {
    /// Recoverable failures are recorded as warnings, the rest as errors.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FailureKind::Warning | FailureKind::Notice)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Warning => "warning",
            FailureKind::Notice => "notice",
            FailureKind::Error => "error",
            FailureKind::Fatal => "fatal",
            FailureKind::Panic => "panic",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source position a failure was raised at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A task failure as handed to [`Reporter::fail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub location: Option<SourceLocation>,
    /// Call stack, written to the diagnostic channel only
    pub backtrace: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            backtrace: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Error, message)
    }

    /// Failure located at the caller's source position.
    #[track_caller]
    pub fn here(kind: FailureKind, message: impl Into<String>) -> Self {
        let caller = panic::Location::caller();
        Self::new(kind, message).with_location(caller.file(), caller.line())
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.location = Some(SourceLocation {
            file: file.into(),
            line,
        });
        self
    }

    pub fn with_backtrace(mut self, backtrace: impl Into<String>) -> Self {
        self.backtrace = Some(backtrace.into());
        self
    }

    /// Failure for a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::new(FailureKind::Panic, format!("task panicked: {}", panic_detail(payload)))
    }

    /// Level of the entry summarizing this failure.
    pub fn entry_level(&self) -> Level {
        if self.kind.is_recoverable() {
            Level::Warning
        } else {
            Level::Error
        }
    }

    /// Text of the entry summarizing this failure.
    pub fn entry_message(&self) -> String {
        match &self.location {
            Some(location) => format!("{}\n{}", self.message, location),
            None => self.message.clone(),
        }
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Collaborators and outcomes
// ═══════════════════════════════════════════════════════════════════════════

/// Everything a reporter talks to besides its report.
#[derive(Clone)]
pub struct Collaborators {
    pub store: ReportStore,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub queue: Option<Arc<dyn DispatchQueue>>,
    pub diagnostics: Arc<dyn DiagnosticChannel>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("store", &self.store)
            .field("notifier", &self.notifier.is_some())
            .field("queue", &self.queue.is_some())
            .finish()
    }
}

impl Collaborators {
    pub fn new(store: ReportStore, diagnostics: Arc<dyn DiagnosticChannel>) -> Self {
        Self {
            store,
            notifier: None,
            queue: None,
            diagnostics,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn DispatchQueue>) -> Self {
        self.queue = Some(queue);
        self
    }
}

/// Result of a successful finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    /// Where the artifact was written
    pub path: PathBuf,
    pub dispatch: DispatchOutcome,
}

#[derive(Debug, Clone)]
enum FinalizeState {
    Pending,
    Done(FinalizeOutcome),
    Failed(String),
}

/// Error from [`Reporter::run`].
#[derive(Debug, Error)]
pub enum RunError<E> {
    /// The task failed; its report was persisted
    #[error("task failed: {0}")]
    Task(E),

    /// The task succeeded but its report could not be persisted
    #[error("failed to finalize report: {0}")]
    Finalize(#[source] ReportError),

    /// The task failed and so did persisting its report
    #[error("task failed: {task}; failed to finalize report: {finalize}")]
    Both { task: E, finalize: ReportError },
}

// ═══════════════════════════════════════════════════════════════════════════
// Reporter
// ═══════════════════════════════════════════════════════════════════════════

pub struct Reporter {
    report: Report,
    collaborators: Collaborators,
    echo: Option<ConsoleEcho>,
    /// Derived once at creation
    path: PathBuf,
    state: FinalizeState,
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("title", &self.report.title())
            .field("path", &self.path)
            .field("state", &self.state)
            .finish()
    }
}

impl Reporter {
    /// Reporter for a recording report.
    ///
    /// Fails with [`ReportError::ReadOnly`] for a report that is no longer
    /// recording, such as one loaded from storage: its artifact already
    /// exists and must not be written or sent again.
    pub fn new(report: Report, collaborators: Collaborators) -> ReportResult<Self> {
        if !report.is_active() {
            return Err(ReportError::ReadOnly(format!(
                "report '{}' is not recording and cannot be finalized again",
                report.title()
            )));
        }
        Ok(Self::attach(report, collaborators))
    }

    fn attach(report: Report, collaborators: Collaborators) -> Self {
        let path = collaborators.store.path_for(&report);
        debug!(title = %report.title(), path = ?path, "Reporter created");
        Self {
            report,
            collaborators,
            echo: None,
            path,
            state: FinalizeState::Pending,
        }
    }

    /// Reporter for a new report carrying `config`'s notification policy,
    /// echoing to stdout if the config asks for it.
    pub fn from_config(title: impl Into<String>, config: &ReportingConfig, collaborators: Collaborators) -> Self {
        let report = Report::new(title).with_policy(config.policy());
        let reporter = Self::attach(report, collaborators);
        if config.console_echo {
            reporter.with_echo(ConsoleEcho::stdout())
        } else {
            reporter
        }
    }

    /// Echo entries as they are recorded. Prints the title immediately.
    pub fn with_echo(mut self, mut echo: ConsoleEcho) -> Self {
        echo.title(self.report.title());
        self.echo = Some(echo);
        self
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    /// Artifact path, fixed at creation.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finalized(&self) -> bool {
        !matches!(self.state, FinalizeState::Pending)
    }

    /// Outcome of a successful finalize, if one happened.
    pub fn outcome(&self) -> Option<&FinalizeOutcome> {
        match &self.state {
            FinalizeState::Done(outcome) => Some(outcome),
            _ => None,
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Recording
    // ───────────────────────────────────────────────────────────────────────

    pub fn record(&mut self, level: Level, message: impl Into<String>, category: impl Into<String>) -> &mut Self {
        let message = message.into();
        if let Some(echo) = self.echo.as_mut() {
            if self.report.is_active() {
                echo.entry(self.report.depth(), level, &message);
            }
        }
        self.report.record(level, message, category);
        self
    }

    pub fn add_summary(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Summary, message, "")
    }

    pub fn add_info(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Info, message, "")
    }

    pub fn add_notice(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Notice, message, "")
    }

    pub fn add_success(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Success, message, "")
    }

    pub fn add_warning(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Warning, message, "")
    }

    pub fn add_error(&mut self, message: impl Into<String>) -> &mut Self {
        self.record(Level::Error, message, "")
    }

    pub fn start_group(&mut self) -> Option<GroupId> {
        let id = self.report.start_group();
        if id.is_some() {
            if let Some(echo) = self.echo.as_mut() {
                echo.group_boundary();
            }
        }
        id
    }

    pub fn end_group(&mut self) -> Option<GroupId> {
        let id = self.report.end_group();
        if id.is_some() {
            if let Some(echo) = self.echo.as_mut() {
                echo.group_boundary();
            }
        }
        id
    }

    fn unwind(&mut self) -> usize {
        let mut closed = 0;
        while self.end_group().is_some() {
            closed += 1;
        }
        closed
    }

    // ───────────────────────────────────────────────────────────────────────
    // Termination
    // ───────────────────────────────────────────────────────────────────────

    /// Record an abnormal ending.
    ///
    /// The raw failure goes to the diagnostic channel first, then every open
    /// group is closed, then one entry summarizing the failure is recorded at
    /// top level.
    pub fn fail(&mut self, failure: Failure) {
        if self.is_finalized() {
            warn!(title = %self.report.title(), failure = %failure, "Failure reported after finalize, ignoring");
            return;
        }

        let severity = if failure.kind.is_recoverable() {
            DiagnosticSeverity::Warning
        } else {
            DiagnosticSeverity::Error
        };
        let mut record = format!("[{}] {}", self.report.title(), failure);
        if let Some(backtrace) = &failure.backtrace {
            record.push_str("\nbacktrace:\n");
            record.push_str(backtrace);
        }
        self.collaborators.diagnostics.log_diagnostic(&record, severity);

        let closed = self.unwind();
        error!(
            title = %self.report.title(),
            kind = %failure.kind,
            closed_groups = closed,
            "Task ended abnormally"
        );

        self.record(failure.entry_level(), failure.entry_message(), "");
    }

    /// Persist the report and apply the notification policy.
    ///
    /// Runs once. Later calls return the first outcome without touching
    /// storage again. Storage write errors propagate; notification problems
    /// are recorded in the report instead.
    pub fn finalize(&mut self) -> ReportResult<FinalizeOutcome> {
        match &self.state {
            FinalizeState::Done(outcome) => {
                debug!(path = ?outcome.path, "Report already finalized");
                return Ok(outcome.clone());
            }
            FinalizeState::Failed(reason) => {
                return Err(ReportError::ReadOnly(format!("finalize already failed: {}", reason)));
            }
            FinalizeState::Pending => {}
        }

        let closed = self.unwind();
        if closed > 0 {
            debug!(closed_groups = closed, "Closed groups left open at finalize");
        }

        let queue_available = self
            .collaborators
            .queue
            .as_ref()
            .map(|queue| queue.is_available())
            .unwrap_or(false);
        let route = dispatch::route(self.report.policy(), self.report.level_counts(), queue_available);
        debug!(title = %self.report.title(), ?route, "Dispatch route decided");

        let mut dispatch = match route {
            DispatchRoute::Skip => DispatchOutcome::NotRequired,
            _ => match self.ready_notifier() {
                Err(reason) => {
                    warn!(title = %self.report.title(), %reason, "Report notification not configured");
                    self.add_error(format!("Report could not be sent: {}", reason));
                    DispatchOutcome::MissingConfig(reason)
                }
                Ok(notifier) => match route {
                    DispatchRoute::Inline => self.send_inline(notifier.as_ref(), false),
                    DispatchRoute::FallbackInline => {
                        warn!(title = %self.report.title(), "Dispatch queue unavailable, sending inline");
                        self.add_error(QUEUE_FALLBACK_MESSAGE);
                        self.send_inline(notifier.as_ref(), true)
                    }
                    _ => DispatchOutcome::Queued,
                },
            },
        };

        self.report.freeze();
        if let Err(e) = self.collaborators.store.save_to(&self.report, &self.path) {
            error!(path = ?self.path, error = %e, "Failed to write report");
            self.state = FinalizeState::Failed(e.to_string());
            return Err(e);
        }

        if dispatch == DispatchOutcome::Queued {
            dispatch = self.push_job();
        }

        info!(
            title = %self.report.title(),
            path = ?self.path,
            entries = self.report.total_entries(),
            errors = self.report.count(Level::Error),
            ?dispatch,
            "Report finalized"
        );

        if let Some(echo) = self.echo.as_mut() {
            echo.brief(&self.report);
        }

        let outcome = FinalizeOutcome {
            path: self.path.clone(),
            dispatch,
        };
        self.state = FinalizeState::Done(outcome.clone());
        Ok(outcome)
    }

    /// Run `task`, then finalize.
    ///
    /// A task error or panic is recorded through [`fail`](Self::fail) before
    /// finalizing; the error is then returned and a panic resumed. A panic's
    /// source location goes into the failure entry and its backtrace into
    /// the diagnostic record.
    pub fn run<T, E, F>(&mut self, task: F) -> Result<T, RunError<E>>
    where
        E: fmt::Display,
        F: FnOnce(&mut Reporter) -> Result<T, E>,
    {
        install_panic_capture();
        let was_capturing = CAPTURING.with(|flag| flag.replace(true));
        let result = panic::catch_unwind(AssertUnwindSafe(|| task(&mut *self)));
        CAPTURING.with(|flag| flag.set(was_capturing));
        let captured = CAPTURED_PANIC.with(Cell::take);

        match result {
            Ok(Ok(value)) => {
                self.finalize().map_err(RunError::Finalize)?;
                Ok(value)
            }
            Ok(Err(task_error)) => {
                self.fail(Failure::error(task_error.to_string()));
                match self.finalize() {
                    Ok(_) => Err(RunError::Task(task_error)),
                    Err(finalize) => Err(RunError::Both {
                        task: task_error,
                        finalize,
                    }),
                }
            }
            Err(payload) => {
                let mut failure = Failure::from_panic(payload.as_ref());
                if let Some(captured) = captured {
                    failure.location = captured.location;
                    failure = failure.with_backtrace(captured.backtrace);
                }
                self.fail(failure);
                if let Err(e) = self.finalize() {
                    error!(error = %e, "Failed to finalize report after panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    fn ready_notifier(&self) -> Result<Arc<dyn Notifier>, String> {
        let notifier = self
            .collaborators
            .notifier
            .clone()
            .ok_or_else(|| "no notifier is configured".to_string())?;
        notifier.ready().map_err(|e| match e {
            ReportError::Config(reason) => reason,
            other => other.to_string(),
        })?;
        Ok(notifier)
    }

    fn send_inline(&mut self, notifier: &dyn Notifier, fallback: bool) -> DispatchOutcome {
        let policy = self.report.policy().clone();
        let sent = panic::catch_unwind(AssertUnwindSafe(|| {
            notifier.dispatch(&self.report, &policy.recipients, policy.email_full_report)
        }))
        .unwrap_or_else(|payload| {
            Err(ReportError::Dispatch(format!(
                "notifier panicked: {}",
                panic_detail(payload.as_ref())
            )))
        });
        match sent {
            Ok(()) => {
                info!(title = %self.report.title(), recipients = policy.recipients.len(), "Report sent");
                if fallback {
                    DispatchOutcome::SentFallback
                } else {
                    DispatchOutcome::Sent
                }
            }
            Err(e) => {
                error!(title = %self.report.title(), error = %e, "Failed to send report");
                self.add_error(format!("Failed to send report: {}", e));
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    fn push_job(&self) -> DispatchOutcome {
        let Some(queue) = self.collaborators.queue.as_ref() else {
            return DispatchOutcome::Failed("no dispatch queue".to_string());
        };
        let policy = self.report.policy();
        let job = SendReportJob {
            path: self.path.clone(),
            recipients: policy.recipients.clone(),
            email_full_report: policy.email_full_report,
        };
        match queue.push(job) {
            Ok(()) => DispatchOutcome::Queued,
            Err(e) => {
                error!(path = ?self.path, error = %e, "Failed to queue report dispatch");
                self.collaborators.diagnostics.log_diagnostic(
                    &format!("[{}] report written but not queued: {}", self.report.title(), e),
                    DiagnosticSeverity::Error,
                );
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Panic capture
// ═══════════════════════════════════════════════════════════════════════════

/// Where and through which frames a panic inside [`Reporter::run`] was raised.
struct CapturedPanic {
    location: Option<SourceLocation>,
    backtrace: String,
}

thread_local! {
    /// Set while a task runs under [`Reporter::run`] on this thread
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static CAPTURED_PANIC: Cell<Option<CapturedPanic>> = const { Cell::new(None) };
}

/// Chain a hook in front of the existing panic hook, once per process.
///
/// The hook only records on threads currently inside `run`; every panic is
/// still handed to the previous hook.
fn install_panic_capture() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.try_with(Cell::get).unwrap_or(false) {
                let captured = CapturedPanic {
                    location: info.location().map(|location| SourceLocation {
                        file: location.file().to_string(),
                        line: location.line(),
                    }),
                    backtrace: Backtrace::force_capture().to_string(),
                };
                let _ = CAPTURED_PANIC.try_with(|slot| slot.set(Some(captured)));
            }
            previous(info);
        }));
    });
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if self.is_finalized() {
            return;
        }
        warn!(title = %self.report.title(), "Reporter dropped without finalize, finalizing now");
        if std::thread::panicking() {
            self.fail(Failure::new(FailureKind::Panic, "task panicked while the report was open"));
        }
        if let Err(e) = self.finalize() {
            error!(error = %e, "Failed to finalize report on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemoryDiagnostics;
    use crate::dispatch::{EmailMethod, MemoryNotifier, NotificationPolicy};
    use crate::tree::RenderEvent;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingQueue {
        jobs: Mutex<Vec<SendReportJob>>,
        closed: bool,
    }

    impl DispatchQueue for RecordingQueue {
        fn push(&self, job: SendReportJob) -> ReportResult<()> {
            if self.closed {
                return Err(ReportError::Dispatch("closed".into()));
            }
            self.jobs.lock().push(job);
            Ok(())
        }

        fn is_available(&self) -> bool {
            !self.closed
        }
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn dispatch(&self, _: &Report, _: &[String], _: bool) -> ReportResult<()> {
            Err(ReportError::Dispatch("relay refused connection".into()))
        }
    }

    struct PanickingNotifier;

    impl Notifier for PanickingNotifier {
        fn dispatch(&self, _: &Report, _: &[String], _: bool) -> ReportResult<()> {
            panic!("mail relay handle poisoned");
        }
    }

    struct Fixture {
        _temp: TempDir,
        store: ReportStore,
        diagnostics: Arc<MemoryDiagnostics>,
        notifier: Arc<MemoryNotifier>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let store = ReportStore::new(temp.path());
            Self {
                _temp: temp,
                store,
                diagnostics: Arc::new(MemoryDiagnostics::new()),
                notifier: Arc::new(MemoryNotifier::new()),
            }
        }

        fn collaborators(&self) -> Collaborators {
            Collaborators::new(self.store.clone(), self.diagnostics.clone()).with_notifier(self.notifier.clone())
        }

        fn reporter(&self, policy: NotificationPolicy) -> Reporter {
            Reporter::new(Report::new("Import").with_policy(policy), self.collaborators()).unwrap()
        }
    }

    fn on_error_policy(method: EmailMethod) -> NotificationPolicy {
        NotificationPolicy {
            email_method: method,
            ..NotificationPolicy::default().with_recipients(["ops@example.com"])
        }
    }

    #[test]
    fn test_failure_entry_shape() {
        let failure = Failure::new(FailureKind::Fatal, "out of memory").with_location("src/load.rs", 88);
        assert_eq!(failure.entry_level(), Level::Error);
        assert_eq!(failure.entry_message(), "out of memory\nsrc/load.rs:88");

        let notice = Failure::new(FailureKind::Notice, "deprecated call");
        assert_eq!(notice.entry_level(), Level::Warning);
        assert_eq!(notice.entry_message(), "deprecated call");
    }

    #[test]
    fn test_failure_here_captures_caller() {
        let failure = Failure::here(FailureKind::Error, "x");
        let location = failure.location.unwrap();
        assert!(location.file.ends_with("reporter.rs"));
        assert!(location.line > 0);
    }

    #[test]
    fn test_failure_from_panic_payloads() {
        let s: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(Failure::from_panic(s.as_ref()).message, "task panicked: static str");

        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(Failure::from_panic(owned.as_ref()).message, "task panicked: owned");

        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(Failure::from_panic(other.as_ref()).kind, FailureKind::Panic);
    }

    #[test]
    fn test_fail_unwinds_before_recording() {
        let fx = Fixture::new();
        let mut reporter = fx.reporter(NotificationPolicy::default());
        reporter.add_info("start");
        reporter.start_group();
        reporter.add_info("inner");
        reporter.start_group();

        reporter.fail(Failure::error("disk full").with_location("src/io.rs", 12));

        let report = reporter.report();
        assert_eq!(report.depth(), 0);
        let last = report.entries().last().unwrap();
        assert_eq!(last.level, Level::Error);
        assert_eq!(last.message, "disk full\nsrc/io.rs:12");
        assert!(last.group_id.is_none());

        let records = fx.diagnostics.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, DiagnosticSeverity::Error);
        assert!(records[0].message.contains("[Import] error: disk full at src/io.rs:12"));
    }

    #[test]
    fn test_recoverable_failure_still_unwinds() {
        let fx = Fixture::new();
        let mut reporter = fx.reporter(NotificationPolicy::default());
        reporter.start_group();

        reporter.fail(Failure::new(FailureKind::Warning, "slow"));

        assert_eq!(reporter.report().depth(), 0);
        assert_eq!(reporter.report().count(Level::Warning), 1);
        assert_eq!(fx.diagnostics.records()[0].severity, DiagnosticSeverity::Warning);
    }

    #[test]
    fn test_finalize_writes_and_freezes() {
        let fx = Fixture::new();
        let mut reporter = fx.reporter(NotificationPolicy::default());
        reporter.add_info("hello");
        reporter.start_group();

        let outcome = reporter.finalize().unwrap();

        assert_eq!(outcome.dispatch, DispatchOutcome::NotRequired);
        assert_eq!(outcome.path, reporter.path());
        assert!(outcome.path.exists());
        assert!(!reporter.report().is_active());
        assert_eq!(reporter.report().depth(), 0);

        reporter.add_info("ignored");
        assert_eq!(reporter.report().total_entries(), 1);
    }

    #[test]
    fn test_finalize_twice_returns_first_outcome() {
        let fx = Fixture::new();
        let mut reporter = fx.reporter(on_error_policy(EmailMethod::OnShutdown));
        reporter.add_error("boom");

        let first = reporter.finalize().unwrap();
        let second = reporter.finalize().unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.notifier.count(), 1);
    }

    #[test]
    fn test_only_on_error_policy() {
        let fx = Fixture::new();
        let mut clean = fx.reporter(on_error_policy(EmailMethod::OnShutdown));
        clean.add_info("fine");
        assert_eq!(clean.finalize().unwrap().dispatch, DispatchOutcome::NotRequired);
        assert_eq!(fx.notifier.count(), 0);

        let mut failed = fx.reporter(on_error_policy(EmailMethod::OnShutdown));
        failed.add_error("bad");
        assert_eq!(failed.finalize().unwrap().dispatch, DispatchOutcome::Sent);
        assert_eq!(fx.notifier.count(), 1);
    }

    #[test]
    fn test_queue_route_pushes_job_after_write() {
        let fx = Fixture::new();
        let queue = Arc::new(RecordingQueue::default());
        let mut reporter = Reporter::new(
            Report::new("Import").with_policy(on_error_policy(EmailMethod::ViaQueue)),
            fx.collaborators().with_queue(queue.clone()),
        ).unwrap();
        reporter.add_error("bad");

        let outcome = reporter.finalize().unwrap();

        assert_eq!(outcome.dispatch, DispatchOutcome::Queued);
        let jobs = queue.jobs.lock();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].path, outcome.path);
        assert!(jobs[0].path.exists());
        assert_eq!(fx.notifier.count(), 0);
    }

    #[test]
    fn test_queue_unavailable_falls_back_inline() {
        let fx = Fixture::new();
        let mut reporter = fx.reporter(on_error_policy(EmailMethod::ViaQueue));
        reporter.add_error("bad");

        let outcome = reporter.finalize().unwrap();

        assert_eq!(outcome.dispatch, DispatchOutcome::SentFallback);
        assert_eq!(fx.notifier.count(), 1);
        let persisted = fx.store.load(&outcome.path).unwrap();
        assert_eq!(persisted.count(Level::Error), 2);
        assert_eq!(persisted.entries().last().unwrap().message, QUEUE_FALLBACK_MESSAGE);
    }

    #[test]
    fn test_closed_queue_falls_back_inline() {
        let fx = Fixture::new();
        let queue = Arc::new(RecordingQueue {
            closed: true,
            ..Default::default()
        });
        let mut reporter = Reporter::new(
            Report::new("Import").with_policy(on_error_policy(EmailMethod::ViaQueue)),
            fx.collaborators().with_queue(queue),
        ).unwrap();
        reporter.add_error("bad");

        assert_eq!(reporter.finalize().unwrap().dispatch, DispatchOutcome::SentFallback);
    }

    #[test]
    fn test_missing_notifier_records_error() {
        let fx = Fixture::new();
        let collaborators = Collaborators::new(fx.store.clone(), fx.diagnostics.clone());
        let mut reporter = Reporter::new(
            Report::new("Import").with_policy(on_error_policy(EmailMethod::OnShutdown)),
            collaborators,
        ).unwrap();
        reporter.add_error("bad");

        let outcome = reporter.finalize().unwrap();

        assert!(matches!(outcome.dispatch, DispatchOutcome::MissingConfig(_)));
        let persisted = fx.store.load(&outcome.path).unwrap();
        assert!(persisted.entries().last().unwrap().message.contains("no notifier"));
    }

    #[test]
    fn test_inline_failure_recorded_not_propagated() {
        let fx = Fixture::new();
        let collaborators =
            Collaborators::new(fx.store.clone(), fx.diagnostics.clone()).with_notifier(Arc::new(FailingNotifier));
        let mut reporter = Reporter::new(
            Report::new("Import").with_policy(on_error_policy(EmailMethod::OnShutdown)),
            collaborators,
        ).unwrap();
        reporter.add_error("bad");

        let outcome = reporter.finalize().unwrap();

        assert!(matches!(outcome.dispatch, DispatchOutcome::Failed(_)));
        let persisted = fx.store.load(&outcome.path).unwrap();
        assert!(persisted
            .entries()
            .last()
            .unwrap()
            .message
            .contains("relay refused connection"));
    }

    #[test]
    fn test_write_error_propagates() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let collaborators = Collaborators::new(ReportStore::new(&blocker), Arc::new(MemoryDiagnostics::new()));
        let mut reporter = Reporter::new(Report::new("Import"), collaborators).unwrap();

        let err = reporter.finalize().unwrap_err();
        assert!(matches!(err, ReportError::Io(_)));
        assert!(matches!(reporter.finalize(), Err(ReportError::ReadOnly(_))));
    }

    #[test]
    fn test_run_task_error() {
        let fx = Fixture::new();
        let mut reporter = fx.reporter(NotificationPolicy::default());

        let result: Result<(), RunError<String>> = reporter.run(|r| {
            r.start_group();
            r.add_info("working");
            Err("bad input".to_string())
        });

        assert!(matches!(result, Err(RunError::Task(ref msg)) if msg == "bad input"));
        let persisted = fx.store.load(reporter.path()).unwrap();
        assert_eq!(persisted.entries().last().unwrap().message, "bad input");
        assert_eq!(persisted.count(Level::Error), 1);
    }

    #[test]
    fn test_run_success_finalizes() {
        let fx = Fixture::new();
        let mut reporter = fx.reporter(NotificationPolicy::default());

        let value = reporter
            .run(|r| {
                r.add_success("done");
                Ok::<_, String>(7)
            })
            .unwrap();

        assert_eq!(value, 7);
        assert!(reporter.is_finalized());
        assert!(reporter.path().exists());
    }

    #[test]
    fn test_run_panic_persists_then_resumes() {
        let fx = Fixture::new();
        let mut reporter = fx.reporter(NotificationPolicy::default());

        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), RunError<String>> = reporter.run(|r| {
                r.start_group();
                r.add_info("a");
                r.start_group();
                panic!("index out of range");
            });
        }));

        assert!(caught.is_err());
        let persisted = fx.store.load(reporter.path()).unwrap();
        let last = persisted.entries().last().unwrap();
        assert_eq!(last.level, Level::Error);
        assert!(last.message.contains("index out of range"));
        assert!(last.message.contains(&format!("\n{}:", file!())));
        assert!(!last.message.contains("backtrace"));

        let records = fx.diagnostics.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].message.contains(&format!("at {}:", file!())));
        assert!(records[0].message.contains("\nbacktrace:\n"));

        // both groups closed before the failure entry
        let events: Vec<_> = persisted.tree().collect();
        assert!(matches!(events.last(), Some(RenderEvent::Leaf(_))));
        let exits = events.iter().filter(|e| matches!(e, RenderEvent::ExitGroup(_))).count();
        assert_eq!(exits, 1);
    }

    #[test]
    fn test_drop_finalizes_pending_reporter() {
        let fx = Fixture::new();
        let path = {
            let mut reporter = fx.reporter(NotificationPolicy::default());
            reporter.add_info("forgotten");
            reporter.path().to_path_buf()
        };
        assert!(fx.store.load(&path).unwrap().has_entries());
    }

    #[test]
    fn test_backtrace_goes_to_diagnostics_only() {
        let fx = Fixture::new();
        let mut reporter = fx.reporter(NotificationPolicy::default());

        reporter.fail(Failure::new(FailureKind::Fatal, "lost lock").with_backtrace("0: import::run\n1: main"));

        assert_eq!(reporter.report().entries().last().unwrap().message, "lost lock");
        assert!(fx.diagnostics.records()[0].message.ends_with("backtrace:\n0: import::run\n1: main"));
    }

    #[test]
    fn test_loaded_report_cannot_get_a_reporter() {
        let fx = Fixture::new();
        let mut live = fx.reporter(on_error_policy(EmailMethod::OnShutdown));
        live.add_error("boom");
        let outcome = live.finalize().unwrap();
        drop(live);
        assert_eq!(fx.notifier.count(), 1);
        let written = std::fs::read(&outcome.path).unwrap();

        let loaded = fx.store.load(&outcome.path).unwrap();
        assert!(!loaded.is_active());
        let err = Reporter::new(loaded, fx.collaborators()).unwrap_err();

        assert!(matches!(err, ReportError::ReadOnly(_)));
        assert_eq!(fx.notifier.count(), 1);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), written);
    }

    #[test]
    fn test_panicking_notifier_still_persists() {
        let fx = Fixture::new();
        let collaborators =
            Collaborators::new(fx.store.clone(), fx.diagnostics.clone()).with_notifier(Arc::new(PanickingNotifier));
        let mut reporter = Reporter::new(
            Report::new("Import").with_policy(on_error_policy(EmailMethod::OnShutdown)),
            collaborators,
        )
        .unwrap();
        reporter.add_error("bad");

        let outcome = reporter.finalize().unwrap();

        assert!(matches!(&outcome.dispatch, DispatchOutcome::Failed(reason) if reason.contains("mail relay handle poisoned")));
        assert_eq!(reporter.outcome(), Some(&outcome));
        let persisted = fx.store.load(&outcome.path).unwrap();
        assert_eq!(persisted.count(Level::Error), 2);
        assert!(persisted.entries().last().unwrap().message.contains("notifier panicked"));
    }
}
